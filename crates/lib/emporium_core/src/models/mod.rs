//! Domain models.
//!
//! Plain data carried between the stores, the services and the HTTP layer.
//! Request/response shapes live in `emporium_api::models`.

pub mod cart;
pub mod comment;
pub mod filters;
pub mod product;
pub mod token;
pub mod user;

pub use cart::{CartItem, CartLine, CartMutation, ShoppingSession};
pub use comment::{Comment, NewComment};
pub use filters::{Filters, Metadata};
pub use product::{NewProduct, Product};
pub use token::TokenRecord;
pub use user::{ActivationLink, NewUser, Registration, Role, User};
