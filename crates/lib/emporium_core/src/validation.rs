//! Field-level input validation.
//!
//! A [`Validator`] collects one message per field; the first failed check for
//! a field wins. The HTTP layer turns a non-empty validator into a 422 body.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::models::Filters;

/// Pattern used for email addresses (WHATWG "valid email address").
static EMAIL_RX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .expect("email pattern compiles")
});

/// Accumulated validation failures, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validator {
    errors: BTreeMap<String, String>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record `message` for `key` unless the field already has an error.
    pub fn add_error(&mut self, key: &str, message: &str) {
        self.errors
            .entry(key.to_string())
            .or_insert_with(|| message.to_string());
    }

    /// Record `message` for `key` when `ok` is false.
    pub fn check(&mut self, ok: bool, key: &str, message: &str) {
        if !ok {
            self.add_error(key, message);
        }
    }

    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    pub fn into_errors(self) -> BTreeMap<String, String> {
        self.errors
    }
}

pub fn is_email(value: &str) -> bool {
    EMAIL_RX.is_match(value)
}

pub fn validate_email(v: &mut Validator, email: &str) {
    v.check(!email.is_empty(), "email", "must be provided");
    v.check(is_email(email), "email", "must be a valid email address");
}

pub fn validate_password_plaintext(v: &mut Validator, password: &str) {
    v.check(!password.is_empty(), "password", "must be provided");
    v.check(password.len() >= 8, "password", "must be at least 8 bytes long");
    v.check(password.len() <= 72, "password", "must not be more than 72 bytes long");
}

pub fn validate_name(v: &mut Validator, name: &str) {
    v.check(!name.is_empty(), "name", "must be provided");
    v.check(name.len() <= 20, "name", "must not be more than 20 bytes long");
}

/// Checks applied on registration.
pub fn validate_registration(v: &mut Validator, name: &str, email: &str, password: &str) {
    validate_name(v, name);
    validate_email(v, email);
    validate_password_plaintext(v, password);
}

/// Largest accepted price, in minor units (100 million in major units).
pub const MAX_PRICE: i64 = 10_000_000_000;

/// Largest accepted quantity on hand.
pub const MAX_QUANTITY: i32 = 1_000_000;

pub fn validate_product(
    v: &mut Validator,
    name: &str,
    price: i64,
    description: &str,
    category: &str,
    quantity: i32,
) {
    validate_name(v, name);
    v.check(price >= 0, "price", "can not be negative");
    v.check(price <= MAX_PRICE, "price", "must be a maximum of 100 million");
    v.check(!description.is_empty(), "description", "must be provided");
    v.check(!category.is_empty(), "category", "must be provided");
    v.check(quantity >= 0, "quantity", "can not be negative");
    v.check(quantity <= MAX_QUANTITY, "quantity", "must be a maximum of 1 million");
}

pub fn validate_comment(v: &mut Validator, text: &str) {
    v.check(!text.is_empty(), "text", "must be provided");
    v.check(text.len() <= 100, "text", "must not be more than 100 bytes long");
}

pub fn validate_filters(v: &mut Validator, filters: &Filters) {
    v.check(filters.page > 0, "page", "must be greater than zero");
    v.check(filters.page <= 10_000_000, "page", "must be a maximum of 10 million");
    v.check(filters.page_size > 0, "page_size", "must be greater than zero");
    v.check(filters.page_size <= 100, "page_size", "must be a maximum of 100");
    v.check(
        filters.sort_safelist.contains(&filters.sort.as_str()),
        "sort",
        "invalid sort value",
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::filters::PRODUCT_SORT_SAFELIST;

    #[test]
    fn empty_email_is_rejected() {
        let mut v = Validator::new();
        validate_email(&mut v, "");
        assert!(!v.valid());
        assert_eq!(v.errors()["email"], "must be provided");
    }

    #[test]
    fn email_shapes() {
        let long_label = format!("a@{}.com", "a".repeat(64));
        let cases = [
            ("/////@gmail.com", true),
            ("arman_alzhan@mail.ru", true),
            ("arman@////.///", false),
            (long_label.as_str(), false),
            ("a a@a.a", false),
            ("a@a a.a", false),
            ("email", false),
            ("email@mail.", false),
            ("@mail.ru", false),
        ];
        for (input, expected) in cases {
            assert_eq!(is_email(input), expected, "{input}");
        }
    }

    #[test]
    fn first_error_per_field_wins() {
        let mut v = Validator::new();
        validate_password_plaintext(&mut v, "");
        assert_eq!(v.errors()["password"], "must be provided");
    }

    #[test]
    fn password_length_bounds() {
        let mut v = Validator::new();
        validate_password_plaintext(&mut v, "short");
        assert_eq!(v.errors()["password"], "must be at least 8 bytes long");

        let mut v = Validator::new();
        validate_password_plaintext(&mut v, &"x".repeat(73));
        assert_eq!(v.errors()["password"], "must not be more than 72 bytes long");

        let mut v = Validator::new();
        validate_password_plaintext(&mut v, "longenough");
        assert!(v.valid());
    }

    #[test]
    fn registration_collects_every_field() {
        let mut v = Validator::new();
        validate_registration(&mut v, "", "nope", "pw");
        let keys: Vec<_> = v.errors().keys().cloned().collect();
        assert_eq!(keys, vec!["email", "name", "password"]);
    }

    #[test]
    fn product_rules() {
        let mut v = Validator::new();
        validate_product(&mut v, "Mug", -1, "", "kitchen", -2);
        assert_eq!(v.errors()["price"], "can not be negative");
        assert_eq!(v.errors()["description"], "must be provided");
        assert_eq!(v.errors()["quantity"], "can not be negative");
        assert!(!v.errors().contains_key("category"));
    }

    #[test]
    fn product_price_and_quantity_are_bounded() {
        let mut v = Validator::new();
        validate_product(&mut v, "Yacht", i64::MAX - 10, "big", "boats", i32::MAX);
        assert_eq!(v.errors()["price"], "must be a maximum of 100 million");
        assert_eq!(v.errors()["quantity"], "must be a maximum of 1 million");

        let mut v = Validator::new();
        validate_product(&mut v, "Yacht", MAX_PRICE, "big", "boats", MAX_QUANTITY);
        assert!(v.valid());
    }

    #[test]
    fn comment_length() {
        let mut v = Validator::new();
        validate_comment(&mut v, &"c".repeat(101));
        assert!(!v.valid());

        let mut v = Validator::new();
        validate_comment(&mut v, "great mug");
        assert!(v.valid());
    }

    #[test]
    fn filters_must_use_safelisted_sort() {
        let mut v = Validator::new();
        validate_filters(&mut v, &Filters::new(0, 500, "password_hash", PRODUCT_SORT_SAFELIST));
        assert_eq!(v.errors().len(), 3);

        let mut v = Validator::new();
        validate_filters(&mut v, &Filters::new(1, 20, "-price", PRODUCT_SORT_SAFELIST));
        assert!(v.valid());
    }
}
