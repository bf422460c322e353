//! Request handlers.

pub mod auth;
pub mod cart;
pub mod comments;
pub mod health;
pub mod products;
pub mod users;

use emporium_core::models::Filters;
use emporium_core::validation::{Validator, validate_filters};

use crate::error::{AppResult, ensure_valid};
use crate::models::ListQuery;

const DEFAULT_PAGE: i64 = 1;
const DEFAULT_PAGE_SIZE: i64 = 20;
const DEFAULT_SORT: &str = "id";

fn read_int(v: &mut Validator, key: &str, raw: Option<&str>, default: i64) -> i64 {
    match raw {
        None | Some("") => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            v.add_error(key, "must be an integer value");
            default
        }),
    }
}

/// Page, page size and sort from a list query, validated against `safelist`.
pub(crate) fn list_filters(
    query: &ListQuery,
    safelist: &'static [&'static str],
) -> AppResult<Filters> {
    let mut v = Validator::new();
    let page = read_int(&mut v, "page", query.page.as_deref(), DEFAULT_PAGE);
    let page_size = read_int(&mut v, "page_size", query.page_size.as_deref(), DEFAULT_PAGE_SIZE);
    let sort = query
        .sort
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_SORT);

    let filters = Filters::new(page, page_size, sort, safelist);
    validate_filters(&mut v, &filters);
    ensure_valid(v)?;
    Ok(filters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use emporium_core::models::filters::PRODUCT_SORT_SAFELIST;

    #[test]
    fn defaults_apply_when_absent() {
        let filters = list_filters(&ListQuery::default(), PRODUCT_SORT_SAFELIST).unwrap();
        assert_eq!(filters.page, 1);
        assert_eq!(filters.page_size, 20);
        assert_eq!(filters.sort, "id");
    }

    #[test]
    fn non_numeric_page_is_a_field_error() {
        let query = ListQuery {
            page: Some("two".into()),
            sort: Some("-price".into()),
            ..Default::default()
        };
        match list_filters(&query, PRODUCT_SORT_SAFELIST) {
            Err(AppError::Validation(fields)) => {
                assert_eq!(fields["page"], "must be an integer value");
                assert!(!fields.contains_key("sort"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_sort_and_oversized_page_are_rejected() {
        let query = ListQuery {
            page_size: Some("500".into()),
            sort: Some("password_hash".into()),
            ..Default::default()
        };
        match list_filters(&query, PRODUCT_SORT_SAFELIST) {
            Err(AppError::Validation(fields)) => {
                assert_eq!(fields["page_size"], "must be a maximum of 100");
                assert_eq!(fields["sort"], "invalid sort value");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}
