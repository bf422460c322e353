//! Pagination and sorting for list endpoints.

use serde::Serialize;

/// Sort keys accepted for product listings. A leading `-` sorts descending.
pub const PRODUCT_SORT_SAFELIST: &[&str] = &[
    "id",
    "name",
    "category",
    "price",
    "is_available",
    "creation_date",
    "-id",
    "-name",
    "-category",
    "-price",
    "-is_available",
    "-creation_date",
];

/// Sort keys accepted for comment listings.
pub const COMMENT_SORT_SAFELIST: &[&str] = &[
    "id",
    "text",
    "creation_date",
    "-id",
    "-text",
    "-creation_date",
];

/// Page, page size and sort key of a list request.
#[derive(Debug, Clone)]
pub struct Filters {
    pub page: i64,
    pub page_size: i64,
    pub sort: String,
    pub sort_safelist: &'static [&'static str],
}

impl Filters {
    pub fn new(page: i64, page_size: i64, sort: impl Into<String>, safelist: &'static [&'static str]) -> Self {
        Self {
            page,
            page_size,
            sort: sort.into(),
            sort_safelist: safelist,
        }
    }

    /// Column to order by. Falls back to `id` when the sort key is not
    /// safelisted, so the result is always safe to splice into SQL.
    pub fn sort_column(&self) -> &str {
        if self.sort_safelist.contains(&self.sort.as_str()) {
            self.sort.trim_start_matches('-')
        } else {
            "id"
        }
    }

    pub fn sort_direction(&self) -> &'static str {
        if self.sort.starts_with('-') { "DESC" } else { "ASC" }
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).max(0) * self.page_size
    }
}

/// Pagination metadata returned next to a page of results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Metadata {
    #[serde(skip_serializing_if = "is_zero")]
    pub current_page: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub page_size: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub first_page: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub last_page: i64,
    #[serde(skip_serializing_if = "is_zero")]
    pub total_records: i64,
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

impl Metadata {
    /// Build metadata for `total_records` rows split into pages of `page_size`.
    /// Returns empty metadata when there are no records.
    pub fn calculate(total_records: i64, page: i64, page_size: i64) -> Self {
        if total_records == 0 || page_size <= 0 {
            return Self::default();
        }
        Self {
            current_page: page,
            page_size,
            first_page: 1,
            last_page: (total_records + page_size - 1) / page_size,
            total_records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descending_sort_is_detected() {
        let filters = Filters::new(1, 5, "-price", PRODUCT_SORT_SAFELIST);
        assert_eq!(filters.sort_direction(), "DESC");
        assert_eq!(filters.sort_column(), "price");
    }

    #[test]
    fn ascending_is_the_default() {
        let filters = Filters::new(1, 5, "", PRODUCT_SORT_SAFELIST);
        assert_eq!(filters.sort_direction(), "ASC");
    }

    #[test]
    fn unknown_sort_falls_back_to_id() {
        let filters = Filters::new(1, 5, "price; DROP TABLE users", PRODUCT_SORT_SAFELIST);
        assert_eq!(filters.sort_column(), "id");
    }

    #[test]
    fn offset_follows_page() {
        let filters = Filters::new(3, 20, "id", COMMENT_SORT_SAFELIST);
        assert_eq!(filters.limit(), 20);
        assert_eq!(filters.offset(), 40);
    }

    #[test]
    fn metadata_rounds_last_page_up() {
        let meta = Metadata::calculate(41, 2, 20);
        assert_eq!(meta.first_page, 1);
        assert_eq!(meta.last_page, 3);
        assert_eq!(meta.current_page, 2);
        assert_eq!(meta.total_records, 41);
    }

    #[test]
    fn metadata_is_empty_without_records() {
        assert_eq!(Metadata::calculate(0, 1, 20), Metadata::default());
        assert_eq!(serde_json::to_string(&Metadata::default()).unwrap(), "{}");
    }
}
