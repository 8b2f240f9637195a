//! Offset pagination for list endpoints.
//!
//! Every listing takes `skip` and `limit` query parameters. Each endpoint picks its own
//! default and ceiling through [`PageBounds`]; out-of-range values are clamped, not rejected.

use serde::{Deserialize, Serialize};
use serde_with::{DisplayFromStr, serde_as};
use utoipa::{IntoParams, ToSchema};

/// Default page size and ceiling for one endpoint
#[derive(Debug, Clone, Copy)]
pub struct PageBounds {
    pub default_limit: i64,
    pub max_limit: i64,
}

/// `/users`
pub const USER_PAGE: PageBounds = PageBounds {
    default_limit: 10,
    max_limit: 100,
};

/// `/transactions`
pub const TRANSACTION_PAGE: PageBounds = PageBounds {
    default_limit: 20,
    max_limit: 20,
};

/// `/transactions/user/{user_id}`
pub const USER_TRANSACTION_PAGE: PageBounds = PageBounds {
    default_limit: 100,
    max_limit: 100,
};

#[serde_as]
#[derive(Debug, Default, Clone, Deserialize, IntoParams, ToSchema)]
pub struct Pagination {
    /// Number of items to skip (default: 0)
    #[param(default = 0, minimum = 0)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub skip: Option<i64>,

    /// Maximum number of items to return
    #[param(minimum = 1)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub limit: Option<i64>,
}

impl Pagination {
    #[inline]
    pub fn skip(&self) -> i64 {
        self.skip.unwrap_or(0).max(0)
    }

    /// The limit, defaulted and clamped to `1..=max_limit`
    #[inline]
    pub fn limit(&self, bounds: PageBounds) -> i64 {
        self.limit.unwrap_or(bounds.default_limit).clamp(1, bounds.max_limit)
    }

    #[inline]
    pub fn params(&self, bounds: PageBounds) -> (i64, i64) {
        (self.skip(), self.limit(bounds))
    }
}

/// Paginated listing with the total count before pagination
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T: ToSchema> {
    pub data: Vec<T>,
    pub total_count: i64,
    pub skip: i64,
    pub limit: i64,
}

impl<T: ToSchema> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total_count: i64, skip: i64, limit: i64) -> Self {
        Self {
            data,
            total_count,
            skip,
            limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let p = Pagination::default();
        assert_eq!(p.skip(), 0);
        assert_eq!(p.limit(USER_PAGE), 10);
        assert_eq!(p.limit(TRANSACTION_PAGE), 20);
        assert_eq!(p.limit(USER_TRANSACTION_PAGE), 100);
    }

    #[test]
    fn test_limit_clamping() {
        let p = Pagination {
            skip: None,
            limit: Some(0),
        };
        assert_eq!(p.limit(USER_PAGE), 1);

        let p = Pagination {
            skip: None,
            limit: Some(50),
        };
        assert_eq!(p.limit(USER_PAGE), 50);
        assert_eq!(p.limit(TRANSACTION_PAGE), 20);
    }

    #[test]
    fn test_skip_clamping() {
        let p = Pagination {
            skip: Some(-10),
            limit: None,
        };
        assert_eq!(p.skip(), 0);
        assert_eq!(p.params(USER_PAGE), (0, 10));
    }

    #[test]
    fn test_parses_from_query_strings() {
        #[derive(Deserialize)]
        struct Query {
            #[serde(flatten)]
            pagination: Pagination,
            order_by: Option<String>,
        }

        let q: Query = query_from("skip=5&limit=7&order_by=-id");
        assert_eq!(q.pagination.params(USER_PAGE), (5, 7));
        assert_eq!(q.order_by.as_deref(), Some("-id"));
    }

    fn query_from<T: serde::de::DeserializeOwned>(query: &str) -> T {
        let uri: axum::http::Uri = format!("/?{query}").parse().unwrap();
        axum::extract::Query::<T>::try_from_uri(&uri).unwrap().0
    }
}
