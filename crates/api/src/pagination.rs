//! Page-number pagination for list endpoints.

use serde::{Deserialize, Serialize};
use store::Page;

use crate::error::ApiError;

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

/// `?page=&page_size=` query parameters. Pages are 1-based.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl PageParams {
    /// Resolves the requested page against defaults and limits.
    pub fn resolve(self) -> Result<PageWindow, ApiError> {
        let page = self.page.unwrap_or(1);
        if page == 0 {
            return Err(ApiError::bad_field("page", "Invalid page."));
        }
        let page_size = self
            .page_size
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE);
        // The row offset has to fit a SQL BIGINT.
        let fits = (page - 1)
            .checked_mul(page_size)
            .is_some_and(|offset| i64::try_from(offset).is_ok());
        if !fits {
            return Err(ApiError::bad_field("page", "Invalid page."));
        }
        Ok(PageWindow { page, page_size })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: usize,
    pub page_size: usize,
}

impl PageWindow {
    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.page_size)
    }

    pub fn limit(&self) -> usize {
        self.page_size
    }

    /// Wraps a page already limited by the store.
    pub fn wrap<T, U>(&self, page: Page<T>, f: impl FnMut(T) -> U) -> Paginated<U> {
        let page = page.map(f);
        Paginated {
            count: page.total,
            page: self.page,
            page_size: self.page_size,
            results: page.items,
        }
    }

    /// Cuts the window out of a full listing.
    pub fn slice<T, U>(&self, items: Vec<T>, f: impl FnMut(T) -> U) -> Paginated<U> {
        let count = items.len() as u64;
        let results = items
            .into_iter()
            .skip(self.offset())
            .take(self.page_size)
            .map(f)
            .collect();
        Paginated {
            count,
            page: self.page,
            page_size: self.page_size,
            results,
        }
    }
}

/// A page of results with the total number of matches.
#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub count: u64,
    pub page: usize,
    pub page_size: usize,
    pub results: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_first_page_of_ten() {
        let window = PageParams::default().resolve().unwrap();
        assert_eq!(window, PageWindow { page: 1, page_size: 10 });
        assert_eq!(window.offset(), 0);
    }

    #[test]
    fn page_size_is_capped() {
        let window = PageParams {
            page: Some(3),
            page_size: Some(500),
        }
        .resolve()
        .unwrap();
        assert_eq!(window.page_size, MAX_PAGE_SIZE);
        assert_eq!(window.offset(), 200);
    }

    #[test]
    fn page_zero_is_rejected() {
        let err = PageParams {
            page: Some(0),
            page_size: None,
        }
        .resolve()
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest { field: Some("page"), .. }));
    }

    #[test]
    fn unrepresentable_offset_is_rejected() {
        let err = PageParams {
            page: Some(usize::MAX),
            page_size: Some(10),
        }
        .resolve()
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest { field: Some("page"), .. }));

        let far = PageParams {
            page: Some(1_000_000),
            page_size: Some(100),
        }
        .resolve()
        .unwrap();
        assert_eq!(far.offset(), 99_999_900);
    }

    #[test]
    fn slice_counts_everything_but_returns_the_window() {
        let window = PageParams {
            page: Some(2),
            page_size: Some(2),
        }
        .resolve()
        .unwrap();
        let page = window.slice((1..=5).collect(), |n: i32| n * 10);
        assert_eq!(page.count, 5);
        assert_eq!(page.results, vec![30, 40]);
    }
}
