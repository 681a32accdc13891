use serde::{Deserialize, Serialize};

pub const DEFAULT_PER_PAGE: u32 = 15;
pub const MAX_PER_PAGE: u32 = 100;

/// A 1-based page window requested by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    /// Builds a request from optional query parameters, clamping out-of-range values
    pub fn new(page: Option<u32>, per_page: Option<u32>, default_per_page: u32) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page
                .unwrap_or(default_per_page)
                .clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.per_page)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None, DEFAULT_PER_PAGE)
    }
}

/// One page of a larger result set, with enough metadata to navigate it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
    pub last_page: u32,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, request: PageRequest) -> Self {
        let per_page = i64::from(request.per_page);
        let pages = (total.max(0) + per_page - 1) / per_page;
        let last_page = u32::try_from(pages).unwrap_or(u32::MAX).max(1);

        Self {
            items,
            total,
            page: request.page,
            per_page: request.per_page,
            last_page,
        }
    }

    /// Slices an already-filtered, already-ordered collection
    pub fn from_slice(all: &[T], request: PageRequest) -> Self
    where
        T: Clone,
    {
        let offset = usize::try_from(request.offset()).unwrap_or(usize::MAX);
        let items = all
            .iter()
            .skip(offset)
            .take(request.per_page as usize)
            .cloned()
            .collect();

        Self::new(items, all.len() as i64, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_defaults_and_clamping() {
        let request = PageRequest::new(None, None, DEFAULT_PER_PAGE);
        assert_eq!(request.page, 1);
        assert_eq!(request.per_page, 15);
        assert_eq!(request.offset(), 0);

        let request = PageRequest::new(Some(0), Some(500), DEFAULT_PER_PAGE);
        assert_eq!(request.page, 1);
        assert_eq!(request.per_page, MAX_PER_PAGE);

        let request = PageRequest::new(Some(3), Some(10), DEFAULT_PER_PAGE);
        assert_eq!(request.offset(), 20);
        assert_eq!(request.limit(), 10);
    }

    #[test]
    fn test_last_page_computation() {
        let request = PageRequest::new(Some(1), Some(15), DEFAULT_PER_PAGE);
        assert_eq!(Page::<u8>::new(vec![], 0, request).last_page, 1);
        assert_eq!(Page::<u8>::new(vec![], 15, request).last_page, 1);
        assert_eq!(Page::<u8>::new(vec![], 16, request).last_page, 2);
    }

    #[test]
    fn test_from_slice_windows_items() {
        let all: Vec<u32> = (1..=7).collect();
        let page = Page::from_slice(&all, PageRequest::new(Some(2), Some(3), DEFAULT_PER_PAGE));

        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.total, 7);
        assert_eq!(page.last_page, 3);

        let past_end = Page::from_slice(&all, PageRequest::new(Some(9), Some(3), DEFAULT_PER_PAGE));
        assert!(past_end.items.is_empty());
    }
}
