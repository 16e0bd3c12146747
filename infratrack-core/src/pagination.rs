//! Paged reads over append-only histories.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const MAX_PAGE_SIZE: usize = 100;

/// A 1-based page request. Out-of-range values are clamped, not rejected.
///
/// Every way of building one, deserialization included, goes through
/// [`PageRequest::new`], so `page >= 1` and `1 <= page_size <= MAX_PAGE_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawPageRequest")]
pub struct PageRequest {
    page: usize,
    page_size: usize,
}

/// Wire shape of a page request before clamping.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPageRequest {
    #[serde(default)]
    page: usize,
    #[serde(default = "default_page_size")]
    page_size: usize,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

impl From<RawPageRequest> for PageRequest {
    fn from(raw: RawPageRequest) -> Self {
        Self::new(raw.page, raw.page_size)
    }
}

impl PageRequest {
    pub fn new(page: usize, page_size: usize) -> Self {
        Self {
            page: page.max(1),
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        }
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn offset(&self) -> usize {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, DEFAULT_PAGE_SIZE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub current_page: usize,
    pub page_size: usize,
    pub total_records: usize,
    pub total_pages: usize,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl Pagination {
    pub fn new(request: PageRequest, total_records: usize) -> Self {
        let total_pages = total_records.div_ceil(request.page_size);
        Self {
            current_page: request.page,
            page_size: request.page_size,
            total_records,
            total_pages,
            has_next_page: request.page < total_pages,
            has_prev_page: request.page > 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub records: Vec<T>,
    pub pagination: Pagination,
}

/// Page over records stored oldest-first, returning them most-recent-first.
pub fn page_most_recent_first<T: Clone>(records: &[T], request: PageRequest) -> Page<T> {
    let records_page = records
        .iter()
        .rev()
        .skip(request.offset())
        .take(request.page_size)
        .cloned()
        .collect();
    Page {
        records: records_page,
        pagination: Pagination::new(request, records.len()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_is_clamped() {
        assert_eq!(PageRequest::new(0, 0), PageRequest { page: 1, page_size: 1 });
        assert_eq!(PageRequest::new(3, 1000).page_size(), MAX_PAGE_SIZE);
        assert_eq!(PageRequest::default().page_size(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn test_deserialized_request_is_clamped() {
        let request: PageRequest = serde_json::from_str(r#"{"page":0,"pageSize":0}"#).unwrap();
        assert_eq!(request.page(), 1);
        assert_eq!(request.page_size(), 1);
        assert_eq!(request.offset(), 0);

        let request: PageRequest = serde_json::from_str(r#"{"page":2,"pageSize":500}"#).unwrap();
        assert_eq!(request.page_size(), MAX_PAGE_SIZE);

        let request: PageRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(request, PageRequest::default());

        let page = page_most_recent_first(&[1u8, 2, 3], request);
        assert_eq!(page.pagination.current_page, 1);
        assert_eq!(page.records, vec![3, 2, 1]);
    }

    #[test]
    fn test_pages_are_most_recent_first() {
        let records: Vec<u32> = (1..=25).collect();

        let first = page_most_recent_first(&records, PageRequest::new(1, 10));
        assert_eq!(first.records, (16..=25).rev().collect::<Vec<_>>());
        assert_eq!(first.pagination.total_pages, 3);
        assert!(first.pagination.has_next_page);
        assert!(!first.pagination.has_prev_page);

        let last = page_most_recent_first(&records, PageRequest::new(3, 10));
        assert_eq!(last.records, vec![5, 4, 3, 2, 1]);
        assert!(!last.pagination.has_next_page);
        assert!(last.pagination.has_prev_page);

        let beyond = page_most_recent_first(&records, PageRequest::new(9, 10));
        assert!(beyond.records.is_empty());
        assert!(!beyond.pagination.has_next_page);
    }

    #[test]
    fn test_empty_history() {
        let page = page_most_recent_first::<u8>(&[], PageRequest::default());
        assert!(page.records.is_empty());
        assert_eq!(page.pagination.total_pages, 0);
        assert_eq!(page.pagination.total_records, 0);
        assert!(!page.pagination.has_next_page);
        assert!(!page.pagination.has_prev_page);
    }
}
