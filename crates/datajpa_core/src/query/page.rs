//! Page requests, sort keys and page results.
//!
//! # Responsibility
//! - Validate page requests before any query runs.
//! - Derive page metadata from content and total count.
//!
//! # Invariants
//! - `page_size` is always in `1..=MAX_PAGE_SIZE`; larger requests are capped.
//! - Any non-negative page index is accepted; past the last page the content
//!   is empty.
//! - `total_pages == ceil(total_elements / size)`; zero rows means zero pages.

use super::descriptor::Direction;
use super::plan::{ValidationError, Window};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::num::NonZeroU32;

/// Largest page served; bigger requested sizes are capped to it.
pub const MAX_PAGE_SIZE: u32 = 2000;

/// One `(field, direction)` sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortOrder {
    pub field: String,
    pub direction: Direction,
}

/// Ordered list of sort keys. Earlier keys take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sort {
    orders: Vec<SortOrder>,
}

impl Sort {
    pub fn unsorted() -> Self {
        Self::default()
    }

    pub fn by(field: impl Into<String>, direction: Direction) -> Self {
        Self::unsorted().and(field, direction)
    }

    pub fn and(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.orders.push(SortOrder {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn orders(&self) -> &[SortOrder] {
        &self.orders
    }

    pub fn is_unsorted(&self) -> bool {
        self.orders.is_empty()
    }
}

/// Zero-based page index, page size and sort.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageRequest {
    page_index: u64,
    page_size: u32,
    sort: Sort,
}

impl PageRequest {
    /// Validates raw request values, as received from an outer layer.
    ///
    /// Sizes above `MAX_PAGE_SIZE` are capped to it.
    ///
    /// # Errors
    /// - `InvalidPageRequest` when `page_index < 0` or `page_size <= 0`.
    pub fn of(page_index: i64, page_size: i64) -> Result<Self, ValidationError> {
        let page_index = u64::try_from(page_index).map_err(|_| {
            ValidationError::InvalidPageRequest(format!(
                "page index must not be negative, got {page_index}"
            ))
        })?;
        if page_size < 1 {
            return Err(ValidationError::InvalidPageRequest(format!(
                "page size must be positive, got {page_size}"
            )));
        }
        let page_size =
            u32::try_from(page_size).map_or(MAX_PAGE_SIZE, |size| size.min(MAX_PAGE_SIZE));
        Ok(Self {
            page_index,
            page_size,
            sort: Sort::unsorted(),
        })
    }

    /// Like `of`, with sort keys.
    pub fn of_sorted(page_index: i64, page_size: i64, sort: Sort) -> Result<Self, ValidationError> {
        Ok(Self::of(page_index, page_size)?.with_sort(sort))
    }

    /// First page of `page_size` rows; sizes above `MAX_PAGE_SIZE` are capped.
    pub fn first(page_size: NonZeroU32) -> Self {
        Self {
            page_index: 0,
            page_size: page_size.get().min(MAX_PAGE_SIZE),
            sort: Sort::unsorted(),
        }
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    pub fn page_index(&self) -> u64 {
        self.page_index
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn sort(&self) -> &Sort {
        &self.sort
    }

    /// Rows skipped before this page; saturates for huge indices.
    pub fn offset(&self) -> u64 {
        self.page_index.saturating_mul(u64::from(self.page_size))
    }

    pub fn next(&self) -> Self {
        Self {
            page_index: self.page_index.saturating_add(1),
            ..self.clone()
        }
    }

    pub(crate) fn window(&self) -> Window {
        Window {
            offset: self.offset(),
            limit: u64::from(self.page_size),
        }
    }

    /// Total implied by the content alone, when the count query can be skipped.
    pub(crate) fn known_total(&self, content_len: usize) -> Option<u64> {
        let content_len = u64::try_from(content_len).ok()?;
        let size = u64::from(self.page_size);
        if self.offset() == 0 {
            return (size > content_len).then_some(content_len);
        }
        (content_len != 0 && size > content_len).then(|| self.offset().saturating_add(content_len))
    }
}

/// One page of results plus metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    content: Vec<T>,
    number: u64,
    size: u32,
    total_elements: u64,
}

impl<T> Page<T> {
    pub fn new(content: Vec<T>, request: &PageRequest, total_elements: u64) -> Self {
        Self {
            content,
            number: request.page_index(),
            size: request.page_size(),
            total_elements,
        }
    }

    pub fn content(&self) -> &[T] {
        &self.content
    }

    pub fn into_content(self) -> Vec<T> {
        self.content
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn number_of_elements(&self) -> usize {
        self.content.len()
    }

    pub fn total_elements(&self) -> u64 {
        self.total_elements
    }

    pub fn total_pages(&self) -> u64 {
        self.total_elements.div_ceil(u64::from(self.size.max(1)))
    }

    pub fn is_first(&self) -> bool {
        self.number == 0
    }

    pub fn has_next(&self) -> bool {
        self.number
            .saturating_add(1)
            .saturating_mul(u64::from(self.size))
            < self.total_elements
    }

    pub fn is_last(&self) -> bool {
        !self.has_next()
    }

    pub fn has_previous(&self) -> bool {
        self.number > 0
    }

    /// Converts content while keeping metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            number: self.number,
            size: self.size,
            total_elements: self.total_elements,
        }
    }

    pub fn try_map<U, E>(self, f: impl FnMut(T) -> Result<U, E>) -> Result<Page<U>, E> {
        Ok(Page {
            content: self.content.into_iter().map(f).collect::<Result<_, _>>()?,
            number: self.number,
            size: self.size,
            total_elements: self.total_elements,
        })
    }
}

impl<T: Serialize> Serialize for Page<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Page", 8)?;
        state.serialize_field("content", &self.content)?;
        state.serialize_field("totalElements", &self.total_elements)?;
        state.serialize_field("totalPages", &self.total_pages())?;
        state.serialize_field("number", &self.number)?;
        state.serialize_field("size", &self.size)?;
        state.serialize_field("first", &self.is_first())?;
        state.serialize_field("last", &self.is_last())?;
        state.serialize_field("hasNext", &self.has_next())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::{Page, PageRequest, Sort, MAX_PAGE_SIZE};
    use crate::query::descriptor::Direction;
    use crate::query::plan::ValidationError;
    use std::num::NonZeroU32;

    #[test]
    fn page_metadata_for_first_of_two_pages() {
        let request = PageRequest::of(0, 3).unwrap();
        let page = Page::new(vec!["a", "b", "c"], &request, 5);

        assert_eq!(page.total_pages(), 2);
        assert!(page.is_first());
        assert!(page.has_next());
        assert!(!page.is_last());
        assert!(!page.has_previous());
    }

    #[test]
    fn page_beyond_last_is_empty_with_metadata() {
        let request = PageRequest::of(4, 3).unwrap();
        let page: Page<u8> = Page::new(Vec::new(), &request, 5);

        assert!(page.content().is_empty());
        assert_eq!(page.total_pages(), 2);
        assert_eq!(page.number(), 4);
        assert!(!page.has_next());
        assert!(!page.is_first());
    }

    #[test]
    fn empty_result_has_zero_pages() {
        let page: Page<u8> = Page::new(Vec::new(), &PageRequest::of(0, 10).unwrap(), 0);
        assert_eq!(page.total_pages(), 0);
        assert!(page.is_first());
        assert!(page.is_last());
    }

    #[test]
    fn rejects_invalid_requests() {
        for (index, size) in [(0, 0), (0, -1), (-1, 3), (i64::MIN, 3)] {
            assert!(
                matches!(
                    PageRequest::of(index, size),
                    Err(ValidationError::InvalidPageRequest(_))
                ),
                "({index}, {size}) should be rejected"
            );
        }
    }

    #[test]
    fn oversized_requests_are_capped() {
        let request = PageRequest::of(0, i64::from(MAX_PAGE_SIZE) + 1).unwrap();
        assert_eq!(request.page_size(), MAX_PAGE_SIZE);
        assert_eq!(PageRequest::of(1, i64::MAX).unwrap().offset(), u64::from(MAX_PAGE_SIZE));
    }

    #[test]
    fn huge_page_index_is_accepted_and_empty() {
        let request = PageRequest::of(i64::MAX, MAX_PAGE_SIZE.into()).unwrap();
        assert_eq!(request.offset(), u64::MAX);

        let page: Page<u8> = Page::new(Vec::new(), &request, 5);
        assert_eq!(page.number(), i64::MAX as u64);
        assert!(!page.has_next());
        assert!(page.has_previous());
    }

    #[test]
    fn count_is_skipped_only_when_content_determines_total() {
        let first = PageRequest::of(0, 3).unwrap();
        assert_eq!(first.known_total(2), Some(2));
        assert_eq!(first.known_total(3), None);

        let later = PageRequest::of(2, 3).unwrap();
        assert_eq!(later.known_total(1), Some(7));
        assert_eq!(later.known_total(0), None);
        assert_eq!(later.known_total(3), None);
    }

    #[test]
    fn first_caps_oversized_requests() {
        let request = PageRequest::first(NonZeroU32::new(10_000).unwrap());
        assert_eq!(request.page_size(), MAX_PAGE_SIZE);
        assert_eq!(request.next().offset(), u64::from(MAX_PAGE_SIZE));
    }

    #[test]
    fn serializes_with_camel_case_metadata() {
        let request =
            PageRequest::of_sorted(0, 2, Sort::by("username", Direction::Desc)).unwrap();
        let page = Page::new(vec![1, 2], &request, 3).map(|value| value * 10);

        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["content"], serde_json::json!([10, 20]));
        assert_eq!(json["totalElements"], 3);
        assert_eq!(json["totalPages"], 2);
        assert_eq!(json["first"], true);
        assert_eq!(json["hasNext"], true);
    }
}
