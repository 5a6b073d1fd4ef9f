//! Query derivation, execution, mapping, pagination and bulk mutation.
//!
//! Stages are kept separate: `descriptor`/`method_name` describe a query,
//! `plan` validates and renders it, `executor` runs SQL, `mapper` shapes rows.

pub mod bulk;
pub mod descriptor;
pub mod executor;
pub mod mapper;
pub mod method_name;
pub mod page;
pub mod plan;

/// Per-query execution hints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryHints {
    /// Loaded entities are not dirty-checked on flush.
    pub read_only: bool,
}

impl QueryHints {
    pub fn read_only() -> Self {
        Self { read_only: true }
    }
}
