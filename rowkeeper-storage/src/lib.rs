//! Rowkeeper Storage - Engine Trait, Database Handle and DAOs
//!
//! Defines the storage abstraction rows are read from and written to, the
//! database handle that opens it, and the data access objects that move
//! [`Model`](rowkeeper_core::Model)s in and out of it. An in-memory engine
//! ships in [`memory`] for tests and embedding.

pub mod adapter;
pub mod dao;
pub mod database;
pub mod filter;
pub mod memory;

pub use adapter::{
    apply_external, delete_external, insert_external, normalize_keys, strip_table, to_external,
    update_external, values_from_json, values_to_json,
};
pub use dao::{default_factory, Dao, FetchOptions, RowFactory, SaveOutcome};
pub use database::{Connector, Database};
pub use filter::{and_filter, id_filter, quote, sanitize};
pub use memory::{InMemoryConnector, InMemoryEngine};

use rowkeeper_core::{Column, RowSet, RowkeeperResult, ValueMap};

// ============================================================================
// QUERIES
// ============================================================================

/// A read against one table.
///
/// Clauses are plain text in the relational dialect the engine speaks.
/// Filters built from untrusted text must go through [`sanitize`] first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// Table to read.
    pub table: String,
    /// Projection entries, such as `tasks.title AS title`.
    pub columns: Vec<String>,
    /// Drop duplicate result rows.
    pub distinct: bool,
    /// Row filter.
    pub filter: Option<String>,
    pub group_by: Option<String>,
    /// Filter over grouped rows.
    pub having: Option<String>,
    pub order_by: Option<String>,
    /// Row limit, optionally with an offset (`10`, `10 OFFSET 5` or `5, 10`).
    pub limit: Option<String>,
}

impl Query {
    /// Query projecting raw selector text.
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
            ..Self::default()
        }
    }

    /// Query projecting `columns` through their selectors.
    pub fn select(table: impl Into<String>, columns: &[Column]) -> Self {
        Self::new(table, columns.iter().map(Column::as_sql_selector).collect())
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_group_by(mut self, group_by: impl Into<String>) -> Self {
        self.group_by = Some(group_by.into());
        self
    }

    pub fn with_having(mut self, having: impl Into<String>) -> Self {
        self.having = Some(having.into());
        self
    }

    pub fn with_order_by(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = Some(order_by.into());
        self
    }

    pub fn with_limit(mut self, limit: impl Into<String>) -> Self {
        self.limit = Some(limit.into());
        self
    }

    pub fn with_distinct(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }
}

// ============================================================================
// ENGINE TRAIT
// ============================================================================

/// Relational store the DAO layer talks to.
///
/// Column names in value maps are bare (`title`, not `tasks.title`).
/// Implementations are shared across threads and serialize their own
/// writes.
pub trait StorageEngine: Send + Sync {
    /// Run a read; the result set is positioned before the first row.
    fn query(&self, query: &Query) -> RowkeeperResult<Box<dyn RowSet>>;

    /// Insert one row and return its id. A non-null, non-zero id in
    /// `values` is used as given; otherwise the engine assigns one.
    fn insert(&self, table: &str, id_column: &str, values: &ValueMap) -> RowkeeperResult<i64>;

    /// Write `values` into every row matching `filter` (all rows when
    /// `None`); returns the number of rows changed.
    fn update(&self, table: &str, values: &ValueMap, filter: Option<&str>)
        -> RowkeeperResult<usize>;

    /// Remove every row matching `filter` (all rows when `None`); returns the
    /// number of rows removed.
    fn delete(&self, table: &str, filter: Option<&str>) -> RowkeeperResult<usize>;

    /// Whether writes are refused.
    fn is_read_only(&self) -> bool {
        false
    }
}
