//! Rowkeeper Core - Typed Rows Over Untyped Stores
//!
//! Column descriptors, table schemas, row value containers and cursors.
//! Storage engines and data access objects live in rowkeeper-storage.
//!
//! The pieces, leaf first:
//! - [`Property`] / [`Column`]: typed and untyped descriptors of one column
//! - [`Table`]: the immutable schema a row type is read against
//! - [`Model`]: one row with default, read and set tiers plus dirty tracking
//! - [`Cursor`]: a result set with cached column positions and typed reads

pub mod config;
pub mod cursor;
pub mod error;
pub mod model;
pub mod property;
pub mod table;
pub mod value;

pub use config::StoreConfig;
pub use cursor::{Cursor, MaterializedRows, RowSet};
pub use error::{ConfigError, RowkeeperError, RowkeeperResult, SchemaError, StorageError};
pub use model::{Model, Record};
pub use property::{
    count, Column, DoubleProperty, IntegerProperty, LongProperty, Property, PropertyVisitor,
    StringProperty,
};
pub use table::{Table, TableBuilder, ID_COLUMN, NO_ID};
pub use value::{ColumnType, Value, ValueKind, ValueMap};
