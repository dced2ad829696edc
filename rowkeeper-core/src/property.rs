//! Typed column descriptors
//!
//! A [`Column`] names one column of one table together with its storage
//! kind. A [`Property<T>`] is the same descriptor carrying the Rust type of
//! its values, so reads and writes through it are checked at compile time.
//! Lists of descriptors with mixed kinds are passed around as `&[Column]`;
//! [`Column::accept`] recovers per-kind behavior from an untyped descriptor
//! without a type switch at every call site.

use crate::{ColumnType, RowkeeperResult, SchemaError, ValueKind};
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::Deref;

/// Untyped column descriptor.
///
/// Identity is `(table, name)`: two descriptors are interchangeable iff both
/// match. An unbound descriptor (no table) is a computed pseudo-column whose
/// selector is a literal expression such as `COUNT(1)`.
#[derive(Debug, Clone)]
pub struct Column {
    table: Option<Cow<'static, str>>,
    name: Cow<'static, str>,
    kind: ValueKind,
    expression: Option<Cow<'static, str>>,
}

impl Column {
    /// Create a bound descriptor from static names.
    pub const fn new(table: &'static str, name: &'static str, kind: ValueKind) -> Self {
        Self {
            table: Some(Cow::Borrowed(table)),
            name: Cow::Borrowed(name),
            kind,
            expression: None,
        }
    }

    /// Create a bound descriptor from runtime names.
    pub fn owned(table: impl Into<String>, name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            table: Some(Cow::Owned(table.into())),
            name: Cow::Owned(name.into()),
            kind,
            expression: None,
        }
    }

    /// Create an unbound pseudo-column selected as `expression AS name`.
    pub const fn pseudo(name: &'static str, expression: &'static str, kind: ValueKind) -> Self {
        Self {
            table: None,
            name: Cow::Borrowed(name),
            kind,
            expression: Some(Cow::Borrowed(expression)),
        }
    }

    /// Parse a combined `"table.column"` name.
    pub fn from_qualified(combined: &str, kind: ValueKind) -> RowkeeperResult<Self> {
        let invalid = |reason: &str| SchemaError::InvalidColumnName {
            name: combined.to_string(),
            reason: reason.to_string(),
        };

        let (table, name) = combined
            .split_once('.')
            .ok_or_else(|| invalid("expected table.column"))?;
        if table.is_empty() || name.is_empty() {
            return Err(invalid("empty table or column part").into());
        }

        Ok(Self::owned(table, name, kind))
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Whether this descriptor belongs to a table.
    pub fn is_bound(&self) -> bool {
        self.table.is_some()
    }

    /// `table.column`, or the bare name for pseudo-columns.
    pub fn qualified_name(&self) -> String {
        match &self.table {
            Some(table) => format!("{}.{}", table, self.name),
            None => self.name.to_string(),
        }
    }

    /// Projection entry for this column: `table.column AS column`, or the
    /// literal expression aliased to the name for pseudo-columns.
    pub fn as_sql_selector(&self) -> String {
        match &self.expression {
            Some(expression) => format!("{} AS {}", expression, self.name),
            None => format!("{} AS {}", self.qualified_name(), self.name),
        }
    }

    /// Same kind and selector expression, rebound to another table and name.
    pub fn with_new_values(&self, table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(Cow::Owned(table.into())),
            name: Cow::Owned(name.into()),
            kind: self.kind,
            expression: self.expression.clone(),
        }
    }

    /// Dispatch on this descriptor's kind to the matching visitor method.
    pub fn accept<V: PropertyVisitor>(&self, visitor: &mut V, context: V::Context) -> V::Output {
        match self.kind {
            ValueKind::Integer => visitor.visit_integer(self, context),
            ValueKind::Long => visitor.visit_long(self, context),
            ValueKind::Double => visitor.visit_double(self, context),
            ValueKind::Text => visitor.visit_text(self, context),
        }
    }
}

impl PartialEq for Column {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table && self.name == other.name
    }
}

impl Eq for Column {}

impl Hash for Column {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.table.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl AsRef<Column> for Column {
    fn as_ref(&self) -> &Column {
        self
    }
}

/// Per-kind operations selected by [`Column::accept`].
///
/// Each method is only ever called with a descriptor of its own kind.
pub trait PropertyVisitor {
    type Context;
    type Output;

    fn visit_integer(&mut self, column: &Column, context: Self::Context) -> Self::Output;

    fn visit_long(&mut self, column: &Column, context: Self::Context) -> Self::Output;

    fn visit_double(&mut self, column: &Column, context: Self::Context) -> Self::Output;

    fn visit_text(&mut self, column: &Column, context: Self::Context) -> Self::Output;
}

// ============================================================================
// TYPED PROPERTIES
// ============================================================================

/// Column descriptor typed by the Rust type of its values.
#[derive(Debug, Clone, PartialEq)]
pub struct Property<T: ColumnType> {
    column: Column,
    _type: PhantomData<fn() -> T>,
}

pub type IntegerProperty = Property<i32>;
pub type LongProperty = Property<i64>;
pub type DoubleProperty = Property<f64>;
pub type StringProperty = Property<String>;

impl<T: ColumnType> Property<T> {
    /// Declare a property; usable in `const` items.
    pub const fn new(table: &'static str, name: &'static str) -> Self {
        Self {
            column: Column::new(table, name, T::KIND),
            _type: PhantomData,
        }
    }

    pub fn owned(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            column: Column::owned(table, name, T::KIND),
            _type: PhantomData,
        }
    }

    /// Parse a combined `"table.column"` name.
    pub fn from_qualified(combined: &str) -> RowkeeperResult<Self> {
        Ok(Self {
            column: Column::from_qualified(combined, T::KIND)?,
            _type: PhantomData,
        })
    }

    /// Type an untyped descriptor, failing if its kind differs.
    pub fn try_from_column(column: Column) -> RowkeeperResult<Self> {
        if column.kind() != T::KIND {
            return Err(SchemaError::TypeMismatch {
                column: column.name().to_string(),
                expected: T::KIND,
                found: Some(column.kind()),
            }
            .into());
        }
        Ok(Self {
            column,
            _type: PhantomData,
        })
    }

    pub fn column(&self) -> &Column {
        &self.column
    }

    pub fn with_new_values(&self, table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            column: self.column.with_new_values(table, name),
            _type: PhantomData,
        }
    }
}

/// Pseudo-column counting rows in an aggregate query.
pub const fn count() -> IntegerProperty {
    Property {
        column: Column::pseudo("count", "COUNT(1)", ValueKind::Integer),
        _type: PhantomData,
    }
}

impl<T: ColumnType> Deref for Property<T> {
    type Target = Column;

    fn deref(&self) -> &Column {
        &self.column
    }
}

impl<T: ColumnType> AsRef<Column> for Property<T> {
    fn as_ref(&self) -> &Column {
        &self.column
    }
}

impl<T: ColumnType> From<&Property<T>> for Column {
    fn from(property: &Property<T>) -> Self {
        property.column.clone()
    }
}

impl<T: ColumnType> From<Property<T>> for Column {
    fn from(property: Property<T>) -> Self {
        property.column
    }
}

impl<T: ColumnType> fmt::Display for Property<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.column, f)
    }
}

/// Build a `Vec<Column>` from properties of mixed kinds.
///
/// ```ignore
/// let projection = columns![ID, TITLE, IMPORTANCE];
/// ```
#[macro_export]
macro_rules! columns {
    ($($property:expr),* $(,)?) => {
        vec![$($crate::Column::from(&$property)),*]
    };
}
