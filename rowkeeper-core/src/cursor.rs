//! Result sets and typed cursors

use crate::{
    Column, ColumnType, Property, PropertyVisitor, RowkeeperResult, SchemaError, Value, ValueKind,
};
use std::collections::HashMap;

/// Sequential, positionally indexed result set handed out by a storage
/// engine.
///
/// Positions follow the usual cursor convention: `-1` is before the first
/// row and `count()` is after the last.
pub trait RowSet: Send {
    /// Column names in projection order.
    fn column_names(&self) -> &[String];

    /// Number of rows.
    fn count(&self) -> usize;

    /// Current position.
    fn position(&self) -> isize;

    /// Move to `position`; returns whether it names a row.
    fn move_to_position(&mut self, position: isize) -> bool;

    /// Raw value at `index` of the current row.
    fn value(&self, index: usize) -> RowkeeperResult<&Value>;

    /// Position of a column by name.
    fn column_index(&self, name: &str) -> Option<usize> {
        self.column_names().iter().position(|c| c == name)
    }

    fn get_int(&self, index: usize) -> RowkeeperResult<Value> {
        self.coerced(index, ValueKind::Integer)
    }

    fn get_long(&self, index: usize) -> RowkeeperResult<Value> {
        self.coerced(index, ValueKind::Long)
    }

    fn get_double(&self, index: usize) -> RowkeeperResult<Value> {
        self.coerced(index, ValueKind::Double)
    }

    fn get_string(&self, index: usize) -> RowkeeperResult<Value> {
        self.coerced(index, ValueKind::Text)
    }

    /// Release the underlying handle.
    fn close(&mut self) {}

    #[doc(hidden)]
    fn coerced(&self, index: usize, kind: ValueKind) -> RowkeeperResult<Value> {
        let name = self
            .column_names()
            .get(index)
            .map(String::as_str)
            .unwrap_or_default();
        self.value(index)?.coerce(kind, name)
    }
}

/// A fully materialized result set.
#[derive(Debug, Clone, Default)]
pub struct MaterializedRows {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
    position: isize,
}

impl MaterializedRows {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows,
            position: -1,
        }
    }

    pub fn empty(columns: Vec<String>) -> Self {
        Self::new(columns, Vec::new())
    }
}

impl RowSet for MaterializedRows {
    fn column_names(&self) -> &[String] {
        &self.columns
    }

    fn count(&self) -> usize {
        self.rows.len()
    }

    fn position(&self) -> isize {
        self.position
    }

    fn move_to_position(&mut self, position: isize) -> bool {
        let count = self.rows.len() as isize;
        self.position = position.clamp(-1, count);
        self.position >= 0 && self.position < count
    }

    fn value(&self, index: usize) -> RowkeeperResult<&Value> {
        let row = usize::try_from(self.position)
            .ok()
            .and_then(|p| self.rows.get(p))
            .ok_or(SchemaError::NoCurrentRow)?;
        row.get(index).ok_or_else(|| {
            SchemaError::ColumnNotFound {
                column: format!("#{}", index),
            }
            .into()
        })
    }
}

// ============================================================================
// CURSOR
// ============================================================================

/// Typed view over one result set.
///
/// Column positions are looked up by name once and cached for the lifetime
/// of the wrapped result set. A cursor is consumed by a single reader and
/// then closed; it closes itself when dropped.
pub struct Cursor {
    rows: Option<Box<dyn RowSet>>,
    column_cache: HashMap<String, usize>,
}

impl Cursor {
    pub fn new(rows: Box<dyn RowSet>) -> Self {
        Self {
            rows: Some(rows),
            column_cache: HashMap::new(),
        }
    }

    fn rows(&self) -> RowkeeperResult<&dyn RowSet> {
        self.rows
            .as_deref()
            .ok_or_else(|| SchemaError::CursorClosed.into())
    }

    fn rows_mut(&mut self) -> RowkeeperResult<&mut Box<dyn RowSet>> {
        self.rows
            .as_mut()
            .ok_or_else(|| SchemaError::CursorClosed.into())
    }

    /// Point this cursor at a different result set, dropping the position
    /// cache built for the previous one.
    pub fn repoint(&mut self, rows: Box<dyn RowSet>) {
        self.close();
        self.rows = Some(rows);
    }

    /// Release the result set. Further reads fail with `CursorClosed`.
    pub fn close(&mut self) {
        if let Some(mut rows) = self.rows.take() {
            rows.close();
        }
        self.column_cache.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.rows.is_none()
    }

    pub fn count(&self) -> RowkeeperResult<usize> {
        Ok(self.rows()?.count())
    }

    pub fn position(&self) -> RowkeeperResult<isize> {
        Ok(self.rows()?.position())
    }

    pub fn move_to_first(&mut self) -> RowkeeperResult<bool> {
        Ok(self.rows_mut()?.move_to_position(0))
    }

    pub fn move_to_next(&mut self) -> RowkeeperResult<bool> {
        let rows = self.rows_mut()?;
        let next = rows.position() + 1;
        Ok(rows.move_to_position(next))
    }

    pub fn move_to_position(&mut self, position: isize) -> RowkeeperResult<bool> {
        Ok(self.rows_mut()?.move_to_position(position))
    }

    pub fn is_after_last(&self) -> RowkeeperResult<bool> {
        let rows = self.rows()?;
        Ok(rows.position() >= rows.count() as isize)
    }

    pub fn column_names(&self) -> RowkeeperResult<&[String]> {
        Ok(self.rows()?.column_names())
    }

    /// Cached position of `name` in the result set.
    pub fn column_index(&mut self, name: &str) -> RowkeeperResult<usize> {
        if let Some(index) = self.column_cache.get(name) {
            return Ok(*index);
        }

        let index = self
            .rows()?
            .column_index(name)
            .ok_or_else(|| SchemaError::ColumnNotFound {
                column: name.to_string(),
            })?;
        self.column_cache.insert(name.to_string(), index);
        Ok(index)
    }

    /// Number of cached column positions.
    pub fn cached_columns(&self) -> usize {
        self.column_cache.len()
    }

    /// Read a column of the current row as its descriptor's kind.
    pub fn get_value(&mut self, column: &Column) -> RowkeeperResult<Value> {
        column.accept(&mut CursorReader { cursor: self }, ())
    }

    /// Typed read; NULL is an error.
    pub fn get<T: ColumnType>(&mut self, property: &Property<T>) -> RowkeeperResult<T> {
        self.get_nullable(property)?.ok_or_else(|| {
            SchemaError::NullValue {
                column: property.name().to_string(),
            }
            .into()
        })
    }

    /// Typed read; NULL yields `None`.
    pub fn get_nullable<T: ColumnType>(
        &mut self,
        property: &Property<T>,
    ) -> RowkeeperResult<Option<T>> {
        let value = self.get_value(property.column())?;
        if value.is_null() {
            return Ok(None);
        }
        T::from_value(&value).map(Some).ok_or_else(|| {
            SchemaError::TypeMismatch {
                column: property.name().to_string(),
                expected: T::KIND,
                found: value.kind(),
            }
            .into()
        })
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("closed", &self.is_closed())
            .field("column_cache", &self.column_cache)
            .finish()
    }
}

/// Reads one column off the cursor with the accessor matching its kind.
struct CursorReader<'c> {
    cursor: &'c mut Cursor,
}

impl CursorReader<'_> {
    fn read(
        &mut self,
        column: &Column,
        accessor: fn(&dyn RowSet, usize) -> RowkeeperResult<Value>,
    ) -> RowkeeperResult<Value> {
        let index = self.cursor.column_index(column.name())?;
        accessor(self.cursor.rows()?, index)
    }
}

impl PropertyVisitor for CursorReader<'_> {
    type Context = ();
    type Output = RowkeeperResult<Value>;

    fn visit_integer(&mut self, column: &Column, _: ()) -> Self::Output {
        self.read(column, |rows, index| rows.get_int(index))
    }

    fn visit_long(&mut self, column: &Column, _: ()) -> Self::Output {
        self.read(column, |rows, index| rows.get_long(index))
    }

    fn visit_double(&mut self, column: &Column, _: ()) -> Self::Output {
        self.read(column, |rows, index| rows.get_double(index))
    }

    fn visit_text(&mut self, column: &Column, _: ()) -> Self::Output {
        self.read(column, |rows, index| rows.get_string(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IntegerProperty, LongProperty, StringProperty, DoubleProperty};

    const ID: LongProperty = Property::new("tasks", "_id");
    const TITLE: StringProperty = Property::new("tasks", "title");
    const IMPORTANCE: IntegerProperty = Property::new("tasks", "importance");
    const ESTIMATE: DoubleProperty = Property::new("tasks", "estimate");

    fn sample() -> Cursor {
        let rows = MaterializedRows::new(
            vec![
                "_id".to_string(),
                "title".to_string(),
                "importance".to_string(),
                "estimate".to_string(),
            ],
            vec![
                vec![
                    Value::Long(1),
                    Value::Text("first".into()),
                    Value::Integer(3),
                    Value::Double(1.5),
                ],
                vec![Value::Long(2), Value::Null, Value::Long(4), Value::Integer(2)],
            ],
        );
        Cursor::new(Box::new(rows))
    }

    #[test]
    fn test_typed_reads() {
        let mut cursor = sample();
        assert!(cursor.move_to_first().unwrap());
        assert_eq!(cursor.get(&ID).unwrap(), 1);
        assert_eq!(cursor.get(&TITLE).unwrap(), "first");
        assert_eq!(cursor.get(&IMPORTANCE).unwrap(), 3);
        assert_eq!(cursor.get(&ESTIMATE).unwrap(), 1.5);
    }

    #[test]
    fn test_reads_coerce_to_descriptor_kind() {
        let mut cursor = sample();
        cursor.move_to_position(1).unwrap();
        assert_eq!(cursor.get(&IMPORTANCE).unwrap(), 4);
        assert_eq!(cursor.get(&ESTIMATE).unwrap(), 2.0);
    }

    #[test]
    fn test_null_is_distinct_from_missing() {
        let mut cursor = sample();
        cursor.move_to_position(1).unwrap();
        assert_eq!(cursor.get_nullable(&TITLE).unwrap(), None);
        assert!(matches!(
            cursor.get(&TITLE),
            Err(crate::RowkeeperError::Schema(SchemaError::NullValue { .. }))
        ));

        const MISSING: StringProperty = Property::new("tasks", "missing");
        assert!(matches!(
            cursor.get(&MISSING),
            Err(crate::RowkeeperError::Schema(SchemaError::ColumnNotFound { .. }))
        ));
    }

    #[test]
    fn test_column_cache_is_stable() {
        let mut cursor = sample();
        cursor.move_to_first().unwrap();
        let first = cursor.column_index("title").unwrap();
        let again = cursor.column_index("title").unwrap();
        assert_eq!(first, again);
        assert_eq!(cursor.cached_columns(), 1);
    }

    #[test]
    fn test_missing_column_not_cached() {
        let mut cursor = sample();
        assert!(cursor.column_index("nope").is_err());
        assert_eq!(cursor.cached_columns(), 0);
    }

    #[test]
    fn test_repoint_discards_cache() {
        let mut cursor = sample();
        cursor.column_index("title").unwrap();

        let reshaped = MaterializedRows::new(
            vec!["title".to_string()],
            vec![vec![Value::Text("solo".into())]],
        );
        cursor.repoint(Box::new(reshaped));
        assert_eq!(cursor.cached_columns(), 0);
        assert_eq!(cursor.column_index("title").unwrap(), 0);
        cursor.move_to_first().unwrap();
        assert_eq!(cursor.get(&TITLE).unwrap(), "solo");
    }

    #[test]
    fn test_iteration_and_close() {
        let mut cursor = sample();
        let mut seen = Vec::new();
        while cursor.move_to_next().unwrap() {
            seen.push(cursor.get(&ID).unwrap());
        }
        assert_eq!(seen, vec![1, 2]);
        assert!(cursor.is_after_last().unwrap());

        cursor.close();
        assert!(cursor.is_closed());
        assert!(matches!(
            cursor.get(&ID),
            Err(crate::RowkeeperError::Schema(SchemaError::CursorClosed))
        ));
    }

    #[test]
    fn test_read_before_first_row() {
        let mut cursor = sample();
        assert!(matches!(
            cursor.get(&ID),
            Err(crate::RowkeeperError::Schema(SchemaError::NoCurrentRow))
        ));
    }
}
