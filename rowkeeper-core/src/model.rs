//! Row value container with dirty tracking
//!
//! A [`Model`] holds up to three overlapping sources for one row:
//!
//! 1. values the caller explicitly set (the set-map, pending write),
//! 2. values read from the database (the read-map),
//! 3. schema defaults from the [`Table`].
//!
//! Reads resolve in that order. A column is dirty iff it is in the set-map,
//! and setting a column to the value it already reads as leaves it clean, so
//! a save writes only what actually changed.

use crate::{
    Column, ColumnType, Cursor, Property, PropertyVisitor, RowkeeperResult, SchemaError, Table,
    Value, ValueMap, NO_ID,
};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone, Default)]
struct ModelState {
    read: Option<ValueMap>,
    set: Option<ValueMap>,
}

impl ModelState {
    /// Set-map, then read-map, then defaults.
    fn resolve<'a>(&'a self, defaults: &'a ValueMap, name: &str) -> Option<&'a Value> {
        self.set
            .as_ref()
            .and_then(|set| set.get(name))
            .or_else(|| self.read.as_ref().and_then(|read| read.get(name)))
            .or_else(|| defaults.get(name))
    }

    fn merged(&self, defaults: &ValueMap) -> ValueMap {
        let mut merged = defaults.clone();
        if let Some(read) = &self.read {
            merged.put_all(read);
        }
        if let Some(set) = &self.set {
            merged.put_all(set);
        }
        merged
    }

    /// Id from the set-map, then the read-map.
    fn id(&self, name: &str) -> i64 {
        self.set
            .as_ref()
            .and_then(|set| set.get(name))
            .or_else(|| self.read.as_ref().and_then(|read| read.get(name)))
            .and_then(|value| value.coerce(crate::ValueKind::Long, name).ok())
            .and_then(|value| i64::from_value(&value))
            .unwrap_or(NO_ID)
    }

    /// Whether writing `value` to `name` is a change worth persisting.
    fn should_save(&self, name: &str, value: &Value) -> bool {
        // Already pending: overwrite it.
        if self.set.as_ref().is_some_and(|set| set.contains_key(name)) {
            return true;
        }
        match self.read.as_ref().and_then(|read| read.get(name)) {
            Some(current) => current != value,
            None => true,
        }
    }
}

/// One row of one table.
///
/// All operations take `&self` and are atomic with respect to each other
/// through a per-instance lock, so a model can be shared across threads
/// behind an `Arc`. Two models never contend.
pub struct Model {
    table: Arc<Table>,
    state: RwLock<ModelState>,
}

impl Model {
    /// Empty row; only schema defaults apply.
    pub fn new(table: Arc<Table>) -> Self {
        Self {
            table,
            state: RwLock::new(ModelState::default()),
        }
    }

    /// Row read from the cursor's current position.
    pub fn from_cursor(
        table: Arc<Table>,
        cursor: &mut Cursor,
        columns: &[Column],
    ) -> RowkeeperResult<Self> {
        let model = Self::new(table);
        model.read_from(cursor, columns)?;
        Ok(model)
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    // The maps hold no cross-entry invariant a panicking writer could break.
    fn state(&self) -> RwLockReadGuard<'_, ModelState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&self) -> RwLockWriteGuard<'_, ModelState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // === Reads ===

    /// Effective value of a column, NULL included.
    pub fn get_value(&self, column: &Column) -> RowkeeperResult<Value> {
        let state = self.state();
        state
            .resolve(self.table.defaults(), column.name())
            .cloned()
            .ok_or_else(|| {
                SchemaError::FieldNotRead {
                    column: column.name().to_string(),
                }
                .into()
            })
    }

    /// Typed read; NULL is an error.
    pub fn get<T: ColumnType>(&self, property: &Property<T>) -> RowkeeperResult<T> {
        self.get_nullable(property)?.ok_or_else(|| {
            SchemaError::NullValue {
                column: property.name().to_string(),
            }
            .into()
        })
    }

    /// Typed read; NULL yields `None`.
    pub fn get_nullable<T: ColumnType>(&self, property: &Property<T>) -> RowkeeperResult<Option<T>> {
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

    /// Whether any tier holds a value for the column.
    pub fn contains(&self, column: &Column) -> bool {
        self.state()
            .resolve(self.table.defaults(), column.name())
            .is_some()
    }

    /// Row id from the set- or read-map, [`NO_ID`] when neither has one.
    pub fn id(&self) -> i64 {
        self.state().id(self.table.id_column_name())
    }

    // === Writes ===

    /// Change-detected typed write.
    pub fn set<T: ColumnType>(&self, property: &Property<T>, value: T) {
        self.store(property.name(), value.into_value());
    }

    /// Change-detected write of NULL.
    pub fn set_null(&self, column: &Column) {
        self.store(column.name(), Value::Null);
    }

    /// Change-detected untyped write, converted to the column's kind.
    pub fn set_value(&self, column: &Column, value: Value) -> RowkeeperResult<()> {
        let mut staged = ValueMap::new();
        column.accept(&mut ValueSaver { target: &mut staged }, value)?;
        if let Some(value) = staged.remove(column.name()) {
            self.store(column.name(), value);
        }
        Ok(())
    }

    fn store(&self, name: &str, value: Value) {
        let mut state = self.state_mut();
        if !state.should_save(name, &value) {
            return;
        }
        state.set.get_or_insert_with(ValueMap::new).put(name, value);
    }

    /// Set the row id; [`NO_ID`] removes any pending id instead.
    pub fn set_id(&self, id: i64) {
        let name = self.table.id_column_name();
        let mut state = self.state_mut();
        let set = state.set.get_or_insert_with(ValueMap::new);
        if id == NO_ID {
            set.remove(name);
        } else {
            set.put(name, id);
        }
    }

    /// Drop a pending edit, reverting the column to its read or default value.
    pub fn clear_field(&self, column: &Column) {
        if let Some(set) = self.state_mut().set.as_mut() {
            set.remove(column.name());
        }
    }

    /// Drop read and set values; only defaults remain.
    pub fn clear(&self) {
        let mut state = self.state_mut();
        state.read = None;
        state.set = None;
    }

    // === Snapshots ===

    /// Defaults, then read values, then set values: what a save would
    /// persist for a new row right now.
    pub fn merged_values(&self) -> ValueMap {
        self.state().merged(self.table.defaults())
    }

    /// Pending edits only.
    pub fn dirty_values(&self) -> ValueMap {
        self.state().set.clone().unwrap_or_default()
    }

    /// Values last read from the database.
    pub fn database_values(&self) -> ValueMap {
        self.state().read.clone().unwrap_or_default()
    }

    /// Alias of [`Model::dirty_values`].
    pub fn set_values(&self) -> ValueMap {
        self.dirty_values()
    }

    /// The row id and the values a save would write, taken under one lock.
    ///
    /// A row without an id yields its merged values, any other row its
    /// pending edits. The id column is never part of the values.
    pub fn write_snapshot(&self) -> (i64, ValueMap) {
        let state = self.state();
        let name = self.table.id_column_name();
        let id = state.id(name);
        let mut values = if id == NO_ID {
            state.merged(self.table.defaults())
        } else {
            state.set.clone().unwrap_or_default()
        };
        values.remove(name);
        (id, values)
    }

    pub fn is_dirty(&self, column: &Column) -> bool {
        self.state()
            .set
            .as_ref()
            .is_some_and(|set| set.contains_key(column.name()))
    }

    pub fn has_changes(&self) -> bool {
        self.state().set.as_ref().is_some_and(|set| !set.is_empty())
    }

    // === Reading rows ===

    /// Read `columns` off the cursor's current row into the read-map and
    /// discard pending edits.
    ///
    /// Every column is read before the model changes, so a failed read
    /// leaves the model as it was.
    pub fn read_from(&self, cursor: &mut Cursor, columns: &[Column]) -> RowkeeperResult<()> {
        let mut fresh = ValueMap::new();
        for column in columns {
            let value = cursor.get_value(column)?;
            column.accept(&mut ValueSaver { target: &mut fresh }, value)?;
        }

        let mut state = self.state_mut();
        state.read.get_or_insert_with(ValueMap::new).put_all(&fresh);
        state.set = None;
        Ok(())
    }

    /// Mark everything pending as persisted: set values move into the
    /// read-map.
    pub fn mark_saved(&self) {
        let mut state = self.state_mut();
        if let Some(set) = state.set.take() {
            state.read.get_or_insert_with(ValueMap::new).put_all(&set);
        }
    }
}

impl Clone for Model {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            state: RwLock::new(self.state().clone()),
        }
    }
}

impl PartialEq for Model {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        self.table.same_row_type(&other.table) && self.merged_values() == other.merged_values()
    }
}

impl std::fmt::Debug for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("Model")
            .field("table", &self.table.name())
            .field("read", &state.read)
            .field("set", &state.set)
            .finish()
    }
}

/// Stores a value under a column's name after converting it to the column's
/// kind.
struct ValueSaver<'a> {
    target: &'a mut ValueMap,
}

impl ValueSaver<'_> {
    fn save(&mut self, column: &Column, value: Value) -> RowkeeperResult<()> {
        let value = value.coerce_checked(column.kind(), column.name())?;
        self.target.put(column.name(), value);
        Ok(())
    }
}

impl PropertyVisitor for ValueSaver<'_> {
    type Context = Value;
    type Output = RowkeeperResult<()>;

    fn visit_integer(&mut self, column: &Column, value: Value) -> Self::Output {
        self.save(column, value)
    }

    fn visit_long(&mut self, column: &Column, value: Value) -> Self::Output {
        self.save(column, value)
    }

    fn visit_double(&mut self, column: &Column, value: Value) -> Self::Output {
        self.save(column, value)
    }

    fn visit_text(&mut self, column: &Column, value: Value) -> Self::Output {
        self.save(column, value)
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// An application row type backed by a [`Model`].
///
/// Typed wrappers implement this to expose named accessors while DAOs keep
/// working against the underlying model.
pub trait Record: Send + Sync + Sized {
    fn from_model(model: Model) -> Self;

    fn model(&self) -> &Model;
}

impl Record for Model {
    fn from_model(model: Model) -> Self {
        model
    }

    fn model(&self) -> &Model {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IntegerProperty, LongProperty, MaterializedRows, StringProperty};

    struct Task;

    const ID: LongProperty = Property::new("tasks", "_id");
    const TITLE: StringProperty = Property::new("tasks", "title");
    const IMPORTANCE: IntegerProperty = Property::new("tasks", "importance");
    const NOTES: StringProperty = Property::new("tasks", "notes");

    fn table() -> Arc<Table> {
        Table::builder::<Task>("tasks")
            .column(&ID)
            .column(&TITLE)
            .column(&IMPORTANCE)
            .column(&NOTES)
            .default_value(&TITLE, "x".to_string())
            .build()
            .unwrap()
    }

    fn cursor(id: i64, title: &str, importance: i32) -> Cursor {
        let rows = MaterializedRows::new(
            vec!["_id".into(), "title".into(), "importance".into()],
            vec![vec![
                Value::Long(id),
                Value::Text(title.into()),
                Value::Integer(importance),
            ]],
        );
        let mut cursor = Cursor::new(Box::new(rows));
        cursor.move_to_first().unwrap();
        cursor
    }

    #[test]
    fn test_precedence_set_read_default() {
        let model = Model::new(table());
        assert_eq!(model.get(&TITLE).unwrap(), "x");

        model
            .read_from(&mut cursor(5, "read", 1), &crate::columns![ID, TITLE, IMPORTANCE])
            .unwrap();
        assert_eq!(model.get(&TITLE).unwrap(), "read");

        model.set(&TITLE, "set".to_string());
        assert_eq!(model.get(&TITLE).unwrap(), "set");
    }

    #[test]
    fn test_unread_column_is_an_error() {
        let model = Model::new(table());
        assert!(matches!(
            model.get(&NOTES),
            Err(crate::RowkeeperError::Schema(SchemaError::FieldNotRead { .. }))
        ));
    }

    #[test]
    fn test_null_is_not_missing() {
        let model = Model::new(table());
        model.set_null(&NOTES);
        assert_eq!(model.get_nullable(&NOTES).unwrap(), None);
        assert!(matches!(
            model.get(&NOTES),
            Err(crate::RowkeeperError::Schema(SchemaError::NullValue { .. }))
        ));
    }

    #[test]
    fn test_unchanged_write_stays_clean() {
        let model = Model::from_cursor(
            table(),
            &mut cursor(5, "same", 1),
            &crate::columns![ID, TITLE, IMPORTANCE],
        )
        .unwrap();

        model.set(&TITLE, "same".to_string());
        model.set(&IMPORTANCE, 1);
        assert!(model.dirty_values().is_empty());
        assert!(!model.has_changes());

        model.set(&IMPORTANCE, 2);
        assert!(model.is_dirty(IMPORTANCE.column()));
        assert_eq!(model.dirty_values().len(), 1);
    }

    #[test]
    fn test_write_equal_to_default_is_dirty() {
        // The default tier does not take part in change detection.
        let model = Model::new(table());
        model.set(&TITLE, "x".to_string());
        assert!(model.is_dirty(TITLE.column()));
    }

    #[test]
    fn test_clear_field_reverts() {
        let model = Model::from_cursor(
            table(),
            &mut cursor(5, "read", 1),
            &crate::columns![ID, TITLE, IMPORTANCE],
        )
        .unwrap();
        model.set(&TITLE, "edit".to_string());
        model.clear_field(TITLE.column());
        assert_eq!(model.get(&TITLE).unwrap(), "read");
        assert!(!model.is_dirty(TITLE.column()));
    }

    #[test]
    fn test_clear_drops_read_and_set() {
        let model = Model::from_cursor(
            table(),
            &mut cursor(5, "read", 1),
            &crate::columns![ID, TITLE, IMPORTANCE],
        )
        .unwrap();
        model.set(&IMPORTANCE, 9);
        model.clear();
        assert_eq!(model.get(&TITLE).unwrap(), "x");
        assert!(model.get(&IMPORTANCE).is_err());
        assert_eq!(model.id(), NO_ID);
    }

    #[test]
    fn test_id_sentinel() {
        let model = Model::new(table());
        assert_eq!(model.id(), NO_ID);

        model.set_id(12);
        assert_eq!(model.id(), 12);
        assert!(model.is_dirty(ID.column()));

        model.set_id(NO_ID);
        assert_eq!(model.id(), NO_ID);
        assert!(!model.is_dirty(ID.column()));
    }

    #[test]
    fn test_write_snapshot() {
        let model = Model::new(table());
        model.set(&IMPORTANCE, 4);
        let (id, values) = model.write_snapshot();
        assert_eq!(id, NO_ID);
        assert_eq!(values.get("title"), Some(&Value::Text("x".into())));
        assert_eq!(values.get("importance"), Some(&Value::Integer(4)));

        model.set_id(9);
        model.mark_saved();
        model.set(&TITLE, "edit".to_string());
        let (id, values) = model.write_snapshot();
        assert_eq!(id, 9);
        assert_eq!(values.len(), 1);
        assert!(!values.contains_key("_id"));
        assert_eq!(values.get("title"), Some(&Value::Text("edit".into())));
    }

    #[test]
    fn test_read_discards_pending_edits() {
        let model = Model::new(table());
        model.set(&IMPORTANCE, 4);
        model
            .read_from(&mut cursor(3, "fresh", 1), &crate::columns![ID, TITLE])
            .unwrap();
        assert!(model.dirty_values().is_empty());
        assert_eq!(model.id(), 3);
        // importance was not re-read and its edit is gone
        assert!(model.get(&IMPORTANCE).is_err());
    }

    #[test]
    fn test_failed_read_leaves_model_untouched() {
        let model = Model::new(table());
        model.set(&IMPORTANCE, 4);
        let result = model.read_from(&mut cursor(3, "fresh", 1), &crate::columns![ID, NOTES]);
        assert!(result.is_err());
        assert_eq!(model.get(&IMPORTANCE).unwrap(), 4);
        assert_eq!(model.id(), NO_ID);
    }

    #[test]
    fn test_merged_values() {
        let model = Model::new(table());
        model.set(&TITLE, "y".to_string());
        let merged = model.merged_values();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged.get("title"), Some(&Value::Text("y".into())));
    }

    #[test]
    fn test_set_value_converts_kind() {
        let model = Model::new(table());
        model
            .set_value(IMPORTANCE.column(), Value::Text("7".into()))
            .unwrap();
        assert_eq!(model.get(&IMPORTANCE).unwrap(), 7);
        assert!(model
            .set_value(IMPORTANCE.column(), Value::Text("high".into()))
            .is_err());
    }

    #[test]
    fn test_set_value_rejects_values_that_do_not_fit() {
        let model = Model::new(table());
        let result = model.set_value(IMPORTANCE.column(), Value::Long(4_294_967_297));
        assert!(matches!(
            result,
            Err(crate::RowkeeperError::Schema(SchemaError::TypeMismatch { .. }))
        ));
        assert!(!model.has_changes());
    }

    #[test]
    fn test_equality_uses_merged_values() {
        let a = Model::new(table());
        let b = Model::new(table());
        assert_eq!(a, b);

        a.set(&TITLE, "y".to_string());
        assert_ne!(a, b);
        b.set(&TITLE, "y".to_string());
        assert_eq!(a, b);

        struct Other;
        let other_table = Table::builder::<Other>("tasks")
            .column(&TITLE)
            .default_value(&TITLE, "x".to_string())
            .build()
            .unwrap();
        assert_ne!(Model::new(table()), Model::new(other_table));
    }

    #[test]
    fn test_mark_saved_moves_edits_to_read() {
        let model = Model::new(table());
        model.set(&TITLE, "y".to_string());
        model.mark_saved();
        assert!(model.dirty_values().is_empty());
        assert_eq!(model.get(&TITLE).unwrap(), "y");
        model.set(&TITLE, "y".to_string());
        assert!(!model.has_changes());
    }

    #[test]
    fn test_shared_across_threads() {
        let model = Arc::new(Model::new(table()));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let model = Arc::clone(&model);
                std::thread::spawn(move || model.set(&IMPORTANCE, i))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(model.is_dirty(IMPORTANCE.column()));
    }
}
