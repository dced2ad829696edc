//! Rowkeeper Test Utilities
//!
//! Shared test infrastructure for the rowkeeper workspace:
//! - Proptest generators for values, kinds and row contents
//! - Fixture schemas, records and in-memory databases
//! - Assertions for rowkeeper-specific error variants

// Re-export core types for convenience
pub use rowkeeper_core::{
    Column, ConfigError, Cursor, DoubleProperty, IntegerProperty, LongProperty, Model, Property,
    Record, RowkeeperError, RowkeeperResult, SchemaError, StorageError, StoreConfig,
    StringProperty, Table, Value, ValueKind, ValueMap, NO_ID,
};
pub use rowkeeper_storage::{
    Dao, Database, FetchOptions, InMemoryConnector, InMemoryEngine, SaveOutcome,
};

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for rowkeeper value types.

    use super::*;
    use proptest::prelude::*;

    /// Generate any value kind.
    pub fn arb_value_kind() -> impl Strategy<Value = ValueKind> {
        prop_oneof![
            Just(ValueKind::Integer),
            Just(ValueKind::Long),
            Just(ValueKind::Double),
            Just(ValueKind::Text),
        ]
    }

    /// Generate a non-null value of `kind`.
    pub fn arb_value_of(kind: ValueKind) -> BoxedStrategy<Value> {
        match kind {
            ValueKind::Integer => any::<i32>().prop_map(Value::Integer).boxed(),
            ValueKind::Long => any::<i64>().prop_map(Value::Long).boxed(),
            ValueKind::Double => (-1.0e9f64..1.0e9).prop_map(Value::Double).boxed(),
            ValueKind::Text => arb_text().prop_map(Value::Text).boxed(),
        }
    }

    /// Generate any value, NULL included.
    pub fn arb_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            1 => Just(Value::Null),
            8 => arb_value_kind().prop_flat_map(arb_value_of),
        ]
    }

    /// Text free of quotes and backslashes.
    pub fn arb_text() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 _.,-]{0,24}"
    }

    /// Text weighted towards characters that need escaping in a literal.
    pub fn arb_hostile_text() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop_oneof![
                Just('\''),
                Just('\\'),
                Just('%'),
                Just(' '),
                prop::char::range('a', 'z'),
            ],
            0..24,
        )
        .prop_map(|chars| chars.into_iter().collect())
    }

    /// Generate a task title.
    pub fn arb_title() -> impl Strategy<Value = String> {
        "[a-z]{1,12}( [a-z]{1,12}){0,3}"
    }

    /// Generate a task importance level.
    pub fn arb_importance() -> impl Strategy<Value = i32> {
        0..4i32
    }

    /// Generate a partial set of task values, keyed by bare column name.
    pub fn arb_task_values() -> impl Strategy<Value = ValueMap> {
        (
            proptest::option::of(arb_title()),
            proptest::option::of(arb_importance()),
            proptest::option::of(0.0f64..100.0),
        )
            .prop_map(|(title, importance, estimate)| {
                let mut values = ValueMap::new();
                if let Some(title) = title {
                    values.put("title", title);
                }
                if let Some(importance) = importance {
                    values.put("importance", importance);
                }
                if let Some(estimate) = estimate {
                    values.put("estimate", estimate);
                }
                values
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built schemas, records and databases for common test scenarios.

    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Arc;

    pub const TASK_ID: LongProperty = Property::new("tasks", "_id");
    pub const TITLE: StringProperty = Property::new("tasks", "title");
    pub const IMPORTANCE: IntegerProperty = Property::new("tasks", "importance");
    pub const ESTIMATE: DoubleProperty = Property::new("tasks", "estimate");
    pub const DUE: LongProperty = Property::new("tasks", "due");

    /// Default importance of a new task.
    pub const DEFAULT_IMPORTANCE: i32 = 2;

    static TASKS: Lazy<Arc<Table>> = Lazy::new(|| {
        Table::builder::<Task>("tasks")
            .column(&TASK_ID)
            .column(&TITLE)
            .column(&IMPORTANCE)
            .column(&ESTIMATE)
            .column(&DUE)
            .default_value(&TITLE, String::new())
            .default_value(&IMPORTANCE, DEFAULT_IMPORTANCE)
            .default_value(&ESTIMATE, 0.0)
            .default_null(&DUE)
            .build()
            .expect("task schema is valid")
    });

    pub const NOTE_VALUE: StringProperty = Property::new("notes", "value");

    static NOTES: Lazy<Arc<Table>> = Lazy::new(|| {
        Table::builder::<Model>("notes")
            .column(&NOTE_VALUE)
            .default_value(&NOTE_VALUE, "x".to_string())
            .build()
            .expect("note schema is valid")
    });

    /// The task schema, shared by every task record.
    pub fn task_table() -> Arc<Table> {
        Arc::clone(&TASKS)
    }

    /// Every task column, id first.
    pub fn task_columns() -> Vec<Column> {
        TASKS.columns().to_vec()
    }

    /// One text column `value` defaulting to `"x"`.
    pub fn note_table() -> Arc<Table> {
        Arc::clone(&NOTES)
    }

    /// Task record with typed accessors.
    #[derive(Debug, Clone, PartialEq)]
    pub struct Task(Model);

    impl Record for Task {
        fn from_model(model: Model) -> Self {
            Task(model)
        }

        fn model(&self) -> &Model {
            &self.0
        }
    }

    impl Task {
        pub fn new() -> Self {
            Task(Model::new(task_table()))
        }

        pub fn id(&self) -> i64 {
            self.0.id()
        }

        pub fn title(&self) -> RowkeeperResult<String> {
            self.0.get(&TITLE)
        }

        pub fn set_title(&self, title: impl Into<String>) {
            self.0.set(&TITLE, title.into());
        }

        pub fn importance(&self) -> RowkeeperResult<i32> {
            self.0.get(&IMPORTANCE)
        }

        pub fn set_importance(&self, importance: i32) {
            self.0.set(&IMPORTANCE, importance);
        }

        pub fn estimate(&self) -> RowkeeperResult<f64> {
            self.0.get(&ESTIMATE)
        }

        pub fn due(&self) -> RowkeeperResult<Option<i64>> {
            self.0.get_nullable(&DUE)
        }

        pub fn set_due(&self, due: Option<i64>) {
            match due {
                Some(due) => self.0.set(&DUE, due),
                None => self.0.set_null(&DUE),
            }
        }
    }

    impl Default for Task {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Writable in-memory database with the task and note tables created.
    pub fn memory_database() -> Database {
        memory_database_with(StoreConfig::default()).0
    }

    /// Like [`memory_database`], also returning the engine for direct
    /// inspection.
    pub fn memory_database_with(config: StoreConfig) -> (Database, InMemoryEngine) {
        let engine = InMemoryEngine::new();
        engine.create_table(&TASKS).expect("fresh engine");
        engine.create_table(&NOTES).expect("fresh engine");
        let db = Database::open(InMemoryConnector::with_engine(engine.clone()), config)
            .expect("in-memory database opens");
        (db, engine)
    }

    pub fn task_dao() -> Dao<Task> {
        Dao::new(task_table())
    }

    /// Insert a task titled `title` and return it with its id assigned.
    pub fn saved_task(db: &Database, title: &str) -> Task {
        let task = Task::new();
        task.set_title(title);
        let outcome = task_dao().save(db, &task).expect("save succeeds");
        assert!(outcome.is_success(), "Expected saved task, got: {:?}", outcome);
        task
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for rowkeeper results.

    use super::*;

    /// Assert that a RowkeeperResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &RowkeeperResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a RowkeeperResult is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &RowkeeperResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    #[track_caller]
    pub fn assert_schema_error<T: std::fmt::Debug>(result: &RowkeeperResult<T>) {
        match result {
            Err(RowkeeperError::Schema(_)) => {}
            other => panic!("Expected Schema error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &RowkeeperResult<T>) {
        match result {
            Err(RowkeeperError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &RowkeeperResult<T>) {
        match result {
            Err(RowkeeperError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a read failed because the column was never read.
    #[track_caller]
    pub fn assert_field_not_read<T: std::fmt::Debug>(result: &RowkeeperResult<T>, column: &str) {
        match result {
            Err(RowkeeperError::Schema(SchemaError::FieldNotRead { column: c })) => {
                assert_eq!(c, column, "Wrong column in FieldNotRead error");
            }
            other => panic!("Expected FieldNotRead for {}, got: {:?}", column, other),
        }
    }

    /// Assert that a typed read failed on a NULL value.
    #[track_caller]
    pub fn assert_null_value<T: std::fmt::Debug>(result: &RowkeeperResult<T>) {
        match result {
            Err(RowkeeperError::Schema(SchemaError::NullValue { .. })) => {}
            other => panic!("Expected NullValue error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_not_open<T: std::fmt::Debug>(result: &RowkeeperResult<T>) {
        match result {
            Err(RowkeeperError::Storage(StorageError::NotOpen)) => {}
            other => panic!("Expected NotOpen error, got: {:?}", other),
        }
    }

    /// Assert that a save reported success.
    #[track_caller]
    pub fn assert_saved(result: &RowkeeperResult<SaveOutcome>) {
        match result {
            Ok(outcome) if outcome.is_success() => {}
            other => panic!("Expected successful save, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_generated_values_match_kind(
            (kind, value) in generators::arb_value_kind()
                .prop_flat_map(|k| (Just(k), generators::arb_value_of(k)))
        ) {
            prop_assert_eq!(value.kind(), Some(kind));
        }

        #[test]
        fn prop_generated_task_values_fit_schema(values in generators::arb_task_values()) {
            let table = fixtures::task_table();
            for (column, _) in &values {
                prop_assert!(table.column(column).is_some());
            }
        }
    }

    #[test]
    fn test_task_fixture_defaults() {
        let task = fixtures::Task::new();
        assert_eq!(task.importance().unwrap(), fixtures::DEFAULT_IMPORTANCE);
        assert_eq!(task.due().unwrap(), None);
        assert_eq!(task.id(), NO_ID);
    }

    #[test]
    fn test_saved_task_has_id() {
        let db = fixtures::memory_database();
        let task = fixtures::saved_task(&db, "fixture");
        assert!(task.id() > 0);
    }
}
