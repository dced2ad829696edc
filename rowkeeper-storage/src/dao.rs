//! Generic data access objects

use crate::filter::id_filter;
use crate::{Database, Query};
use rowkeeper_core::{
    count, Column, Cursor, Model, Record, RowkeeperResult, Table, NO_ID,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Builds one record from the cursor's current row.
///
/// A failing factory fails only the fetch that called it.
pub type RowFactory<R> = fn(Arc<Table>, &mut Cursor, &[Column]) -> RowkeeperResult<R>;

/// Factory reading a plain [`Model`] and wrapping it with
/// [`Record::from_model`].
pub fn default_factory<R: Record>(
    table: Arc<Table>,
    cursor: &mut Cursor,
    columns: &[Column],
) -> RowkeeperResult<R> {
    Model::from_cursor(table, cursor, columns).map(R::from_model)
}

/// Optional clauses for [`Dao::fetch_many`]. Clause text is passed through
/// unchanged; literals from untrusted input must be sanitized by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
    pub filter: Option<String>,
    pub group_by: Option<String>,
    pub having: Option<String>,
    pub order_by: Option<String>,
    pub limit: Option<String>,
    pub distinct: bool,
}

impl FetchOptions {
    pub fn new() -> Self {
        Self::default()
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

/// Result of [`Dao::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// New row written under `id`.
    Inserted { id: i64 },
    /// Pending edits written to an existing row.
    Updated { rows: usize },
    /// Nothing pending; no write issued.
    Unchanged,
    /// The row's id matched nothing, typically because it was deleted.
    Stale,
    /// The engine accepted the insert but returned no usable id.
    Rejected,
}

impl SaveOutcome {
    /// Success as the presentation layer sees it.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            SaveOutcome::Inserted { .. } | SaveOutcome::Updated { .. } | SaveOutcome::Unchanged
        )
    }
}

/// Fetch, save and delete for one row type.
///
/// Holds no state beyond the schema and the factory, so one instance can
/// serve every caller of its table.
pub struct Dao<R: Record = Model> {
    table: Arc<Table>,
    factory: RowFactory<R>,
}

impl<R: Record> Dao<R> {
    pub fn new(table: Arc<Table>) -> Self {
        Self::with_factory(table, default_factory::<R>)
    }

    pub fn with_factory(table: Arc<Table>, factory: RowFactory<R>) -> Self {
        Self { table, factory }
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    // === Fetching ===

    /// The row with `id`, or `None` when no row has it.
    pub fn fetch_by_id(
        &self,
        db: &Database,
        id: i64,
        columns: &[Column],
    ) -> RowkeeperResult<Option<R>> {
        let query = Query::select(self.table.name(), columns)
            .with_filter(id_filter(self.table.id_property(), id))
            .with_limit("1");
        let mut cursor = self.query(db, &query)?;

        if !cursor.move_to_first()? {
            debug!(table = %self.table.name(), id = id, "No row with id");
            return Ok(None);
        }
        let record = (self.factory)(Arc::clone(&self.table), &mut cursor, columns)?;
        cursor.close();
        Ok(Some(record))
    }

    /// Projection of `columns` under optional clauses. The configured
    /// default limit applies when `options` gives none.
    pub fn fetch_many(
        &self,
        db: &Database,
        columns: &[Column],
        options: &FetchOptions,
    ) -> RowkeeperResult<Cursor> {
        let limit = options.limit.clone().or_else(|| {
            db.config()
                .default_fetch_limit
                .map(|limit| limit.to_string())
        });

        let query = Query {
            filter: options.filter.clone(),
            group_by: options.group_by.clone(),
            having: options.having.clone(),
            order_by: options.order_by.clone(),
            limit,
            distinct: options.distinct,
            ..Query::select(self.table.name(), columns)
        };
        self.query(db, &query)
    }

    pub fn fetch(&self, db: &Database, columns: &[Column], filter: &str) -> RowkeeperResult<Cursor> {
        self.fetch_many(db, columns, &FetchOptions::new().with_filter(filter))
    }

    pub fn fetch_ordered(
        &self,
        db: &Database,
        columns: &[Column],
        filter: &str,
        order_by: &str,
    ) -> RowkeeperResult<Cursor> {
        self.fetch_many(
            db,
            columns,
            &FetchOptions::new()
                .with_filter(filter)
                .with_order_by(order_by),
        )
    }

    /// Every row of a fetch, built through the factory.
    pub fn fetch_all(
        &self,
        db: &Database,
        columns: &[Column],
        options: &FetchOptions,
    ) -> RowkeeperResult<Vec<R>> {
        let mut cursor = self.fetch_many(db, columns, options)?;
        let mut records = Vec::with_capacity(cursor.count()?);
        while cursor.move_to_next()? {
            records.push((self.factory)(Arc::clone(&self.table), &mut cursor, columns)?);
        }
        cursor.close();
        Ok(records)
    }

    /// Run a caller-built query.
    pub fn query(&self, db: &Database, query: &Query) -> RowkeeperResult<Cursor> {
        debug!(table = %query.table, filter = ?query.filter, "Issuing query");
        let rows = db.engine()?.query(query)?;
        Ok(Cursor::new(rows))
    }

    /// Number of rows matching `filter`.
    pub fn count(&self, db: &Database, filter: Option<&str>) -> RowkeeperResult<usize> {
        let counter = count();
        let mut query = Query::select(self.table.name(), &[counter.column().clone()]);
        query.filter = filter.map(str::to_string);

        let mut cursor = self.query(db, &query)?;
        if !cursor.move_to_first()? {
            return Ok(0);
        }
        let rows = cursor.get(&counter)?;
        Ok(usize::try_from(rows).unwrap_or(0))
    }

    // === Writing ===

    /// Persist pending changes.
    ///
    /// A record without an id is inserted with its merged values and gets
    /// the new id. A record with an id writes only its dirty values, and
    /// issues no write at all when there are none.
    pub fn save(&self, db: &Database, record: &R) -> RowkeeperResult<SaveOutcome> {
        let model = record.model();
        let engine = db.engine()?;
        let table = self.table.name();
        let id_column = self.table.id_column_name();
        let (id, values) = model.write_snapshot();

        if id == NO_ID {
            let new_id = engine.insert(table, id_column, &values)?;
            if new_id <= 0 {
                warn!(table = %table, id = new_id, "Insert returned no usable id");
                return Ok(SaveOutcome::Rejected);
            }
            model.set_id(new_id);
            model.mark_saved();
            debug!(table = %table, id = new_id, "Inserted row");
            return Ok(SaveOutcome::Inserted { id: new_id });
        }

        if values.is_empty() {
            model.mark_saved();
            return Ok(SaveOutcome::Unchanged);
        }

        let filter = id_filter(self.table.id_property(), id);
        let rows = engine.update(table, &values, Some(filter.as_str()))?;
        if rows == 0 {
            debug!(table = %table, id = id, "Update matched no row");
            return Ok(SaveOutcome::Stale);
        }
        model.mark_saved();
        debug!(table = %table, id = id, rows = rows, "Updated row");
        Ok(SaveOutcome::Updated { rows })
    }

    /// Delete the row with `id`; whether a row was removed.
    pub fn delete(&self, db: &Database, id: i64) -> RowkeeperResult<bool> {
        let filter = id_filter(self.table.id_property(), id);
        let rows = db.engine()?.delete(self.table.name(), Some(filter.as_str()))?;
        debug!(table = %self.table.name(), id = id, rows = rows, "Deleted by id");
        Ok(rows > 0)
    }

    /// Delete every row matching `filter`; returns rows removed.
    pub fn delete_where(&self, db: &Database, filter: &str) -> RowkeeperResult<usize> {
        let rows = db.engine()?.delete(self.table.name(), Some(filter))?;
        debug!(table = %self.table.name(), filter = %filter, rows = rows, "Deleted by filter");
        Ok(rows)
    }
}

impl<R: Record> Clone for Dao<R> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
            factory: self.factory,
        }
    }
}

impl<R: Record> std::fmt::Debug for Dao<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dao")
            .field("table", &self.table.name())
            .field("row_type", &self.table.row_type_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryConnector;
    use rowkeeper_core::{
        IntegerProperty, Property, RowkeeperError, SchemaError, StoreConfig, StringProperty,
    };

    struct Task;

    const TITLE: StringProperty = Property::new("tasks", "title");
    const IMPORTANCE: IntegerProperty = Property::new("tasks", "importance");

    fn setup() -> (Database, Dao) {
        let table = Table::builder::<Task>("tasks")
            .column(&TITLE)
            .column(&IMPORTANCE)
            .default_value(&IMPORTANCE, 2)
            .build()
            .unwrap();
        let connector = InMemoryConnector::new();
        connector.engine().create_table(&table).unwrap();
        let db = Database::open(connector, StoreConfig::default()).unwrap();
        (db, Dao::new(table))
    }

    fn insert(db: &Database, dao: &Dao, title: &str, importance: i32) -> i64 {
        let model = Model::new(Arc::clone(dao.table()));
        model.set(&TITLE, title.to_string());
        model.set(&IMPORTANCE, importance);
        match dao.save(db, &model).unwrap() {
            SaveOutcome::Inserted { id } => id,
            other => panic!("Expected Inserted, got: {:?}", other),
        }
    }

    #[test]
    fn test_insert_assigns_id_and_clears_dirty() {
        let (db, dao) = setup();
        let model = Model::new(Arc::clone(dao.table()));
        model.set(&TITLE, "write tests".to_string());

        let outcome = dao.save(&db, &model).unwrap();
        assert!(outcome.is_success());
        assert!(model.id() > 0);
        assert!(!model.has_changes());
        assert_eq!(outcome, SaveOutcome::Inserted { id: model.id() });
    }

    #[test]
    fn test_update_writes_only_dirty_values() {
        let (db, dao) = setup();
        let id = insert(&db, &dao, "a", 1);
        let columns = dao.table().columns().to_vec();

        let model = dao.fetch_by_id(&db, id, &columns).unwrap().unwrap();
        model.set(&IMPORTANCE, 5);
        assert_eq!(dao.save(&db, &model).unwrap(), SaveOutcome::Updated { rows: 1 });

        let reread = dao.fetch_by_id(&db, id, &columns).unwrap().unwrap();
        assert_eq!(reread.get(&IMPORTANCE).unwrap(), 5);
        assert_eq!(reread.get(&TITLE).unwrap(), "a");
    }

    #[test]
    fn test_unchanged_save_issues_no_write() {
        let (db, dao) = setup();
        let id = insert(&db, &dao, "a", 1);
        let columns = [dao.table().id_property().column().clone(), TITLE.column().clone()];
        let model = dao.fetch_by_id(&db, id, &columns).unwrap().unwrap();
        model.set(&TITLE, "a".to_string());
        assert!(!model.has_changes());
        assert_eq!(dao.save(&db, &model).unwrap(), SaveOutcome::Unchanged);
    }

    #[test]
    fn test_stale_update() {
        let (db, dao) = setup();
        let id = insert(&db, &dao, "a", 1);
        let columns = dao.table().columns().to_vec();
        let model = dao.fetch_by_id(&db, id, &columns).unwrap().unwrap();

        assert!(dao.delete(&db, id).unwrap());
        model.set(&TITLE, "b".to_string());
        let outcome = dao.save(&db, &model).unwrap();
        assert_eq!(outcome, SaveOutcome::Stale);
        assert!(!outcome.is_success());
        assert!(model.has_changes());
    }

    #[test]
    fn test_fetch_by_missing_id() {
        let (db, dao) = setup();
        assert!(dao.fetch_by_id(&db, 42, &[TITLE.column().clone()]).unwrap().is_none());
    }

    #[test]
    fn test_fetch_many_clauses_and_count() {
        let (db, dao) = setup();
        for (title, importance) in [("c", 1), ("a", 3), ("b", 3)] {
            insert(&db, &dao, title, importance);
        }

        let options = FetchOptions::new()
            .with_filter("importance = 3")
            .with_order_by("title");
        let records = dao.fetch_all(&db, &[TITLE.column().clone()], &options).unwrap();
        let titles: Vec<String> = records.iter().map(|m| m.get(&TITLE).unwrap()).collect();
        assert_eq!(titles, vec!["a", "b"]);

        assert_eq!(dao.count(&db, None).unwrap(), 3);
        assert_eq!(dao.count(&db, Some("importance > 1")).unwrap(), 2);

        let mut cursor = dao.fetch_ordered(&db, &[TITLE.column().clone()], "importance < 9", "title DESC").unwrap();
        assert!(cursor.move_to_first().unwrap());
        assert_eq!(cursor.get(&TITLE).unwrap(), "c");
    }

    #[test]
    fn test_default_fetch_limit() {
        let table = Table::builder::<Task>("tasks").column(&TITLE).build().unwrap();
        let connector = InMemoryConnector::new();
        connector.engine().create_table(&table).unwrap();
        let db = Database::open(connector, StoreConfig::default().with_default_fetch_limit(Some(2))).unwrap();
        let dao: Dao = Dao::new(table);

        for title in ["a", "b", "c"] {
            let model = Model::new(Arc::clone(dao.table()));
            model.set(&TITLE, title.to_string());
            dao.save(&db, &model).unwrap();
        }
        let cursor = dao.fetch_many(&db, &[TITLE.column().clone()], &FetchOptions::new()).unwrap();
        assert_eq!(cursor.count().unwrap(), 2);
        let cursor = dao
            .fetch_many(&db, &[TITLE.column().clone()], &FetchOptions::new().with_limit("10"))
            .unwrap();
        assert_eq!(cursor.count().unwrap(), 3);
    }

    #[test]
    fn test_delete_where() {
        let (db, dao) = setup();
        insert(&db, &dao, "a", 1);
        insert(&db, &dao, "b", 1);
        insert(&db, &dao, "c", 2);
        assert_eq!(dao.delete_where(&db, "importance = 1").unwrap(), 2);
        assert_eq!(dao.count(&db, None).unwrap(), 1);
    }

    #[test]
    fn test_failing_factory_leaves_cursor_usable() {
        fn picky(table: Arc<Table>, cursor: &mut Cursor, columns: &[Column]) -> RowkeeperResult<Model> {
            let model = Model::from_cursor(table, cursor, columns)?;
            if model.get(&TITLE)? == "bad" {
                return Err(SchemaError::FactoryFailed {
                    table: "tasks".to_string(),
                    reason: "bad title".to_string(),
                }
                .into());
            }
            Ok(model)
        }

        let (db, dao) = setup();
        insert(&db, &dao, "bad", 1);
        insert(&db, &dao, "good", 1);
        let picky_dao = Dao::with_factory(Arc::clone(dao.table()), picky);

        let err = picky_dao.fetch_by_id(&db, 1, &[TITLE.column().clone()]).unwrap_err();
        assert!(matches!(err, RowkeeperError::Schema(SchemaError::FactoryFailed { .. })));

        let mut cursor = dao.fetch(&db, &[TITLE.column().clone()], "_id > 0").unwrap();
        assert!(cursor.move_to_first().unwrap());
        assert!(picky(Arc::clone(dao.table()), &mut cursor, &[TITLE.column().clone()]).is_err());
        assert!(cursor.move_to_next().unwrap());
        let good = picky(Arc::clone(dao.table()), &mut cursor, &[TITLE.column().clone()]).unwrap();
        assert_eq!(good.get(&TITLE).unwrap(), "good");
    }

    #[test]
    fn test_operations_fail_when_closed() {
        let (db, dao) = setup();
        db.close().unwrap();
        let model = Model::new(Arc::clone(dao.table()));
        assert!(matches!(
            dao.save(&db, &model),
            Err(RowkeeperError::Storage(rowkeeper_core::StorageError::NotOpen))
        ));
    }
}
