//! In-memory storage engine
//!
//! A relational engine over shared maps. Tables are created from a
//! [`Table`] schema; values written are coerced to the declared column kinds
//! and ids are assigned the way an autoincrementing primary key would be.

mod clause;
mod select;

use crate::{Connector, Query, StorageEngine};
use clause::{EvalContext, Expr};
use rowkeeper_core::{
    RowSet, RowkeeperResult, StorageError, Table, Value, ValueKind, ValueMap,
};
use select::SelectPlan;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct MemoryTable {
    columns: Vec<(String, ValueKind)>,
    id_column: String,
    rows: BTreeMap<i64, ValueMap>,
    next_id: i64,
}

impl MemoryTable {
    fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }

    fn kind_of(&self, table: &str, column: &str) -> RowkeeperResult<ValueKind> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, kind)| *kind)
            .ok_or_else(|| {
                StorageError::UnknownColumn {
                    table: table.to_string(),
                    column: column.to_string(),
                }
                .into()
            })
    }

    /// Coerce `values` to the declared kinds.
    fn coerce(&self, table: &str, values: &ValueMap) -> RowkeeperResult<ValueMap> {
        let mut coerced = ValueMap::new();
        for (column, value) in values {
            let kind = self.kind_of(table, column)?;
            let value = value.coerce_checked(kind, column).map_err(|e| StorageError::ConstraintViolation {
                table: table.to_string(),
                reason: e.to_string(),
            })?;
            coerced.put(column.clone(), value);
        }
        Ok(coerced)
    }

    /// Ids of rows matching `filter`, all rows when `None`.
    fn matching(&self, table: &str, filter: Option<&str>) -> RowkeeperResult<Vec<i64>> {
        let Some(filter) = filter else {
            return Ok(self.rows.keys().copied().collect());
        };

        let expr = Expr::parse(filter)?;
        let mut ids = Vec::new();
        for (id, row) in &self.rows {
            let ctx = EvalContext {
                row,
                group_size: None,
            };
            if expr.matches(&ctx)? {
                ids.push(*id);
            }
        }
        trace!(table = %table, filter = %filter, matched = ids.len(), "Evaluated filter");
        Ok(ids)
    }
}

type Tables = HashMap<String, MemoryTable>;

/// In-memory [`StorageEngine`].
///
/// Clones share the same tables. A read-only view refuses writes but sees
/// every write made through a writable handle.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEngine {
    tables: Arc<RwLock<Tables>>,
    read_only: bool,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle over the same tables that refuses writes.
    pub fn read_only_view(&self) -> Self {
        Self {
            tables: Arc::clone(&self.tables),
            read_only: true,
        }
    }

    fn read(&self) -> RowkeeperResult<RwLockReadGuard<'_, Tables>> {
        self.tables
            .read()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    fn write(&self) -> RowkeeperResult<RwLockWriteGuard<'_, Tables>> {
        if self.read_only {
            return Err(StorageError::ReadOnly.into());
        }
        self.tables
            .write()
            .map_err(|_| StorageError::LockPoisoned.into())
    }

    /// Create the table `schema` describes.
    pub fn create_table(&self, schema: &Table) -> RowkeeperResult<()> {
        let mut tables = self.write()?;
        if tables.contains_key(schema.name()) {
            return Err(StorageError::ConstraintViolation {
                table: schema.name().to_string(),
                reason: "table already exists".to_string(),
            }
            .into());
        }

        debug!(
            table = %schema.name(),
            columns = %schema.column_definitions().join(", "),
            "Created table"
        );
        tables.insert(
            schema.name().to_string(),
            MemoryTable {
                columns: schema
                    .columns()
                    .iter()
                    .map(|c| (c.name().to_string(), c.kind()))
                    .collect(),
                id_column: schema.id_column_name().to_string(),
                rows: BTreeMap::new(),
                next_id: 1,
            },
        );
        Ok(())
    }

    /// Drop a table and its rows; returns whether it existed.
    pub fn drop_table(&self, table: &str) -> RowkeeperResult<bool> {
        Ok(self.write()?.remove(table).is_some())
    }

    pub fn has_table(&self, table: &str) -> RowkeeperResult<bool> {
        Ok(self.read()?.contains_key(table))
    }

    /// Number of rows stored in `table`.
    pub fn row_count(&self, table: &str) -> RowkeeperResult<usize> {
        let tables = self.read()?;
        Ok(lookup(&tables, table)?.rows.len())
    }
}

fn lookup<'t>(tables: &'t Tables, table: &str) -> RowkeeperResult<&'t MemoryTable> {
    tables.get(table).ok_or_else(|| {
        StorageError::UnknownTable {
            table: table.to_string(),
        }
        .into()
    })
}

fn lookup_mut<'t>(tables: &'t mut Tables, table: &str) -> RowkeeperResult<&'t mut MemoryTable> {
    tables.get_mut(table).ok_or_else(|| {
        StorageError::UnknownTable {
            table: table.to_string(),
        }
        .into()
    })
}

impl StorageEngine for InMemoryEngine {
    fn query(&self, query: &Query) -> RowkeeperResult<Box<dyn RowSet>> {
        let tables = self.read()?;
        let table = lookup(&tables, &query.table)?;

        let plan = SelectPlan::parse(query, &table.column_names())?;
        trace!(table = %query.table, plan = ?plan, "Planned query");
        let rows = plan.execute(table.rows.values())?;

        debug!(
            table = %query.table,
            filter = ?query.filter,
            rows = rows.count(),
            "Query"
        );
        Ok(Box::new(rows))
    }

    fn insert(&self, table: &str, id_column: &str, values: &ValueMap) -> RowkeeperResult<i64> {
        let mut tables = self.write()?;
        let target = lookup_mut(&mut tables, table)?;
        if target.id_column != id_column {
            return Err(StorageError::UnknownColumn {
                table: table.to_string(),
                column: id_column.to_string(),
            }
            .into());
        }

        let values = target.coerce(table, values)?;
        let id = match values.get(id_column) {
            Some(Value::Long(id)) if *id != 0 => *id,
            _ => target.next_id,
        };
        let violation = |reason: String| StorageError::ConstraintViolation {
            table: table.to_string(),
            reason,
        };
        if id < 0 {
            return Err(violation(format!("negative {} {}", id_column, id)).into());
        }
        if target.rows.contains_key(&id) {
            return Err(violation(format!("duplicate {} {}", id_column, id)).into());
        }
        let next_id = id
            .checked_add(1)
            .ok_or_else(|| violation(format!("{} space exhausted at {}", id_column, id)))?;

        let mut row: ValueMap = target
            .columns
            .iter()
            .map(|(name, _)| (name.clone(), Value::Null))
            .collect();
        row.put_all(&values);
        row.put(id_column, id);

        target.rows.insert(id, row);
        target.next_id = target.next_id.max(next_id);
        debug!(table = %table, id = id, "Inserted row");
        Ok(id)
    }

    fn update(
        &self,
        table: &str,
        values: &ValueMap,
        filter: Option<&str>,
    ) -> RowkeeperResult<usize> {
        let mut tables = self.write()?;
        let target = lookup_mut(&mut tables, table)?;
        let values = target.coerce(table, values)?;
        let ids = target.matching(table, filter)?;

        if let Some(new_id) = values.get(&target.id_column) {
            if ids.iter().any(|id| Some(*id) != integral(new_id)) {
                return Err(StorageError::ConstraintViolation {
                    table: table.to_string(),
                    reason: format!("{} cannot be changed", target.id_column),
                }
                .into());
            }
        }

        for id in &ids {
            if let Some(row) = target.rows.get_mut(id) {
                row.put_all(&values);
            }
        }
        debug!(table = %table, filter = ?filter, rows = ids.len(), "Updated rows");
        Ok(ids.len())
    }

    fn delete(&self, table: &str, filter: Option<&str>) -> RowkeeperResult<usize> {
        let mut tables = self.write()?;
        let target = lookup_mut(&mut tables, table)?;
        let ids = target.matching(table, filter)?;
        for id in &ids {
            target.rows.remove(id);
        }
        debug!(table = %table, filter = ?filter, rows = ids.len(), "Deleted rows");
        Ok(ids.len())
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

fn integral(value: &Value) -> Option<i64> {
    match value {
        Value::Long(v) => Some(*v),
        Value::Integer(v) => Some(i64::from(*v)),
        _ => None,
    }
}

// ============================================================================
// CONNECTOR
// ============================================================================

/// Connector handing out handles over one [`InMemoryEngine`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnector {
    engine: InMemoryEngine,
    fail_writable: bool,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connector over an existing engine's tables.
    pub fn with_engine(engine: InMemoryEngine) -> Self {
        Self {
            engine,
            fail_writable: false,
        }
    }

    /// Make every writable open fail, as a locked or read-only store would.
    pub fn with_writable_failure(mut self) -> Self {
        self.fail_writable = true;
        self
    }

    pub fn engine(&self) -> &InMemoryEngine {
        &self.engine
    }
}

impl Connector for InMemoryConnector {
    fn open_writable(&self) -> RowkeeperResult<Arc<dyn StorageEngine>> {
        if self.fail_writable {
            return Err(StorageError::ConnectionFailed {
                reason: "store is not writable".to_string(),
            }
            .into());
        }
        Ok(Arc::new(self.engine.clone()))
    }

    fn open_readable(&self) -> RowkeeperResult<Arc<dyn StorageEngine>> {
        Ok(Arc::new(self.engine.read_only_view()))
    }
}
