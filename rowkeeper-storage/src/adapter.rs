//! External value maps
//!
//! Conversion between loosely typed key/value maps handed across a process
//! boundary and typed rows. External keys may carry a table prefix
//! (`tasks.title`); it is stripped before the key is matched against the
//! schema. Values are converted to the declared column kinds, and every key
//! is checked before anything is written.

use crate::{filter, Database};
use rowkeeper_core::{
    Column, Model, RowkeeperResult, SchemaError, StorageError, StoreConfig, Table, Value,
    ValueMap,
};
use serde_json::{Map, Number};
use tracing::debug;

/// Bare column name of a possibly table-qualified key. Only the first
/// `table.` prefix is removed.
pub fn strip_table(key: &str) -> &str {
    match key.find('.') {
        Some(dot) => &key[dot + 1..],
        None => key,
    }
}

/// Copy of `values` with every key stripped of its table prefix.
pub fn normalize_keys(values: &ValueMap) -> ValueMap {
    values
        .iter()
        .map(|(key, value)| (strip_table(key).to_string(), value.clone()))
        .collect()
}

/// Resolve external keys against the schema and convert each value to its
/// column's kind. Unknown keys fail in strict mode and are skipped otherwise.
fn resolve<'t>(
    table: &'t Table,
    values: &ValueMap,
    config: &StoreConfig,
) -> RowkeeperResult<Vec<(&'t Column, Value)>> {
    let mut resolved = Vec::with_capacity(values.len());
    for (key, value) in values {
        let name = strip_table(key);
        match table.column(name) {
            Some(column) => resolved.push((column, value.coerce_checked(column.kind(), name)?)),
            None if config.strict_external_columns => {
                return Err(SchemaError::UnknownColumn {
                    table: table.name().to_string(),
                    column: name.to_string(),
                }
                .into())
            }
            None => debug!(table = %table.name(), column = %name, "Skipping unknown external column"),
        }
    }
    Ok(resolved)
}

/// Write external values into `model` through change-detected sets.
///
/// Nothing is written unless every key resolves and converts.
pub fn apply_external(model: &Model, values: &ValueMap, config: &StoreConfig) -> RowkeeperResult<()> {
    for (column, value) in resolve(model.table(), values, config)? {
        model.set_value(column, value)?;
    }
    Ok(())
}

/// The model's merged values keyed by bare column name.
pub fn to_external(model: &Model) -> ValueMap {
    model.merged_values()
}

/// Insert a row built from the schema defaults overlaid with `values`.
///
/// Returns the new row id; an id that is not positive is a failed insert.
pub fn insert_external(db: &Database, table: &Table, values: &ValueMap) -> RowkeeperResult<i64> {
    let mut row = table.defaults().clone();
    for (column, value) in resolve(table, values, db.config())? {
        row.put(column.name(), value);
    }

    let id = db.engine()?.insert(table.name(), table.id_column_name(), &row)?;
    if id <= 0 {
        return Err(StorageError::InsertFailed {
            table: table.name().to_string(),
            reason: format!("engine returned id {}", id),
        }
        .into());
    }
    debug!(table = %table.name(), id = id, "Inserted external row");
    Ok(id)
}

/// Update rows matching `selection` with `values`; returns rows changed.
pub fn update_external(
    db: &Database,
    table: &Table,
    values: &ValueMap,
    selection: Option<&str>,
) -> RowkeeperResult<usize> {
    let row: ValueMap = resolve(table, values, db.config())?
        .into_iter()
        .map(|(column, value)| (column.name().to_string(), value))
        .collect();
    db.engine()?.update(table.name(), &row, selection)
}

/// Delete rows; with an id, only that row and only if it also matches
/// `selection`.
pub fn delete_external(
    db: &Database,
    table: &Table,
    id: Option<i64>,
    selection: Option<&str>,
) -> RowkeeperResult<usize> {
    let filter = match id {
        Some(id) => {
            let by_id = filter::id_filter(table.id_property(), id);
            filter::and_filter([Some(by_id.as_str()), selection].into_iter().flatten())
        }
        None => selection.map(str::to_string),
    };
    db.engine()?.delete(table.name(), filter.as_deref())
}

// ============================================================================
// JSON
// ============================================================================

/// Values as a JSON object. Non-finite doubles become `null`.
pub fn values_to_json(values: &ValueMap) -> serde_json::Value {
    let object: Map<String, serde_json::Value> = values
        .iter()
        .map(|(key, value)| {
            let json = match value {
                Value::Null => serde_json::Value::Null,
                Value::Integer(v) => serde_json::Value::from(*v),
                Value::Long(v) => serde_json::Value::from(*v),
                Value::Double(v) => Number::from_f64(*v)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null),
                Value::Text(s) => serde_json::Value::String(s.clone()),
            };
            (key.clone(), json)
        })
        .collect();
    serde_json::Value::Object(object)
}

/// Values from a JSON object, converted to the schema's column kinds.
///
/// Booleans read as `1`/`0`. Arrays and nested objects are rejected.
pub fn values_from_json(
    table: &Table,
    object: &Map<String, serde_json::Value>,
    config: &StoreConfig,
) -> RowkeeperResult<ValueMap> {
    let mut raw = ValueMap::new();
    for (key, json) in object {
        let value = match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Long(i64::from(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(v) => Value::Long(v),
                None => n.as_f64().map(Value::Double).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
                let name = strip_table(key);
                return Err(SchemaError::TypeMismatch {
                    column: name.to_string(),
                    expected: table
                        .column(name)
                        .map(Column::kind)
                        .unwrap_or(rowkeeper_core::ValueKind::Text),
                    found: None,
                }
                .into());
            }
        };
        raw.put(key.clone(), value);
    }

    Ok(resolve(table, &raw, config)?
        .into_iter()
        .map(|(column, value)| (column.name().to_string(), value))
        .collect())
}
