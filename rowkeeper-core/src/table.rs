//! Table schemas

use crate::{
    Column, ColumnType, LongProperty, Property, PropertyVisitor, RowkeeperResult, SchemaError,
    Value, ValueKind, ValueMap,
};
use std::any::TypeId;
use std::collections::HashSet;
use std::sync::Arc;

/// Name of the id column common to all tables unless overridden.
pub const ID_COLUMN: &str = "_id";

/// Sentinel id for rows that have not been persisted yet.
pub const NO_ID: i64 = 0;

/// Immutable schema for one table and one row type.
///
/// Built once per row type and shared (behind an `Arc`) by every model and
/// DAO reading that table. Schema defaults live here so every new model of
/// the row type resolves the same defaults.
#[derive(Debug)]
pub struct Table {
    name: String,
    row_type: TypeId,
    row_type_name: &'static str,
    columns: Vec<Column>,
    defaults: ValueMap,
    id: LongProperty,
}

impl Table {
    /// Start a schema for row type `R`.
    pub fn builder<R: 'static>(name: impl Into<String>) -> TableBuilder {
        TableBuilder {
            name: name.into(),
            row_type: TypeId::of::<R>(),
            row_type_name: std::any::type_name::<R>(),
            columns: Vec::new(),
            defaults: Vec::new(),
            id_column: ID_COLUMN.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn row_type(&self) -> TypeId {
        self.row_type
    }

    pub fn row_type_name(&self) -> &'static str {
        self.row_type_name
    }

    /// All columns, id column first.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Look up a column by bare name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name() == name)
    }

    pub fn contains(&self, column: &Column) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn defaults(&self) -> &ValueMap {
        &self.defaults
    }

    pub fn id_property(&self) -> &LongProperty {
        &self.id
    }

    pub fn id_column_name(&self) -> &str {
        self.id.name()
    }

    /// Whether both schemas describe the same row type and table.
    pub fn same_row_type(&self, other: &Table) -> bool {
        self.row_type == other.row_type && self.name == other.name
    }

    /// `name KIND` fragments for collaborators that create the table.
    pub fn column_definitions(&self) -> Vec<String> {
        let mut visitor = ColumnDefinition;
        self.columns
            .iter()
            .map(|column| column.accept(&mut visitor, ()))
            .collect()
    }
}

/// Renders a column's definition from its kind.
struct ColumnDefinition;

impl PropertyVisitor for ColumnDefinition {
    type Context = ();
    type Output = String;

    fn visit_integer(&mut self, column: &Column, _: ()) -> String {
        format!("{} {}", column.name(), ValueKind::Integer.sql_type())
    }

    fn visit_long(&mut self, column: &Column, _: ()) -> String {
        format!("{} {}", column.name(), ValueKind::Long.sql_type())
    }

    fn visit_double(&mut self, column: &Column, _: ()) -> String {
        format!("{} {}", column.name(), ValueKind::Double.sql_type())
    }

    fn visit_text(&mut self, column: &Column, _: ()) -> String {
        format!("{} {}", column.name(), ValueKind::Text.sql_type())
    }
}

/// Builder for [`Table`].
#[derive(Debug)]
pub struct TableBuilder {
    name: String,
    row_type: TypeId,
    row_type_name: &'static str,
    columns: Vec<Column>,
    defaults: Vec<(Column, Value)>,
    id_column: String,
}

impl TableBuilder {
    /// Add a column.
    pub fn column(mut self, column: impl AsRef<Column>) -> Self {
        self.columns.push(column.as_ref().clone());
        self
    }

    /// Add several columns.
    pub fn columns(mut self, columns: &[Column]) -> Self {
        self.columns.extend_from_slice(columns);
        self
    }

    /// Schema default for a column.
    pub fn default_value<T: ColumnType>(mut self, property: &Property<T>, value: T) -> Self {
        self.defaults
            .push((property.column().clone(), value.into_value()));
        self
    }

    /// Schema default of NULL for a column.
    pub fn default_null(mut self, column: impl AsRef<Column>) -> Self {
        self.defaults.push((column.as_ref().clone(), Value::Null));
        self
    }

    /// Override the id column name.
    pub fn id_column(mut self, name: impl Into<String>) -> Self {
        self.id_column = name.into();
        self
    }

    /// Validate and freeze the schema.
    ///
    /// The id column is added as a Long column when not declared.
    pub fn build(self) -> RowkeeperResult<Arc<Table>> {
        let mut seen = HashSet::new();
        let mut id = None;

        for column in &self.columns {
            if column.table() != Some(self.name.as_str()) {
                return Err(SchemaError::InvalidColumnName {
                    name: column.qualified_name(),
                    reason: format!("not bound to table {}", self.name),
                }
                .into());
            }
            if !seen.insert(column.name().to_string()) {
                return Err(SchemaError::DuplicateColumn {
                    table: self.name.clone(),
                    column: column.name().to_string(),
                }
                .into());
            }
            if column.name() == self.id_column {
                id = Some(LongProperty::try_from_column(column.clone())?);
            }
        }

        let mut columns = self.columns;
        let id = match id {
            Some(id) => {
                columns.retain(|c| c != id.column());
                id
            }
            None => LongProperty::owned(self.name.clone(), self.id_column.clone()),
        };
        columns.insert(0, id.column().clone());

        let mut defaults = ValueMap::new();
        for (column, value) in self.defaults {
            let declared = columns.iter().find(|c| **c == column).ok_or_else(|| {
                SchemaError::UnknownColumn {
                    table: self.name.clone(),
                    column: column.name().to_string(),
                }
            })?;
            let value = value.coerce_checked(declared.kind(), declared.name())?;
            defaults.put(declared.name(), value);
        }

        Ok(Arc::new(Table {
            name: self.name,
            row_type: self.row_type,
            row_type_name: self.row_type_name,
            columns,
            defaults,
            id,
        }))
    }
}
