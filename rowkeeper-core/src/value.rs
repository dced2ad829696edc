//! Value kinds and dynamically typed column values

use crate::{RowkeeperResult, SchemaError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The four storage kinds a column can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueKind {
    /// 32-bit signed integer
    Integer,
    /// 64-bit signed integer
    Long,
    /// 64-bit float
    Double,
    /// UTF-8 text
    Text,
}

impl ValueKind {
    /// Storage type name used in column definitions.
    pub fn sql_type(self) -> &'static str {
        match self {
            ValueKind::Integer | ValueKind::Long => "INTEGER",
            ValueKind::Double => "REAL",
            ValueKind::Text => "TEXT",
        }
    }
}

/// A single column value as stored in a row.
///
/// `Null` is a legitimate database value. It is distinct from a column that
/// was never read, which surfaces as [`SchemaError::FieldNotRead`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Integer(i32),
    Long(i64),
    Double(f64),
    Text(String),
}

impl Value {
    /// Kind of the stored value, `None` for NULL.
    pub fn kind(&self) -> Option<ValueKind> {
        match self {
            Value::Null => None,
            Value::Integer(_) => Some(ValueKind::Integer),
            Value::Long(_) => Some(ValueKind::Long),
            Value::Double(_) => Some(ValueKind::Double),
            Value::Text(_) => Some(ValueKind::Text),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert this value to `kind` the way a relational store reads a
    /// column through a typed accessor: numbers narrow or widen, text is
    /// parsed, and anything converts to text. NULL stays NULL.
    ///
    /// Narrowing wraps or truncates out-of-range numbers. Use
    /// [`Value::coerce_checked`] for values about to be stored.
    pub fn coerce(&self, kind: ValueKind, column: &str) -> RowkeeperResult<Value> {
        self.convert(kind, column, false)
    }

    /// Like [`Value::coerce`], but a number that does not fit the target
    /// kind is a [`SchemaError::TypeMismatch`] instead of being narrowed.
    pub fn coerce_checked(&self, kind: ValueKind, column: &str) -> RowkeeperResult<Value> {
        self.convert(kind, column, true)
    }

    fn convert(&self, kind: ValueKind, column: &str, checked: bool) -> RowkeeperResult<Value> {
        let mismatch = || SchemaError::TypeMismatch {
            column: column.to_string(),
            expected: kind,
            found: self.kind(),
        };
        let to_i32 = |v: i64| -> RowkeeperResult<i32> {
            if checked {
                Ok(i32::try_from(v).map_err(|_| mismatch())?)
            } else {
                Ok(v as i32)
            }
        };
        let to_i64 = |d: f64| -> RowkeeperResult<i64> {
            if checked && !fits_i64(d) {
                return Err(mismatch().into());
            }
            Ok(d as i64)
        };

        let coerced = match (self, kind) {
            (Value::Null, _) => Value::Null,

            (Value::Integer(v), ValueKind::Integer) => Value::Integer(*v),
            (Value::Long(v), ValueKind::Integer) => Value::Integer(to_i32(*v)?),
            (Value::Double(v), ValueKind::Integer) => Value::Integer(to_i32(to_i64(*v)?)?),
            (Value::Text(s), ValueKind::Integer) => {
                let parsed = parse_integral(s, checked).ok_or_else(mismatch)?;
                Value::Integer(to_i32(parsed)?)
            }

            (Value::Integer(v), ValueKind::Long) => Value::Long(i64::from(*v)),
            (Value::Long(v), ValueKind::Long) => Value::Long(*v),
            (Value::Double(v), ValueKind::Long) => Value::Long(to_i64(*v)?),
            (Value::Text(s), ValueKind::Long) => {
                Value::Long(parse_integral(s, checked).ok_or_else(mismatch)?)
            }

            (Value::Integer(v), ValueKind::Double) => Value::Double(f64::from(*v)),
            (Value::Long(v), ValueKind::Double) => Value::Double(*v as f64),
            (Value::Double(v), ValueKind::Double) => Value::Double(*v),
            (Value::Text(s), ValueKind::Double) => {
                Value::Double(s.trim().parse::<f64>().map_err(|_| mismatch())?)
            }

            (Value::Text(s), ValueKind::Text) => Value::Text(s.clone()),
            (other, ValueKind::Text) => Value::Text(other.to_string()),
        };

        Ok(coerced)
    }

    /// Numeric view used for cross-kind comparisons.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(f64::from(*v)),
            Value::Long(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            Value::Null | Value::Text(_) => None,
        }
    }
}

fn parse_integral(text: &str, checked: bool) -> Option<i64> {
    let trimmed = text.trim();
    trimmed.parse::<i64>().ok().or_else(|| {
        let d = trimmed.parse::<f64>().ok()?;
        if checked && !fits_i64(d) {
            return None;
        }
        Some(d as i64)
    })
}

/// Finite and inside the `i64` range once truncated.
fn fits_i64(d: f64) -> bool {
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;
    d.is_finite() && d >= -TWO_POW_63 && d < TWO_POW_63
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

// ============================================================================
// TYPED COLUMN VALUES
// ============================================================================

/// A Rust type that can be stored in a column of one fixed kind.
///
/// There is exactly one implementation per [`ValueKind`]; typed descriptors
/// are parameterized by it, so reading a `Property<String>` can only ever
/// yield a `String`.
pub trait ColumnType: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    /// The storage kind this type maps to.
    const KIND: ValueKind;

    /// Wrap into a dynamically typed value.
    fn into_value(self) -> Value;

    /// Extract from a value of exactly this kind.
    fn from_value(value: &Value) -> Option<Self>;
}

impl ColumnType for i32 {
    const KIND: ValueKind = ValueKind::Integer;

    fn into_value(self) -> Value {
        Value::Integer(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

impl ColumnType for i64 {
    const KIND: ValueKind = ValueKind::Long;

    fn into_value(self) -> Value {
        Value::Long(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }
}

impl ColumnType for f64 {
    const KIND: ValueKind = ValueKind::Double;

    fn into_value(self) -> Value {
        Value::Double(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }
}

impl ColumnType for String {
    const KIND: ValueKind = ValueKind::Text;

    fn into_value(self) -> Value {
        Value::Text(self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(v) => Some(v.clone()),
            _ => None,
        }
    }
}

// ============================================================================
// VALUE MAP
// ============================================================================

/// Column name to value map, the untyped row representation exchanged with
/// storage engines and external callers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValueMap {
    entries: BTreeMap<String, Value>,
}

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries.get(column)
    }

    pub fn contains_key(&self, column: &str) -> bool {
        self.entries.contains_key(column)
    }

    /// Insert or overwrite, returning the previous value.
    pub fn put(&mut self, column: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.entries.insert(column.into(), value.into())
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.entries.remove(column)
    }

    /// Overlay every entry of `other` onto this map.
    pub fn put_all(&mut self, other: &ValueMap) {
        for (column, value) in &other.entries {
            self.entries.insert(column.clone(), value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }
}

impl FromIterator<(String, Value)> for ValueMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ValueMap {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a ValueMap {
    type Item = (&'a String, &'a Value);
    type IntoIter = std::collections::btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coerce_numeric_narrowing() {
        let v = Value::Long(42).coerce(ValueKind::Integer, "n").unwrap();
        assert_eq!(v, Value::Integer(42));

        let v = Value::Double(3.9).coerce(ValueKind::Long, "n").unwrap();
        assert_eq!(v, Value::Long(3));

        let v = Value::Integer(7).coerce(ValueKind::Double, "n").unwrap();
        assert_eq!(v, Value::Double(7.0));
    }

    #[test]
    fn test_coerce_text() {
        let v = Value::Text(" 12 ".to_string())
            .coerce(ValueKind::Long, "n")
            .unwrap();
        assert_eq!(v, Value::Long(12));

        let v = Value::Long(12).coerce(ValueKind::Text, "n").unwrap();
        assert_eq!(v, Value::Text("12".to_string()));

        let err = Value::Text("abc".to_string())
            .coerce(ValueKind::Integer, "n")
            .unwrap_err();
        assert!(matches!(
            err,
            crate::RowkeeperError::Schema(SchemaError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_coerce_checked_rejects_out_of_range() {
        let wide = Value::Long(4_294_967_297);
        assert_eq!(wide.coerce(ValueKind::Integer, "n").unwrap(), Value::Integer(1));
        assert!(matches!(
            wide.coerce_checked(ValueKind::Integer, "n"),
            Err(crate::RowkeeperError::Schema(SchemaError::TypeMismatch { .. }))
        ));

        assert!(Value::Double(3.0e10)
            .coerce_checked(ValueKind::Integer, "n")
            .is_err());
        assert!(Value::Double(f64::NAN)
            .coerce_checked(ValueKind::Long, "n")
            .is_err());
        assert!(Value::Double(1.0e19)
            .coerce_checked(ValueKind::Long, "n")
            .is_err());
        assert!(Value::Text("3000000000".into())
            .coerce_checked(ValueKind::Integer, "n")
            .is_err());
        assert!(Value::Text("1e30".into())
            .coerce_checked(ValueKind::Long, "n")
            .is_err());
    }

    #[test]
    fn test_coerce_checked_keeps_in_range_values() {
        assert_eq!(
            Value::Long(i64::from(i32::MIN))
                .coerce_checked(ValueKind::Integer, "n")
                .unwrap(),
            Value::Integer(i32::MIN)
        );
        assert_eq!(
            Value::Double(3.9).coerce_checked(ValueKind::Long, "n").unwrap(),
            Value::Long(3)
        );
        assert_eq!(
            Value::Double(-9_223_372_036_854_775_808.0)
                .coerce_checked(ValueKind::Long, "n")
                .unwrap(),
            Value::Long(i64::MIN)
        );
        assert_eq!(
            Value::Text(" 7 ".into())
                .coerce_checked(ValueKind::Integer, "n")
                .unwrap(),
            Value::Integer(7)
        );
    }

    #[test]
    fn test_coerce_null_stays_null() {
        for kind in [
            ValueKind::Integer,
            ValueKind::Long,
            ValueKind::Double,
            ValueKind::Text,
        ] {
            assert_eq!(Value::Null.coerce(kind, "c").unwrap(), Value::Null);
        }
    }

    #[test]
    fn test_column_type_from_value_is_exact() {
        assert_eq!(i32::from_value(&Value::Integer(1)), Some(1));
        assert_eq!(i32::from_value(&Value::Long(1)), None);
        assert_eq!(String::from_value(&Value::Text("x".into())), Some("x".into()));
        assert_eq!(f64::from_value(&Value::Null), None);
    }

    #[test]
    fn test_value_map_put_all_overlays() {
        let mut base = ValueMap::new();
        base.put("a", 1);
        base.put("b", "x");

        let mut overlay = ValueMap::new();
        overlay.put("b", "y");
        overlay.put("c", 2.5);

        base.put_all(&overlay);
        assert_eq!(base.len(), 3);
        assert_eq!(base.get("b"), Some(&Value::Text("y".into())));
        assert_eq!(base.get("c"), Some(&Value::Double(2.5)));
    }
}
