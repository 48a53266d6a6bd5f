//! Scalar values, record keys, and rows.

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};

use super::table::{ColumnType, KeyKind};

/// A single column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Convert a raw SQLite value, using the declared column type to restore booleans.
    pub(crate) fn from_sql(raw: ValueRef<'_>, ty: ColumnType) -> Self {
        match raw {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(i) if ty == ColumnType::Bool => Self::Bool(i != 0),
            ValueRef::Integer(i) => Self::Integer(i),
            ValueRef::Real(f) => Self::Real(f),
            ValueRef::Text(t) => Self::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Self::Blob(b.to_vec()),
        }
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Self::Bool(b) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*b))),
            Self::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Self::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl From<RecordKey> for Value {
    fn from(key: RecordKey) -> Self {
        match key {
            RecordKey::Integer(i) => Self::Integer(i),
            RecordKey::Text(s) => Self::Text(s),
        }
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Primary key of a record. Integer keys sort before text keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    Integer(i64),
    Text(String),
}

impl RecordKey {
    pub fn kind(&self) -> KeyKind {
        match self {
            Self::Integer(_) => KeyKind::Integer,
            Self::Text(_) => KeyKind::Text,
        }
    }

    /// Text form used by the sync queue.
    pub(crate) fn encode(&self) -> String {
        match self {
            Self::Integer(i) => i.to_string(),
            Self::Text(s) => s.clone(),
        }
    }

    pub(crate) fn decode(kind: KeyKind, raw: String) -> Option<Self> {
        match kind {
            KeyKind::Integer => raw.parse().ok().map(Self::Integer),
            KeyKind::Text => Some(Self::Text(raw)),
        }
    }

    pub(crate) fn from_sql(raw: ValueRef<'_>) -> rusqlite::Result<Self> {
        match raw {
            ValueRef::Integer(i) => Ok(Self::Integer(i)),
            ValueRef::Text(t) => Ok(Self::Text(String::from_utf8_lossy(t).into_owned())),
            other => Err(rusqlite::Error::InvalidColumnType(
                0,
                "key".into(),
                other.data_type(),
            )),
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for RecordKey {
    fn from(v: i32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<&str> for RecordKey {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl ToSql for RecordKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// Column assignments for an insert or update, in the order given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    entries: Vec<(String, Value)>,
}

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column. Setting the same column twice keeps the last value.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(c, _)| *c == column) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((column, value)),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(c, v)| (c.as_str(), v))
    }

    pub(crate) fn remove(&mut self, column: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(c, _)| c == column)?;
        Some(self.entries.remove(idx).1)
    }

    pub(crate) fn into_entries(self) -> Vec<(String, Value)> {
        self.entries
    }
}

/// A row read back from a table: its key plus every declared column, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Row {
    key: RecordKey,
    columns: Vec<(String, Value)>,
}

impl Row {
    pub(crate) fn new(key: RecordKey, columns: Vec<(String, Value)>) -> Self {
        Self { key, columns }
    }

    pub fn key(&self) -> &RecordKey {
        &self.key
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    pub fn get_text(&self, column: &str) -> Option<&str> {
        match self.get(column)? {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.get(column)? {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn get_f64(&self, column: &str) -> Option<f64> {
        match self.get(column)? {
            Value::Real(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn get_bool(&self, column: &str) -> Option<bool> {
        match self.get(column)? {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(c, v)| (c.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_keys_sort_before_text_keys() {
        let mut keys = vec![
            RecordKey::from("b"),
            RecordKey::from(10),
            RecordKey::from("a"),
            RecordKey::from(2),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                RecordKey::from(2),
                RecordKey::from(10),
                RecordKey::from("a"),
                RecordKey::from("b"),
            ]
        );
    }

    #[test]
    fn key_encoding_preserves_kind() {
        let key = RecordKey::from(42);
        assert_eq!(RecordKey::decode(KeyKind::Integer, key.encode()), Some(key));
        assert_eq!(RecordKey::decode(KeyKind::Integer, "x".into()), None);
    }

    #[test]
    fn fields_set_replaces_existing_column() {
        let fields = Fields::new().set("title", "a").set("title", "b").set("done", true);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.get("title"), Some(&Value::Text("b".into())));
    }

    #[test]
    fn bool_restored_from_integer_column_type() {
        assert_eq!(
            Value::from_sql(ValueRef::Integer(1), ColumnType::Bool),
            Value::Bool(true)
        );
        assert_eq!(
            Value::from_sql(ValueRef::Integer(1), ColumnType::Integer),
            Value::Integer(1)
        );
    }

    #[test]
    fn option_converts_to_null() {
        assert_eq!(Value::from(None::<String>), Value::Null);
        assert_eq!(Value::from(Some(3i64)), Value::Integer(3));
    }
}
