//! Typed table descriptors.
//!
//! Every table the store touches is described up front by a [`TableDescriptor`]. Column
//! names are validated when the descriptor is registered, and only registered names are
//! ever interpolated into SQL; values always travel as bound parameters.

use super::value::Value;
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    /// Stored as INTEGER 0/1, read back as [`Value::Bool`].
    Bool,
    Blob,
}

impl ColumnType {
    fn sql_type(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer | Self::Bool => "INTEGER",
            Self::Real => "REAL",
            Self::Blob => "BLOB",
        }
    }

    /// Whether `value` may be written to a column of this type.
    pub(crate) fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::Integer, Value::Integer(_) | Value::Bool(_)) => true,
            (Self::Real, Value::Real(_) | Value::Integer(_)) => true,
            (Self::Bool, Value::Bool(_)) => true,
            (Self::Bool, Value::Integer(i)) => *i == 0 || *i == 1,
            (Self::Blob, Value::Blob(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    pub unique: bool,
}

impl ColumnDef {
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
            unique: false,
        }
    }

    pub const fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// `INTEGER PRIMARY KEY`, assigned by the engine when not supplied.
    Integer,
    /// `TEXT PRIMARY KEY`, a UUID v7 is generated when not supplied.
    Text,
}

impl KeyKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Text => "text",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "integer" => Some(Self::Integer),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyColumn {
    pub name: &'static str,
    pub kind: KeyKind,
}

/// Where a table keeps its embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbeddingSpec {
    /// BLOB column holding little-endian f32 components.
    pub column: &'static str,
    /// INTEGER column holding the vector's dimension.
    pub dim_column: &'static str,
    /// TEXT column embedded by a re-index, if any.
    pub source_column: Option<&'static str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: &'static str,
    pub key: KeyColumn,
    pub columns: &'static [ColumnDef],
    pub embedding: Option<EmbeddingSpec>,
}

impl TableDescriptor {
    pub const fn new(name: &'static str, key: KeyColumn, columns: &'static [ColumnDef]) -> Self {
        Self {
            name,
            key,
            columns,
            embedding: None,
        }
    }

    pub const fn with_embedding(mut self, spec: EmbeddingSpec) -> Self {
        self.embedding = Some(spec);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Whether `name` may appear in a filter or ORDER BY: the key, a declared column, or
    /// the embedding dimension column.
    pub(crate) fn is_filterable(&self, name: &str) -> bool {
        name == self.key.name
            || self.column(name).is_some()
            || self.embedding.is_some_and(|e| e.dim_column == name)
    }

    pub(crate) fn is_embedding_column(&self, name: &str) -> bool {
        self.embedding
            .is_some_and(|e| e.column == name || e.dim_column == name)
    }

    /// `CREATE TABLE IF NOT EXISTS` for this descriptor.
    pub fn create_sql(&self) -> String {
        let mut defs = Vec::with_capacity(self.columns.len() + 3);
        defs.push(match self.key.kind {
            KeyKind::Integer => format!("{} INTEGER PRIMARY KEY", quote(self.key.name)),
            KeyKind::Text => format!("{} TEXT PRIMARY KEY NOT NULL", quote(self.key.name)),
        });
        for col in self.columns {
            let mut def = format!("{} {}", quote(col.name), col.ty.sql_type());
            if !col.nullable {
                def.push_str(" NOT NULL");
            }
            if col.unique {
                def.push_str(" UNIQUE");
            }
            if col.ty == ColumnType::Bool {
                def.push_str(&format!(" CHECK({} IN (0, 1))", quote(col.name)));
            }
            defs.push(def);
        }
        if let Some(emb) = self.embedding {
            defs.push(format!("{} BLOB", quote(emb.column)));
            defs.push(format!("{} INTEGER", quote(emb.dim_column)));
        }
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
            quote(self.name),
            defs.join(",\n    ")
        )
    }

    /// Check identifiers and internal consistency. Called at registration.
    pub(crate) fn validate(&self) -> Result<()> {
        let mut seen: Vec<&str> = vec![self.key.name];
        let mut names: Vec<&str> = self.columns.iter().map(|c| c.name).collect();
        if let Some(emb) = self.embedding {
            names.push(emb.column);
            names.push(emb.dim_column);
        }

        let all = [self.name, self.key.name].into_iter().chain(names.iter().copied());
        for name in all {
            if !is_identifier(name) {
                return Err(StoreError::validation(format!(
                    "invalid identifier {name:?} in table {:?}",
                    self.name
                )));
            }
        }

        for name in names {
            if seen.contains(&name) {
                return Err(StoreError::validation(format!(
                    "duplicate column {name:?} in table {:?}",
                    self.name
                )));
            }
            seen.push(name);
        }

        if let Some(source) = self.embedding.and_then(|e| e.source_column) {
            match self.column(source) {
                Some(col) if col.ty == ColumnType::Text => {}
                _ => {
                    return Err(StoreError::validation(format!(
                        "embedding source {source:?} must be a text column of {:?}",
                        self.name
                    )))
                }
            }
        }
        Ok(())
    }
}

/// ASCII letters, digits, and underscores, not starting with a digit.
pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Double-quote a validated identifier.
pub(crate) fn quote(name: &str) -> String {
    format!("\"{name}\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTE_COLUMNS: &[ColumnDef] = &[
        ColumnDef::new("title", ColumnType::Text).required(),
        ColumnDef::new("slug", ColumnType::Text).unique(),
        ColumnDef::new("done", ColumnType::Bool),
    ];

    const NOTES: TableDescriptor = TableDescriptor::new(
        "notes",
        KeyColumn {
            name: "id",
            kind: KeyKind::Integer,
        },
        NOTE_COLUMNS,
    )
    .with_embedding(EmbeddingSpec {
        column: "embedding",
        dim_column: "embedding_dim",
        source_column: Some("title"),
    });

    #[test]
    fn create_sql_includes_constraints_and_embedding() {
        let sql = NOTES.create_sql();
        assert!(sql.contains("\"id\" INTEGER PRIMARY KEY"));
        assert!(sql.contains("\"title\" TEXT NOT NULL"));
        assert!(sql.contains("\"slug\" TEXT UNIQUE"));
        assert!(sql.contains("CHECK(\"done\" IN (0, 1))"));
        assert!(sql.contains("\"embedding\" BLOB"));
        assert!(sql.contains("\"embedding_dim\" INTEGER"));

        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(&sql).unwrap();
    }

    #[test]
    fn valid_descriptor_passes() {
        NOTES.validate().unwrap();
    }

    #[test]
    fn bad_identifier_rejected() {
        const BAD: TableDescriptor = TableDescriptor::new(
            "notes; DROP TABLE x",
            KeyColumn {
                name: "id",
                kind: KeyKind::Integer,
            },
            &[],
        );
        assert!(matches!(BAD.validate(), Err(StoreError::Validation(_))));
    }

    #[test]
    fn duplicate_column_rejected() {
        const COLUMNS: &[ColumnDef] = &[ColumnDef::new("id", ColumnType::Text)];
        const DUP: TableDescriptor = TableDescriptor::new(
            "dup",
            KeyColumn {
                name: "id",
                kind: KeyKind::Text,
            },
            COLUMNS,
        );
        assert!(DUP.validate().is_err());
    }

    #[test]
    fn embedding_source_must_be_text() {
        const COLUMNS: &[ColumnDef] = &[ColumnDef::new("n", ColumnType::Integer)];
        const T: TableDescriptor = TableDescriptor::new(
            "t",
            KeyColumn {
                name: "id",
                kind: KeyKind::Integer,
            },
            COLUMNS,
        )
        .with_embedding(EmbeddingSpec {
            column: "embedding",
            dim_column: "embedding_dim",
            source_column: Some("n"),
        });
        assert!(T.validate().is_err());
    }

    #[test]
    fn column_type_acceptance() {
        assert!(ColumnType::Bool.accepts(&Value::Integer(1)));
        assert!(!ColumnType::Bool.accepts(&Value::Integer(2)));
        assert!(ColumnType::Real.accepts(&Value::Integer(2)));
        assert!(!ColumnType::Text.accepts(&Value::Integer(2)));
        assert!(ColumnType::Blob.accepts(&Value::Null));
    }

    #[test]
    fn identifiers() {
        assert!(is_identifier("created_at"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier(""));
    }
}
