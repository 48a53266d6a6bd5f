//! Generic record store: the single mutation gateway for every registered table.
//!
//! [`RecordStore`] exposes insert / query / update / delete over typed
//! [`TableDescriptor`]s. Single-statement calls open their own write transaction;
//! multi-statement work goes through [`RecordStore::with_transaction`], whose [`StoreTx`]
//! offers the same operations on one transaction. Every write marks the affected keys
//! dirty in the sync queue before the transaction commits.

mod filter;
mod table;
mod value;

pub use filter::{CompareOp, Direction, Filter, OrderBy, QueryOptions};
pub use table::{ColumnDef, ColumnType, EmbeddingSpec, KeyColumn, KeyKind, TableDescriptor};
pub use value::{Fields, RecordKey, Row, Value};

use rusqlite::{params, params_from_iter, Connection};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::db::Database;
use crate::error::{Result, StoreError};
use crate::sync::{self, SyncOp};
use table::quote;

type Registry = HashMap<&'static str, TableDescriptor>;

/// Handle to the registered tables of one [`Database`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RecordStore {
    db: Arc<Database>,
    tables: Arc<Registry>,
}

impl RecordStore {
    /// Register `tables` against `db`. Descriptors are validated here, once.
    pub fn new(
        db: Arc<Database>,
        tables: impl IntoIterator<Item = TableDescriptor>,
    ) -> Result<Self> {
        let mut registry = Registry::new();
        for table in tables {
            table.validate()?;
            if registry.insert(table.name, table).is_some() {
                return Err(StoreError::validation(format!(
                    "table {:?} registered twice",
                    table.name
                )));
            }
        }
        tracing::debug!(tables = registry.len(), "record store ready");
        Ok(Self {
            db,
            tables: Arc::new(registry),
        })
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Look up a registered descriptor by name.
    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.get(name)
    }

    /// Run several operations in one write transaction.
    ///
    /// Commits if `body` returns `Ok`; any error or panic rolls everything back, so
    /// partial writes are never visible to readers.
    pub fn with_transaction<T, E>(
        &self,
        body: impl FnOnce(&StoreTx<'_>) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        self.db.with_transaction(|tx| {
            body(&StoreTx {
                conn: tx,
                tables: &self.tables,
            })
        })
    }

    pub fn insert(&self, table: &TableDescriptor, fields: Fields) -> Result<RecordKey> {
        self.with_transaction(|tx| tx.insert(table, fields))
    }

    pub fn update(&self, table: &TableDescriptor, fields: Fields, filter: &Filter) -> Result<usize> {
        self.with_transaction(|tx| tx.update(table, fields, filter))
    }

    pub fn delete(&self, table: &TableDescriptor, filter: &Filter) -> Result<usize> {
        self.with_transaction(|tx| tx.delete(table, filter))
    }

    /// Rows matching `filter`, ordered by `options` then by key.
    pub fn query(
        &self,
        table: &TableDescriptor,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Vec<Row>> {
        check_registered(&self.tables, table)?;
        self.db
            .read(|conn| select_rows(conn, table, filter, options, None))
    }

    /// Like [`RecordStore::query`], abandoning the scan with [`StoreError::Cancelled`]
    /// once `cancel` is set.
    pub fn query_cancellable(
        &self,
        table: &TableDescriptor,
        filter: &Filter,
        options: &QueryOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<Row>> {
        check_registered(&self.tables, table)?;
        self.db
            .read(|conn| select_rows(conn, table, filter, options, Some(cancel)))
    }

    pub fn get(&self, table: &TableDescriptor, key: &RecordKey) -> Result<Option<Row>> {
        check_registered(&self.tables, table)?;
        self.db.read(|conn| select_one(conn, table, key))
    }

    pub fn count(&self, table: &TableDescriptor, filter: &Filter) -> Result<u64> {
        check_registered(&self.tables, table)?;
        self.db.read(|conn| count_rows(conn, table, filter))
    }

    /// Stored embeddings of rows matching `filter`, in key order. Rows without an
    /// embedding are skipped.
    pub(crate) fn embedding_rows(
        &self,
        table: &TableDescriptor,
        filter: &Filter,
        cancel: Option<&CancellationToken>,
    ) -> Result<Vec<StoredEmbedding>> {
        check_registered(&self.tables, table)?;
        let spec = embedding_spec(table)?;
        let filter = Filter::And(vec![filter.clone(), Filter::not_null(spec.dim_column)]);

        self.db.read(|conn| {
            let mut params = Vec::new();
            let mut sql = format!(
                "SELECT {}, {}, {} FROM {}",
                quote(table.key.name),
                quote(spec.column),
                quote(spec.dim_column),
                quote(table.name)
            );
            filter.push_where(table, &mut sql, &mut params)?;
            sql.push_str(&format!(" ORDER BY {}", quote(table.key.name)));

            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(params.iter()))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                if cancel.is_some_and(CancellationToken::is_cancelled) {
                    return Err(StoreError::Cancelled);
                }
                out.push(StoredEmbedding {
                    key: RecordKey::from_sql(row.get_ref(0)?)?,
                    blob: row.get(1)?,
                    dim: row.get(2)?,
                });
            }
            Ok(out)
        })
    }

    /// Up to `limit` `(key, source text)` pairs with keys strictly after `after`.
    pub(crate) fn source_page(
        &self,
        table: &TableDescriptor,
        filter: &Filter,
        after: Option<&RecordKey>,
        limit: usize,
    ) -> Result<Vec<(RecordKey, Option<String>)>> {
        check_registered(&self.tables, table)?;
        let source = embedding_spec(table)?.source_column.ok_or_else(|| {
            StoreError::validation(format!("table {:?} has no embedding source column", table.name))
        })?;
        let filter = match after {
            Some(after) => Filter::And(vec![
                filter.clone(),
                Filter::gt(table.key.name, after.clone()),
            ]),
            None => filter.clone(),
        };

        self.db.read(|conn| {
            let mut params = Vec::new();
            let mut sql = format!(
                "SELECT {}, {} FROM {}",
                quote(table.key.name),
                quote(source),
                quote(table.name)
            );
            filter.push_where(table, &mut sql, &mut params)?;
            QueryOptions::new()
                .limit(limit)
                .push_tail(table, &mut sql, &mut params)?;

            let mut stmt = conn.prepare(&sql)?;
            let page = stmt
                .query_map(params_from_iter(params.iter()), |row| {
                    Ok((RecordKey::from_sql(row.get_ref(0)?)?, row.get(1)?))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(page)
        })
    }
}

/// A raw embedding read from its row, before decoding.
#[derive(Debug, Clone)]
pub(crate) struct StoredEmbedding {
    pub key: RecordKey,
    pub blob: Option<Vec<u8>>,
    pub dim: Option<i64>,
}

/// Record store operations bound to one open write transaction.
pub struct StoreTx<'a> {
    conn: &'a Connection,
    tables: &'a Registry,
}

impl StoreTx<'_> {
    /// Insert a row and return its key.
    ///
    /// Integer keys are assigned by the engine unless supplied; text keys default to a
    /// fresh UUID v7.
    pub fn insert(&self, table: &TableDescriptor, mut fields: Fields) -> Result<RecordKey> {
        check_registered(self.tables, table)?;
        let explicit = fields
            .remove(table.key.name)
            .map(|v| key_from_value(table, v))
            .transpose()?;
        validate_fields(table, &fields)?;

        let key = match (table.key.kind, explicit) {
            (_, Some(key)) => Some(key),
            (KeyKind::Text, None) => Some(RecordKey::Text(uuid::Uuid::now_v7().to_string())),
            (KeyKind::Integer, None) => None,
        };

        let mut columns = Vec::with_capacity(fields.len() + 1);
        let mut params: Vec<Value> = Vec::with_capacity(fields.len() + 1);
        if let Some(key) = &key {
            columns.push(quote(table.key.name));
            params.push(key.clone().into());
        }
        for (column, value) in fields.into_entries() {
            columns.push(quote(&column));
            params.push(value);
        }

        let sql = if columns.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", quote(table.name))
        } else {
            let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("?{i}")).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote(table.name),
                columns.join(", "),
                placeholders.join(", ")
            )
        };
        self.conn.execute(&sql, params_from_iter(params.iter()))?;

        let key = key.unwrap_or_else(|| RecordKey::Integer(self.conn.last_insert_rowid()));
        sync::mark(self.conn, table.name, &key, SyncOp::Upsert)?;
        tracing::debug!(table = table.name, %key, "record inserted");
        Ok(key)
    }

    /// Update rows matching `filter`. Returns the number of rows changed.
    pub fn update(&self, table: &TableDescriptor, fields: Fields, filter: &Filter) -> Result<usize> {
        check_registered(self.tables, table)?;
        if fields.is_empty() {
            return Err(StoreError::validation("update needs at least one field"));
        }
        if fields.get(table.key.name).is_some() {
            return Err(StoreError::validation(format!(
                "key column {:?} cannot be updated",
                table.key.name
            )));
        }
        validate_fields(table, &fields)?;

        let keys = select_keys(self.conn, table, filter)?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut params: Vec<Value> = Vec::with_capacity(fields.len());
        let mut assignments = Vec::with_capacity(fields.len());
        for (column, value) in fields.into_entries() {
            params.push(value);
            assignments.push(format!("{} = ?{}", quote(&column), params.len()));
        }
        let mut sql = format!("UPDATE {} SET {}", quote(table.name), assignments.join(", "));
        filter.push_where(table, &mut sql, &mut params)?;
        let affected = self.conn.execute(&sql, params_from_iter(params.iter()))?;

        for key in &keys {
            sync::mark(self.conn, table.name, key, SyncOp::Upsert)?;
        }
        tracing::debug!(table = table.name, affected, "records updated");
        Ok(affected)
    }

    /// Delete rows matching `filter`, embeddings included. Returns the number removed.
    pub fn delete(&self, table: &TableDescriptor, filter: &Filter) -> Result<usize> {
        check_registered(self.tables, table)?;
        let keys = select_keys(self.conn, table, filter)?;
        if keys.is_empty() {
            return Ok(0);
        }

        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", quote(table.name));
        filter.push_where(table, &mut sql, &mut params)?;
        let affected = self.conn.execute(&sql, params_from_iter(params.iter()))?;

        for key in &keys {
            sync::mark(self.conn, table.name, key, SyncOp::Delete)?;
        }
        tracing::debug!(table = table.name, affected, "records deleted");
        Ok(affected)
    }

    pub fn query(
        &self,
        table: &TableDescriptor,
        filter: &Filter,
        options: &QueryOptions,
    ) -> Result<Vec<Row>> {
        check_registered(self.tables, table)?;
        select_rows(self.conn, table, filter, options, None)
    }

    pub fn get(&self, table: &TableDescriptor, key: &RecordKey) -> Result<Option<Row>> {
        check_registered(self.tables, table)?;
        select_one(self.conn, table, key)
    }

    pub fn count(&self, table: &TableDescriptor, filter: &Filter) -> Result<u64> {
        check_registered(self.tables, table)?;
        count_rows(self.conn, table, filter)
    }

    /// Write an encoded embedding onto an existing row and mark it dirty.
    pub(crate) fn write_embedding(
        &self,
        table: &TableDescriptor,
        key: &RecordKey,
        blob: Option<Vec<u8>>,
        dim: Option<usize>,
    ) -> Result<()> {
        check_registered(self.tables, table)?;
        let spec = embedding_spec(table)?;
        check_key_kind(table, key)?;

        let sql = format!(
            "UPDATE {} SET {} = ?1, {} = ?2 WHERE {} = ?3",
            quote(table.name),
            quote(spec.column),
            quote(spec.dim_column),
            quote(table.key.name)
        );
        let dim = dim.map(|d| d as i64);
        let affected = self.conn.execute(&sql, params![blob, dim, key])?;
        if affected == 0 {
            return Err(StoreError::validation(format!(
                "no record {key} in table {:?}",
                table.name
            )));
        }
        sync::mark(self.conn, table.name, key, SyncOp::Upsert)?;
        Ok(())
    }
}

fn check_registered(tables: &Registry, table: &TableDescriptor) -> Result<()> {
    match tables.get(table.name) {
        Some(registered) if registered == table => Ok(()),
        Some(_) => Err(StoreError::validation(format!(
            "descriptor for {:?} differs from the registered one",
            table.name
        ))),
        None => Err(StoreError::validation(format!(
            "table {:?} is not registered",
            table.name
        ))),
    }
}

fn embedding_spec(table: &TableDescriptor) -> Result<EmbeddingSpec> {
    table.embedding.ok_or_else(|| {
        StoreError::validation(format!("table {:?} has no embedding column", table.name))
    })
}

fn check_key_kind(table: &TableDescriptor, key: &RecordKey) -> Result<()> {
    if key.kind() == table.key.kind {
        Ok(())
    } else {
        Err(StoreError::validation(format!(
            "key {key} has the wrong kind for table {:?}",
            table.name
        )))
    }
}

fn key_from_value(table: &TableDescriptor, value: Value) -> Result<RecordKey> {
    match (table.key.kind, value) {
        (KeyKind::Integer, Value::Integer(i)) => Ok(RecordKey::Integer(i)),
        (KeyKind::Text, Value::Text(s)) => Ok(RecordKey::Text(s)),
        (_, other) => Err(StoreError::validation(format!(
            "{} value is not a valid key for table {:?}",
            other.type_name(),
            table.name
        ))),
    }
}

/// Every field must name a declared, non-embedding column and carry a compatible value.
fn validate_fields(table: &TableDescriptor, fields: &Fields) -> Result<()> {
    for (column, value) in fields.iter() {
        if table.is_embedding_column(column) {
            return Err(StoreError::validation(format!(
                "column {column:?} is managed by the embedding index"
            )));
        }
        let Some(def) = table.column(column) else {
            return Err(StoreError::validation(format!(
                "unknown column {column:?} on table {:?}",
                table.name
            )));
        };
        if !def.ty.accepts(value) {
            return Err(StoreError::validation(format!(
                "{} value for {:?} column {column:?}",
                value.type_name(),
                def.ty
            )));
        }
    }
    Ok(())
}

fn select_list(table: &TableDescriptor) -> String {
    std::iter::once(table.key.name)
        .chain(table.columns.iter().map(|c| c.name))
        .map(quote)
        .collect::<Vec<_>>()
        .join(", ")
}

fn read_row(table: &TableDescriptor, row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
    let key = RecordKey::from_sql(row.get_ref(0)?)?;
    let mut columns = Vec::with_capacity(table.columns.len());
    for (i, col) in table.columns.iter().enumerate() {
        columns.push((col.name.to_string(), Value::from_sql(row.get_ref(i + 1)?, col.ty)));
    }
    Ok(Row::new(key, columns))
}

fn select_rows(
    conn: &Connection,
    table: &TableDescriptor,
    filter: &Filter,
    options: &QueryOptions,
    cancel: Option<&CancellationToken>,
) -> Result<Vec<Row>> {
    let mut params = Vec::new();
    let mut sql = format!("SELECT {} FROM {}", select_list(table), quote(table.name));
    filter.push_where(table, &mut sql, &mut params)?;
    options.push_tail(table, &mut sql, &mut params)?;
    tracing::trace!(table = table.name, %sql, "query");

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            tracing::debug!(table = table.name, read = out.len(), "query cancelled");
            return Err(StoreError::Cancelled);
        }
        out.push(read_row(table, row)?);
    }
    Ok(out)
}

fn select_one(conn: &Connection, table: &TableDescriptor, key: &RecordKey) -> Result<Option<Row>> {
    check_key_kind(table, key)?;
    let rows = select_rows(
        conn,
        table,
        &Filter::eq(table.key.name, key.clone()),
        &QueryOptions::new().limit(1),
        None,
    )?;
    Ok(rows.into_iter().next())
}

fn select_keys(conn: &Connection, table: &TableDescriptor, filter: &Filter) -> Result<Vec<RecordKey>> {
    let mut params = Vec::new();
    let mut sql = format!("SELECT {} FROM {}", quote(table.key.name), quote(table.name));
    filter.push_where(table, &mut sql, &mut params)?;

    let mut stmt = conn.prepare(&sql)?;
    let keys = stmt
        .query_map(params_from_iter(params.iter()), |row| {
            RecordKey::from_sql(row.get_ref(0)?)
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(keys)
}

fn count_rows(conn: &Connection, table: &TableDescriptor, filter: &Filter) -> Result<u64> {
    let mut params = Vec::new();
    let mut sql = format!("SELECT COUNT(*) FROM {}", quote(table.name));
    filter.push_where(table, &mut sql, &mut params)?;
    let count: i64 = conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
    Ok(count as u64)
}
