//! Filter expressions and query options.
//!
//! A [`Filter`] is rendered to a `WHERE` clause against a [`TableDescriptor`]. Column names
//! must belong to the descriptor; every value becomes a positional `?N` parameter.

use super::table::{quote, TableDescriptor};
use super::value::Value;
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every row.
    All,
    Compare {
        column: String,
        op: CompareOp,
        value: Value,
    },
    Like {
        column: String,
        pattern: String,
    },
    IsNull(String),
    NotNull(String),
    In {
        column: String,
        values: Vec<Value>,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    pub fn ne(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ne, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    pub fn le(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Le, value)
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    pub fn ge(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Ge, value)
    }

    /// SQL `LIKE` with the pattern bound as a parameter.
    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::Like {
            column: column.into(),
            pattern: pattern.into(),
        }
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::IsNull(column.into())
    }

    pub fn not_null(column: impl Into<String>) -> Self {
        Self::NotNull(column.into())
    }

    pub fn in_list<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::And(mut children) => {
                children.push(other);
                Self::And(children)
            }
            first => Self::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Filter) -> Self {
        match self {
            Self::Or(mut children) => {
                children.push(other);
                Self::Or(children)
            }
            first => Self::Or(vec![first, other]),
        }
    }

    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Append ` WHERE ...` to `sql` unless the filter is [`Filter::All`].
    pub(crate) fn push_where(
        &self,
        table: &TableDescriptor,
        sql: &mut String,
        params: &mut Vec<Value>,
    ) -> Result<()> {
        if matches!(self, Self::All) {
            return Ok(());
        }
        sql.push_str(" WHERE ");
        self.render(table, sql, params)
    }

    fn render(&self, table: &TableDescriptor, sql: &mut String, params: &mut Vec<Value>) -> Result<()> {
        match self {
            Self::All => sql.push_str("1"),
            Self::Compare { column, op, value } => {
                check_column(table, column)?;
                if value.is_null() {
                    return Err(StoreError::validation(format!(
                        "comparison against null on {column:?}; use is_null/not_null"
                    )));
                }
                params.push(value.clone());
                sql.push_str(&format!("{} {} ?{}", quote(column), op.sql(), params.len()));
            }
            Self::Like { column, pattern } => {
                check_column(table, column)?;
                params.push(Value::Text(pattern.clone()));
                sql.push_str(&format!("{} LIKE ?{}", quote(column), params.len()));
            }
            Self::IsNull(column) => {
                check_column(table, column)?;
                sql.push_str(&format!("{} IS NULL", quote(column)));
            }
            Self::NotNull(column) => {
                check_column(table, column)?;
                sql.push_str(&format!("{} IS NOT NULL", quote(column)));
            }
            Self::In { column, values } => {
                check_column(table, column)?;
                if values.is_empty() {
                    return Err(StoreError::validation(format!(
                        "empty value list for {column:?}"
                    )));
                }
                let mut placeholders = Vec::with_capacity(values.len());
                for value in values {
                    if value.is_null() {
                        return Err(StoreError::validation(format!(
                            "null in value list for {column:?}"
                        )));
                    }
                    params.push(value.clone());
                    placeholders.push(format!("?{}", params.len()));
                }
                sql.push_str(&format!("{} IN ({})", quote(column), placeholders.join(", ")));
            }
            Self::And(children) | Self::Or(children) => {
                if children.is_empty() {
                    return Err(StoreError::validation("empty and/or filter"));
                }
                let joiner = if matches!(self, Self::And(_)) { " AND " } else { " OR " };
                sql.push('(');
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(joiner);
                    }
                    child.render(table, sql, params)?;
                }
                sql.push(')');
            }
            Self::Not(inner) => {
                sql.push_str("NOT (");
                inner.render(table, sql, params)?;
                sql.push(')');
            }
        }
        Ok(())
    }
}

fn check_column(table: &TableDescriptor, column: &str) -> Result<()> {
    if table.is_filterable(column) {
        Ok(())
    } else {
        Err(StoreError::validation(format!(
            "unknown column {column:?} on table {:?}",
            table.name
        )))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

/// Ordering and pagination for a query.
///
/// The key column is always appended as the last sort term, so pages taken with
/// `limit`/`offset` never skip or repeat rows when nothing is written between calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryOptions {
    pub order_by: Vec<OrderBy>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            column: column.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Append ORDER BY / LIMIT / OFFSET. Limits are bound, not formatted.
    pub(crate) fn push_tail(
        &self,
        table: &TableDescriptor,
        sql: &mut String,
        params: &mut Vec<Value>,
    ) -> Result<()> {
        let mut terms = Vec::with_capacity(self.order_by.len() + 1);
        for order in &self.order_by {
            check_column(table, &order.column)?;
            let dir = match order.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            terms.push(format!("{} {dir}", quote(&order.column)));
        }
        if !self.order_by.iter().any(|o| o.column == table.key.name) {
            terms.push(format!("{} ASC", quote(table.key.name)));
        }
        sql.push_str(" ORDER BY ");
        sql.push_str(&terms.join(", "));

        if self.limit.is_some() || self.offset.is_some() {
            let limit = match self.limit {
                Some(n) => i64::try_from(n)
                    .map_err(|_| StoreError::validation("limit out of range"))?,
                None => -1,
            };
            params.push(Value::Integer(limit));
            sql.push_str(&format!(" LIMIT ?{}", params.len()));

            if let Some(offset) = self.offset {
                let offset = i64::try_from(offset)
                    .map_err(|_| StoreError::validation("offset out of range"))?;
                params.push(Value::Integer(offset));
                sql.push_str(&format!(" OFFSET ?{}", params.len()));
            }
        }
        Ok(())
    }
}
