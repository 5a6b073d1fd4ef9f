//! Raw statement execution against one connection.
//!
//! # Responsibility
//! - Run rendered statements with positional bindings and return raw tuples.
//! - Emit one metadata-only log event per execution.
//!
//! # Invariants
//! - Values are always bound through placeholders.
//! - Logs carry SQL shape, row counts and timings, never parameter values.

use crate::entity::EntityMeta;
use crate::error::RepoResult;
use log::{debug, warn};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::time::Instant;

/// SQL text plus its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlStatement {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Stateless executor over a borrowed connection.
pub struct QueryExecutor<'conn> {
    conn: &'conn Connection,
}

impl<'conn> QueryExecutor<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Runs a row-returning statement and collects every tuple.
    pub fn fetch(&self, statement: &SqlStatement) -> RepoResult<Vec<Vec<Value>>> {
        let started_at = Instant::now();
        let result = self.fetch_inner(statement);
        log_execution("fetch", statement, started_at, result.as_ref().map(Vec::len));
        result
    }

    fn fetch_inner(&self, statement: &SqlStatement) -> RepoResult<Vec<Vec<Value>>> {
        let mut stmt = self.conn.prepare_cached(&statement.sql)?;
        let width = stmt.column_count();
        let mut rows = stmt.query(params_from_iter(statement.params.iter()))?;
        let mut tuples = Vec::new();
        while let Some(row) = rows.next()? {
            let mut tuple = Vec::with_capacity(width);
            for index in 0..width {
                tuple.push(row.get::<_, Value>(index)?);
            }
            tuples.push(tuple);
        }
        Ok(tuples)
    }

    /// Single-entity fetch by primary key.
    pub fn fetch_by_key(&self, meta: &EntityMeta, id: i64) -> RepoResult<Option<Vec<Value>>> {
        let statement = SqlStatement::new(meta.find_by_key_sql(), vec![Value::Integer(id)]);
        let started_at = Instant::now();
        let width = meta.column_count();
        let result: RepoResult<Option<Vec<Value>>> = self
            .conn
            .prepare_cached(&statement.sql)
            .and_then(|mut stmt| {
                stmt.query_row(params_from_iter(statement.params.iter()), |row| {
                    (0..width)
                        .map(|index| row.get::<_, Value>(index))
                        .collect::<rusqlite::Result<Vec<_>>>()
                })
                .optional()
            })
            .map_err(Into::into);
        log_execution(
            "fetch_by_key",
            &statement,
            started_at,
            result.as_ref().map(|row| usize::from(row.is_some())),
        );
        result
    }

    /// Runs a single-value aggregate such as `COUNT(*)`.
    pub fn count(&self, statement: &SqlStatement) -> RepoResult<u64> {
        let started_at = Instant::now();
        let result: RepoResult<u64> = self
            .conn
            .prepare_cached(&statement.sql)
            .and_then(|mut stmt| {
                stmt.query_row(params_from_iter(statement.params.iter()), |row| {
                    row.get::<_, i64>(0)
                })
            })
            .map(|count| u64::try_from(count).unwrap_or(0))
            .map_err(Into::into);
        log_execution("count", statement, started_at, result.as_ref().map(|_| 1));
        result
    }

    /// Runs a write statement and returns the affected row count.
    pub fn execute(&self, statement: &SqlStatement) -> RepoResult<usize> {
        let started_at = Instant::now();
        let result: RepoResult<usize> = self
            .conn
            .prepare_cached(&statement.sql)
            .and_then(|mut stmt| stmt.execute(params_from_iter(statement.params.iter())))
            .map_err(Into::into);
        log_execution("execute", statement, started_at, result.as_ref().copied());
        result
    }

    /// Inserts one row and returns its generated key.
    pub fn insert(&self, meta: &EntityMeta, id: Option<i64>, values: Vec<Value>) -> RepoResult<i64> {
        let mut params = Vec::with_capacity(meta.column_count());
        if let Some(id) = id {
            params.push(Value::Integer(id));
        }
        params.extend(values);
        let statement = SqlStatement::new(meta.insert_sql(id.is_some()), params);
        self.execute(&statement)?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Rewrites every non-key column of one row.
    pub fn update_row(&self, meta: &EntityMeta, id: i64, values: Vec<Value>) -> RepoResult<usize> {
        let mut params = values;
        params.push(Value::Integer(id));
        self.execute(&SqlStatement::new(meta.update_sql(), params))
    }

    pub fn delete_row(&self, meta: &EntityMeta, id: i64) -> RepoResult<usize> {
        self.execute(&SqlStatement::new(
            meta.delete_by_key_sql(),
            vec![Value::Integer(id)],
        ))
    }
}

fn log_execution<E: std::fmt::Display>(
    kind: &str,
    statement: &SqlStatement,
    started_at: Instant,
    outcome: Result<usize, &E>,
) {
    let duration_ms = started_at.elapsed().as_millis();
    match outcome {
        Ok(rows) => debug!(
            "event=query_execute module=query status=ok kind={kind} params={} rows={rows} duration_ms={duration_ms} sql=\"{}\"",
            statement.params.len(),
            statement.sql
        ),
        Err(err) => warn!(
            "event=query_execute module=query status=error kind={kind} params={} duration_ms={duration_ms} sql=\"{}\" error={err}",
            statement.params.len(),
            statement.sql
        ),
    }
}
