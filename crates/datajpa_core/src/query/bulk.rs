//! Set-based update and delete statements.
//!
//! # Responsibility
//! - Build validated `UPDATE ... SET ... WHERE` / `DELETE ... WHERE`
//!   statements from a filter plan.
//!
//! # Invariants
//! - Bulk statements never load rows and never touch the identity map.
//!   Instances already loaded keep their old values until the cache is
//!   cleared.
//! - The primary key cannot be assigned.

use super::executor::SqlStatement;
use super::plan::{check_kind, resolve_field, QueryPlan, ValidationError};
use crate::entity::{Entity, EntityMeta, FieldKind, FieldMeta, ID_FIELD};
use rusqlite::types::Value;

/// Change applied to one column of every matched row.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignment {
    Set(Value),
    /// `column = column + n` on an integer column.
    Increment(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkKind {
    Update,
    Delete,
}

impl BulkKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// A set-based statement ready to be bound and executed.
pub trait BulkMutation {
    fn entity(&self) -> &'static EntityMeta;
    fn kind(&self) -> BulkKind;
    /// Binds filter parameters and renders the statement.
    fn statement(&self, params: &[Value]) -> Result<SqlStatement, ValidationError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkUpdate<E> {
    filter: QueryPlan<E>,
    assignments: Vec<(FieldMeta, Assignment)>,
}

impl<E: Entity> BulkUpdate<E> {
    pub fn new(filter: QueryPlan<E>) -> Self {
        Self {
            filter,
            assignments: Vec::new(),
        }
    }

    /// Adds one assignment.
    ///
    /// # Errors
    /// - `UnknownField` for unmapped fields.
    /// - `InvalidAssignment` for the key, `NULL` on a required field, or an
    ///   increment on a non-integer field.
    /// - `TypeMismatch` when a set value does not fit the field.
    pub fn set(mut self, field: &str, assignment: Assignment) -> Result<Self, ValidationError> {
        let resolved = resolve_field(E::meta(), field)?;
        let reject = |reason: &str| ValidationError::InvalidAssignment {
            field: field.to_string(),
            reason: reason.to_string(),
        };
        if resolved.name == ID_FIELD {
            return Err(reject("primary key cannot be assigned"));
        }
        match &assignment {
            Assignment::Set(Value::Null) if !resolved.nullable => {
                return Err(reject("field is not nullable"))
            }
            Assignment::Set(Value::Null) => {}
            Assignment::Set(value) => check_kind(&resolved, value)?,
            Assignment::Increment(_) if resolved.kind != FieldKind::Integer => {
                return Err(reject("increment needs an integer field"))
            }
            Assignment::Increment(_) => {}
        }
        self.assignments.push((resolved, assignment));
        Ok(self)
    }

    pub fn filter(&self) -> &QueryPlan<E> {
        &self.filter
    }
}

impl<E: Entity> BulkMutation for BulkUpdate<E> {
    fn entity(&self) -> &'static EntityMeta {
        E::meta()
    }

    fn kind(&self) -> BulkKind {
        BulkKind::Update
    }

    fn statement(&self, params: &[Value]) -> Result<SqlStatement, ValidationError> {
        if self.assignments.is_empty() {
            return Err(ValidationError::InvalidAssignment {
                field: String::new(),
                reason: "bulk update needs at least one assignment".to_string(),
            });
        }
        let bound = self.filter.bind(params)?;

        let mut values = Vec::with_capacity(self.assignments.len() + bound.values().len());
        let mut clauses = Vec::with_capacity(self.assignments.len());
        for (index, (field, assignment)) in self.assignments.iter().enumerate() {
            let placeholder = index + 1;
            let column = field.column;
            match assignment {
                Assignment::Set(value) => {
                    clauses.push(format!("{column} = ?{placeholder}"));
                    values.push(value.clone());
                }
                Assignment::Increment(delta) => {
                    clauses.push(format!("{column} = {column} + ?{placeholder}"));
                    values.push(Value::Integer(*delta));
                }
            }
        }

        let mut sql = format!("UPDATE {} SET {}", E::meta().table, clauses.join(", "));
        if let Some(filter) = self.filter.where_sql(None, self.assignments.len() + 1) {
            sql.push_str(" WHERE ");
            sql.push_str(&filter);
        }
        values.extend_from_slice(bound.values());
        Ok(SqlStatement::new(sql, values))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BulkDelete<E> {
    filter: QueryPlan<E>,
}

impl<E: Entity> BulkDelete<E> {
    pub fn new(filter: QueryPlan<E>) -> Self {
        Self { filter }
    }
}

impl<E: Entity> BulkMutation for BulkDelete<E> {
    fn entity(&self) -> &'static EntityMeta {
        E::meta()
    }

    fn kind(&self) -> BulkKind {
        BulkKind::Delete
    }

    fn statement(&self, params: &[Value]) -> Result<SqlStatement, ValidationError> {
        Ok(self.filter.bind(params)?.delete_statement())
    }
}
