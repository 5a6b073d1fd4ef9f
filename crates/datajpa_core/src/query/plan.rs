//! Query plan construction, validation and SQL rendering.
//!
//! # Responsibility
//! - Translate a `QueryDescriptor` into a typed, executable `QueryPlan<E>`.
//! - Reject unknown fields, type mismatches and malformed clause sequences
//!   when the plan is built, before any store access.
//! - Bind execution parameters and render placeholder-only SQL.
//!
//! # Invariants
//! - Values never appear in SQL text; every value is a numbered placeholder.
//! - `AND` binds tighter than `OR`, matching SQL precedence.

use super::descriptor::{Clause, Combinator, Direction, Operator, QueryDescriptor};
use super::executor::SqlStatement;
use super::page::Sort;
use crate::entity::{qualify, value_kind_name, Entity, EntityMeta, FieldKind, FieldMeta};
use rusqlite::types::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

/// Translation-time failure. Always raised before the store is touched.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    UnknownField {
        entity: &'static str,
        field: String,
    },
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
    UnsupportedOperator {
        field: String,
        operator: &'static str,
    },
    MalformedClauses(String),
    ParameterCount {
        expected: usize,
        found: usize,
    },
    InvalidPageRequest(String),
    InvalidMethodName {
        name: String,
        reason: String,
    },
    InvalidAssignment {
        field: String,
        reason: String,
    },
    /// An owning reference points at an entity that has no key yet.
    UnsavedReference {
        entity: &'static str,
        field: &'static str,
    },
    /// The operation needs a persisted entity but got a transient one.
    TransientEntity {
        entity: &'static str,
    },
    /// A persisted instance that is not the one managed by this session.
    DetachedEntity {
        entity: &'static str,
        id: i64,
    },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownField { entity, field } => {
                write!(f, "unknown field `{field}` on {entity}")
            }
            Self::TypeMismatch {
                field,
                expected,
                found,
            } => write!(f, "field `{field}` expects {expected}, got {found}"),
            Self::UnsupportedOperator { field, operator } => {
                write!(f, "operator {operator} is not applicable to field `{field}`")
            }
            Self::MalformedClauses(message) => write!(f, "malformed clause sequence: {message}"),
            Self::ParameterCount { expected, found } => {
                write!(f, "query expects {expected} parameters, got {found}")
            }
            Self::InvalidPageRequest(message) => write!(f, "invalid page request: {message}"),
            Self::InvalidMethodName { name, reason } => {
                write!(f, "cannot derive query from `{name}`: {reason}")
            }
            Self::InvalidAssignment { field, reason } => {
                write!(f, "invalid assignment to `{field}`: {reason}")
            }
            Self::UnsavedReference { entity, field } => write!(
                f,
                "{entity}.{field} references an entity that has not been persisted"
            ),
            Self::TransientEntity { entity } => {
                write!(f, "{entity} has not been persisted")
            }
            Self::DetachedEntity { entity, id } => {
                write!(f, "{entity}#{id} is detached; merge it instead")
            }
        }
    }
}

impl Error for ValidationError {}

#[derive(Debug, Clone, PartialEq)]
struct PlannedPredicate {
    field: FieldMeta,
    operator: Operator,
    literal: Option<Value>,
}

/// Sort key resolved against entity metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PlannedSort {
    pub(crate) column: &'static str,
    pub(crate) direction: Direction,
}

/// Row window appended to a select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window {
    pub(crate) offset: u64,
    pub(crate) limit: u64,
}

/// Validated, reusable query against the table of `E`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan<E> {
    meta: &'static EntityMeta,
    predicates: Vec<PlannedPredicate>,
    combinators: Vec<Combinator>,
    order: Vec<PlannedSort>,
    limit: Option<u32>,
    parameters: Vec<FieldMeta>,
    _entity: PhantomData<fn() -> E>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Last {
    Start,
    Predicate,
    Combinator,
    Order,
}

impl<E: Entity> QueryPlan<E> {
    /// Plan matching every row, in storage order.
    pub fn all() -> Self {
        Self {
            meta: E::meta(),
            predicates: Vec::new(),
            combinators: Vec::new(),
            order: Vec::new(),
            limit: None,
            parameters: Vec::new(),
            _entity: PhantomData,
        }
    }

    /// Builds a plan from a descriptor.
    ///
    /// # Errors
    /// - `UnknownField`, `TypeMismatch`, `UnsupportedOperator` for bad predicates.
    /// - `MalformedClauses` for combinator/predicate/order sequencing errors.
    pub fn derive(descriptor: &QueryDescriptor) -> Result<Self, ValidationError> {
        let mut plan = Self::all();
        plan.limit = descriptor.limit;
        if descriptor.limit == Some(0) {
            return Err(ValidationError::MalformedClauses(
                "result limit must be positive".to_string(),
            ));
        }

        let mut last = Last::Start;
        for (position, clause) in descriptor.clauses.iter().enumerate() {
            match clause {
                Clause::Predicate {
                    field,
                    operator,
                    literal,
                } => {
                    match last {
                        Last::Predicate => {
                            return Err(malformed(position, "predicate must follow a combinator"))
                        }
                        Last::Order => {
                            return Err(malformed(position, "predicate after order clause"))
                        }
                        Last::Start | Last::Combinator => {}
                    }
                    plan.push_predicate(field, *operator, literal.as_ref())?;
                    last = Last::Predicate;
                }
                Clause::Combine(combinator) => {
                    if last != Last::Predicate {
                        return Err(malformed(position, "combinator must follow a predicate"));
                    }
                    plan.combinators.push(*combinator);
                    last = Last::Combinator;
                }
                Clause::OrderBy { field, direction } => {
                    if last == Last::Combinator {
                        return Err(malformed(position, "combinator is not followed by a predicate"));
                    }
                    let resolved = resolve_field(plan.meta, field)?;
                    plan.order.push(PlannedSort {
                        column: resolved.column,
                        direction: *direction,
                    });
                    last = Last::Order;
                }
            }
        }

        if last == Last::Combinator {
            return Err(ValidationError::MalformedClauses(
                "trailing combinator".to_string(),
            ));
        }
        Ok(plan)
    }

    fn push_predicate(
        &mut self,
        field: &str,
        operator: Operator,
        literal: Option<&Value>,
    ) -> Result<(), ValidationError> {
        let resolved = resolve_field(self.meta, field)?;
        let applicable = match operator {
            Operator::Like => resolved.kind == FieldKind::Text,
            Operator::IsNull | Operator::IsNotNull => resolved.nullable,
            _ => true,
        };
        if !applicable {
            return Err(ValidationError::UnsupportedOperator {
                field: field.to_string(),
                operator: operator.name(),
            });
        }

        match (operator.arity(), literal) {
            (0, Some(_)) => {
                return Err(ValidationError::MalformedClauses(format!(
                    "operator {} on `{field}` takes no value",
                    operator.name()
                )))
            }
            (_, Some(value)) => check_kind(&resolved, value)?,
            (0, None) => {}
            (_, None) => self.parameters.push(resolved),
        }

        self.predicates.push(PlannedPredicate {
            field: resolved,
            operator,
            literal: literal.cloned(),
        });
        Ok(())
    }

    pub fn meta(&self) -> &'static EntityMeta {
        self.meta
    }

    /// Number of values `bind` expects.
    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// Binds positional parameters in predicate order.
    ///
    /// # Errors
    /// - `ParameterCount` when arity differs.
    /// - `TypeMismatch` when a value does not fit its field.
    pub fn bind(&self, params: &[Value]) -> Result<BoundQuery<'_, E>, ValidationError> {
        if params.len() != self.parameters.len() {
            return Err(ValidationError::ParameterCount {
                expected: self.parameters.len(),
                found: params.len(),
            });
        }
        for (field, value) in self.parameters.iter().zip(params) {
            check_kind(field, value)?;
        }

        let mut supplied = params.iter();
        let mut values = Vec::with_capacity(self.predicates.len());
        for predicate in &self.predicates {
            if predicate.operator.arity() == 0 {
                continue;
            }
            let value = match &predicate.literal {
                Some(literal) => literal.clone(),
                // Arity was checked above, so a supplied value always exists.
                None => supplied.next().cloned().unwrap_or(Value::Null),
            };
            values.push(value);
        }

        Ok(BoundQuery { plan: self, values })
    }

    /// Select SQL with placeholders, for diagnostics.
    pub fn to_sql(&self) -> String {
        render_select(self, None, &self.meta.select_list(None), self.meta.table, &[], None, 0).0
    }

    /// Renders the filter, numbering placeholders from `first_index`.
    pub(crate) fn where_sql(&self, alias: Option<&str>, first_index: usize) -> Option<String> {
        if self.predicates.is_empty() {
            return None;
        }
        let mut next_index = first_index;
        let mut sql = String::new();
        for (position, predicate) in self.predicates.iter().enumerate() {
            if position > 0 {
                sql.push(' ');
                sql.push_str(self.combinators[position - 1].sql());
                sql.push(' ');
            }
            sql.push_str(&qualify(alias, predicate.field.column));
            sql.push(' ');
            sql.push_str(predicate.operator.sql());
            if predicate.operator.arity() == 1 {
                sql.push_str(&format!(" ?{next_index}"));
                next_index += 1;
            }
        }
        Some(sql)
    }
}

/// Plan plus the values for its placeholders.
#[derive(Debug, Clone)]
pub struct BoundQuery<'p, E> {
    plan: &'p QueryPlan<E>,
    values: Vec<Value>,
}

impl<E: Entity> BoundQuery<'_, E> {
    pub fn plan(&self) -> &QueryPlan<E> {
        self.plan
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub(crate) fn select_statement(
        &self,
        extra_sort: &[PlannedSort],
        window: Option<Window>,
    ) -> SqlStatement {
        let meta = self.plan.meta;
        let (sql, window_values) = render_select(
            self.plan,
            None,
            &meta.select_list(None),
            meta.table,
            extra_sort,
            window,
            self.values.len(),
        );
        self.statement(sql, window_values)
    }

    /// `owner LEFT JOIN target` select; owner columns come first.
    pub(crate) fn joined_statement(
        &self,
        target: &'static EntityMeta,
        fk_column: &str,
    ) -> SqlStatement {
        let meta = self.plan.meta;
        let select_list = format!(
            "{}, {}",
            meta.select_list(Some(OWNER_ALIAS)),
            target.select_list(Some(TARGET_ALIAS))
        );
        let from = format!(
            "{} {OWNER_ALIAS} LEFT JOIN {} {TARGET_ALIAS} ON {TARGET_ALIAS}.{} = {OWNER_ALIAS}.{fk_column}",
            meta.table, target.table, target.id_column
        );
        let (sql, window_values) = render_select(
            self.plan,
            Some(OWNER_ALIAS),
            &select_list,
            &from,
            &[],
            None,
            self.values.len(),
        );
        self.statement(sql, window_values)
    }

    /// `COUNT(*)` over the same filter, without ordering or windowing.
    pub(crate) fn count_statement(&self) -> SqlStatement {
        let mut sql = format!("SELECT COUNT(*) FROM {}", self.plan.meta.table);
        if let Some(filter) = self.plan.where_sql(None, 1) {
            sql.push_str(" WHERE ");
            sql.push_str(&filter);
        }
        SqlStatement::new(sql, self.values.clone())
    }

    pub(crate) fn delete_statement(&self) -> SqlStatement {
        let mut sql = format!("DELETE FROM {}", self.plan.meta.table);
        if let Some(filter) = self.plan.where_sql(None, 1) {
            sql.push_str(" WHERE ");
            sql.push_str(&filter);
        }
        SqlStatement::new(sql, self.values.clone())
    }

    fn statement(&self, sql: String, window_values: Vec<Value>) -> SqlStatement {
        let mut params = self.values.clone();
        params.extend(window_values);
        SqlStatement::new(sql, params)
    }
}

const OWNER_ALIAS: &str = "o";
const TARGET_ALIAS: &str = "t";

fn render_select<E: Entity>(
    plan: &QueryPlan<E>,
    alias: Option<&str>,
    select_list: &str,
    from: &str,
    extra_sort: &[PlannedSort],
    window: Option<Window>,
    bound_count: usize,
) -> (String, Vec<Value>) {
    let mut sql = format!("SELECT {select_list} FROM {from}");
    if let Some(filter) = plan.where_sql(alias, 1) {
        sql.push_str(" WHERE ");
        sql.push_str(&filter);
    }

    let order = plan
        .order
        .iter()
        .chain(extra_sort)
        .map(|sort| format!("{} {}", qualify(alias, sort.column), sort.direction.sql()))
        .collect::<Vec<_>>();
    if !order.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));
    }

    let mut window_values = Vec::new();
    let next_index = bound_count + 1;
    match (window, plan.limit) {
        (Some(window), _) => {
            sql.push_str(&format!(" LIMIT ?{next_index} OFFSET ?{}", next_index + 1));
            window_values.push(Value::Integer(to_sql_integer(window.limit)));
            window_values.push(Value::Integer(to_sql_integer(window.offset)));
        }
        (None, Some(limit)) => {
            sql.push_str(&format!(" LIMIT ?{next_index}"));
            window_values.push(Value::Integer(i64::from(limit)));
        }
        (None, None) => {}
    }
    (sql, window_values)
}

fn to_sql_integer(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Resolves request-level sort keys against entity metadata.
pub(crate) fn resolve_sort(
    meta: &'static EntityMeta,
    sort: &Sort,
) -> Result<Vec<PlannedSort>, ValidationError> {
    sort.orders()
        .iter()
        .map(|order| {
            resolve_field(meta, &order.field).map(|field| PlannedSort {
                column: field.column,
                direction: order.direction,
            })
        })
        .collect()
}

pub(crate) fn resolve_field(
    meta: &'static EntityMeta,
    field: &str,
) -> Result<FieldMeta, ValidationError> {
    meta.field(field).ok_or_else(|| ValidationError::UnknownField {
        entity: meta.name,
        field: field.to_string(),
    })
}

pub(crate) fn check_kind(field: &FieldMeta, value: &Value) -> Result<(), ValidationError> {
    if field.kind.accepts(value) {
        return Ok(());
    }
    Err(ValidationError::TypeMismatch {
        field: field.name.to_string(),
        expected: field.kind.name(),
        found: value_kind_name(value),
    })
}

fn malformed(position: usize, message: &str) -> ValidationError {
    ValidationError::MalformedClauses(format!("{message} (clause {position})"))
}
