//! Structured query descriptors consumed by the plan builder.
//!
//! A descriptor is a flat clause sequence, e.g.
//! `username = ? AND age > ? ORDER BY username DESC`. It is not validated
//! here; `QueryPlan::derive` rejects malformed sequences.

use rusqlite::types::Value;
use serde::{Deserialize, Serialize};

/// Comparison operator applied to one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    Like,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// Number of values the operator consumes.
    pub fn arity(self) -> usize {
        match self {
            Self::IsNull | Self::IsNotNull => 0,
            _ => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Equal => "equal",
            Self::NotEqual => "not_equal",
            Self::GreaterThan => "greater_than",
            Self::GreaterThanEqual => "greater_than_equal",
            Self::LessThan => "less_than",
            Self::LessThanEqual => "less_than_equal",
            Self::Like => "like",
            Self::IsNull => "is_null",
            Self::IsNotNull => "is_not_null",
        }
    }

    pub(crate) fn sql(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "<>",
            Self::GreaterThan => ">",
            Self::GreaterThanEqual => ">=",
            Self::LessThan => "<",
            Self::LessThanEqual => "<=",
            Self::Like => "LIKE",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combinator {
    And,
    Or,
}

impl Combinator {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub(crate) fn sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// One element of a descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// `field <operator> value`; `literal: None` means a positional parameter.
    Predicate {
        field: String,
        operator: Operator,
        literal: Option<Value>,
    },
    Combine(Combinator),
    OrderBy {
        field: String,
        direction: Direction,
    },
}

/// Ordered clause sequence plus an optional row limit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryDescriptor {
    pub clauses: Vec<Clause>,
    pub limit: Option<u32>,
}

impl QueryDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_clauses(clauses: Vec<Clause>) -> Self {
        Self {
            clauses,
            limit: None,
        }
    }

    /// Appends a predicate whose value is bound at execution time.
    pub fn by(mut self, field: impl Into<String>, operator: Operator) -> Self {
        self.clauses.push(Clause::Predicate {
            field: field.into(),
            operator,
            literal: None,
        });
        self
    }

    /// Appends a predicate with a fixed value (still bound as a placeholder).
    pub fn by_literal(
        mut self,
        field: impl Into<String>,
        operator: Operator,
        literal: impl Into<Value>,
    ) -> Self {
        self.clauses.push(Clause::Predicate {
            field: field.into(),
            operator,
            literal: Some(literal.into()),
        });
        self
    }

    pub fn and(mut self) -> Self {
        self.clauses.push(Clause::Combine(Combinator::And));
        self
    }

    pub fn or(mut self) -> Self {
        self.clauses.push(Clause::Combine(Combinator::Or));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.clauses.push(Clause::OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}
