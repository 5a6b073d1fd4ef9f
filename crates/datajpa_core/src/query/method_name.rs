//! Repository method-name front end for query derivation.
//!
//! # Responsibility
//! - Turn names such as `findByUsernameAndAgeGreaterThan` into a
//!   `QueryDescriptor` plus the query subject.
//!
//! # Invariants
//! - Parsing never touches the store; field names are only checked later by
//!   `QueryPlan::derive`.
//! - Operator suffixes are matched longest first.

use super::descriptor::{Direction, Operator, QueryDescriptor};
use super::plan::ValidationError;
use once_cell::sync::Lazy;
use regex::Regex;

static METHOD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<subject>find|read|get|query|stream|count|exists|delete|remove)(?P<middle>[A-Za-z0-9]*?)By(?P<criteria>[A-Za-z0-9]*?)(?:OrderBy(?P<order>[A-Za-z0-9]+))?$",
    )
    .expect("valid method regex")
});

static LIMIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:Top|First)(?P<count>\d*)").expect("valid limit regex"));

static WORD_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Z][a-z0-9]*").expect("valid word regex"));

/// What the derived query returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Find,
    Count,
    Exists,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMethod {
    pub subject: Subject,
    pub descriptor: QueryDescriptor,
}

const OPERATOR_SUFFIXES: &[(&[&str], Operator)] = &[
    (&["Greater", "Than", "Equal"], Operator::GreaterThanEqual),
    (&["Less", "Than", "Equal"], Operator::LessThanEqual),
    (&["Is", "Not", "Null"], Operator::IsNotNull),
    (&["Greater", "Than"], Operator::GreaterThan),
    (&["Less", "Than"], Operator::LessThan),
    (&["Not", "Null"], Operator::IsNotNull),
    (&["Is", "Null"], Operator::IsNull),
    (&["Is", "Not"], Operator::NotEqual),
    (&["Equals"], Operator::Equal),
    (&["Like"], Operator::Like),
    (&["Null"], Operator::IsNull),
    (&["Not"], Operator::NotEqual),
    (&["Is"], Operator::Equal),
];

/// Parses a camelCase repository method name.
///
/// # Errors
/// - `ValidationError::InvalidMethodName` when the name does not follow the
///   `<subject>[TopN]By<criteria>[OrderBy<keys>]` shape.
pub fn parse_method_name(name: &str) -> Result<ParsedMethod, ValidationError> {
    let captures = METHOD_RE
        .captures(name)
        .ok_or_else(|| invalid(name, "expected <subject>By<criteria>"))?;

    let subject = match &captures["subject"] {
        "count" => Subject::Count,
        "exists" => Subject::Exists,
        "delete" | "remove" => Subject::Delete,
        _ => Subject::Find,
    };

    let mut descriptor = QueryDescriptor::new();
    let middle = &captures["middle"];
    if let Some(limit) = LIMIT_RE.captures(middle) {
        let count = match &limit["count"] {
            "" => 1,
            digits => digits
                .parse::<u32>()
                .map_err(|_| invalid(name, "result limit out of range"))?,
        };
        if count == 0 {
            return Err(invalid(name, "result limit must be positive"));
        }
        descriptor = descriptor.limit(count);
    }

    let criteria = split_words(name, &captures["criteria"])?;
    let segments = if criteria.is_empty() {
        Vec::new()
    } else {
        criteria
            .split(|word| *word == "And" || *word == "Or")
            .collect::<Vec<_>>()
    };
    for (position, segment) in segments.into_iter().enumerate() {
        if position > 0 {
            descriptor = match combinator_before(&criteria, position) {
                Some("Or") => descriptor.or(),
                _ => descriptor.and(),
            };
        }
        let (field_words, operator) = split_operator(segment);
        if field_words.is_empty() {
            return Err(invalid(name, "predicate without a field"));
        }
        descriptor = descriptor.by(snake_case(field_words), operator);
    }

    if let Some(order) = captures.name("order") {
        let words = split_words(name, order.as_str())?;
        let mut pending: Vec<&str> = Vec::new();
        for word in words {
            let direction = match word {
                "Asc" => Direction::Asc,
                "Desc" => Direction::Desc,
                _ => {
                    pending.push(word);
                    continue;
                }
            };
            if pending.is_empty() {
                return Err(invalid(name, "order direction without a field"));
            }
            descriptor = descriptor.order_by(snake_case(&pending), direction);
            pending.clear();
        }
        if !pending.is_empty() {
            descriptor = descriptor.order_by(snake_case(&pending), Direction::Asc);
        }
    }

    Ok(ParsedMethod {
        subject,
        descriptor,
    })
}

fn split_words<'a>(name: &str, part: &'a str) -> Result<Vec<&'a str>, ValidationError> {
    let words = WORD_RE
        .find_iter(part)
        .map(|word| word.as_str())
        .collect::<Vec<_>>();
    if words.concat() != part {
        return Err(invalid(name, "expected camelCase words"));
    }
    Ok(words)
}

/// Returns the combinator word that precedes the `position`-th segment.
fn combinator_before<'a>(words: &[&'a str], position: usize) -> Option<&'a str> {
    words
        .iter()
        .filter(|word| **word == "And" || **word == "Or")
        .nth(position - 1)
        .copied()
}

fn split_operator<'a, 'w>(segment: &'a [&'w str]) -> (&'a [&'w str], Operator) {
    for (suffix, operator) in OPERATOR_SUFFIXES {
        if segment.len() > suffix.len() && segment.ends_with(suffix) {
            return (&segment[..segment.len() - suffix.len()], *operator);
        }
    }
    (segment, Operator::Equal)
}

fn snake_case(words: &[&str]) -> String {
    words
        .iter()
        .map(|word| word.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("_")
}

fn invalid(name: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidMethodName {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}
