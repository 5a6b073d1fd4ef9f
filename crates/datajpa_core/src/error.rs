//! Repository-level error kinds shared by sessions, queries and repositories.
//!
//! # Responsibility
//! - Classify store failures into constraint, connectivity and generic kinds.
//! - Carry translation-time validation failures unchanged to callers.
//!
//! # Invariants
//! - Validation errors are raised before any SQL reaches the store.
//! - Execution errors propagate unchanged; nothing here retries or suppresses.

use crate::db::DbError;
use crate::entity::EntityId;
use crate::query::plan::ValidationError;
use crate::session::SessionId;
use rusqlite::ErrorCode;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Error kinds surfaced by persistence operations.
#[derive(Debug)]
pub enum RepoError {
    /// A required lookup by key found no row.
    NotFound { entity: &'static str, id: EntityId },
    /// Descriptor, binding, page request or entity state rejected before execution.
    Validation(ValidationError),
    /// The store rejected a write (FK, NOT NULL, UNIQUE, CHECK).
    ConstraintViolation(DbError),
    /// The store could not be reached or is locked/corrupt.
    Connectivity(DbError),
    /// A lazy association was resolved after its unit of work ended.
    StaleAccess {
        entity: &'static str,
        id: EntityId,
        session: SessionId,
    },
    /// A managed instance was mutably borrowed while its changes had to be written.
    EntityBusy { entity: &'static str, id: EntityId },
    /// A tracked instance's row no longer exists in the store.
    StaleState { entity: &'static str, id: EntityId },
    /// Connection schema is not at the expected version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Any other store failure.
    Db(DbError),
    /// Persisted data cannot be mapped to the target shape.
    InvalidData(String),
}

impl RepoError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::ConstraintViolation(err) => write!(f, "constraint violation: {err}"),
            Self::Connectivity(err) => write!(f, "store unavailable: {err}"),
            Self::StaleAccess {
                entity,
                id,
                session,
            } => write!(
                f,
                "access outside active session: {entity}#{id} belongs to closed session {session}"
            ),
            Self::EntityBusy { entity, id } => write!(
                f,
                "{entity}#{id} is borrowed mutably and cannot be flushed"
            ),
            Self::StaleState { entity, id } => {
                write!(f, "{entity}#{id} was removed from the store by another statement")
            }
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "session requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => write!(f, "missing required table `{table}`"),
            Self::MissingRequiredColumn { table, column } => {
                write!(f, "missing required column `{table}.{column}`")
            }
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::ConstraintViolation(err) | Self::Connectivity(err) | Self::Db(err) => Some(err),
            Self::NotFound { .. }
            | Self::StaleAccess { .. }
            | Self::EntityBusy { .. }
            | Self::StaleState { .. }
            | Self::UninitializedConnection { .. }
            | Self::MissingRequiredTable(_)
            | Self::MissingRequiredColumn { .. }
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        match value.sqlite_code() {
            Some(ErrorCode::ConstraintViolation) => Self::ConstraintViolation(value),
            Some(
                ErrorCode::CannotOpen
                | ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::NotADatabase
                | ErrorCode::DatabaseCorrupt
                | ErrorCode::SystemIoFailure
                | ErrorCode::PermissionDenied
                | ErrorCode::ReadOnly,
            ) => Self::Connectivity(value),
            _ => Self::Db(value),
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::from(DbError::Sqlite(value))
    }
}

#[cfg(test)]
mod tests {
    use super::RepoError;
    use rusqlite::ffi;

    fn sqlite_failure(code: i32) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(code), None)
    }

    #[test]
    fn constraint_failures_are_classified() {
        let err = RepoError::from(sqlite_failure(ffi::SQLITE_CONSTRAINT));
        assert!(matches!(err, RepoError::ConstraintViolation(_)));
    }

    #[test]
    fn busy_and_open_failures_are_connectivity() {
        assert!(matches!(
            RepoError::from(sqlite_failure(ffi::SQLITE_BUSY)),
            RepoError::Connectivity(_)
        ));
        assert!(matches!(
            RepoError::from(sqlite_failure(ffi::SQLITE_CANTOPEN)),
            RepoError::Connectivity(_)
        ));
    }

    #[test]
    fn other_failures_stay_generic() {
        let err = RepoError::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, RepoError::Db(_)));
    }
}
