//! Repository contracts and their session-backed implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts per entity.
//! - Keep SQL and plan details out of service orchestration.
//!
//! # Invariants
//! - Repositories borrow a `Session`; they never own a connection.
//! - Query plans are derived at construction, so configuration errors
//!   surface before the first call.

pub mod crud_repo;
pub mod member_repo;
pub mod team_repo;
