//! Mapped domain model: members, teams and the member projection.
//!
//! # Responsibility
//! - Define the entities persisted by the core and their table mappings.
//! - Define read-only projections shaped from those entities.
//!
//! # Invariants
//! - Every entity is identified by its generated `id` once persisted.
//! - `Member` owns the member/team association; `Team.members` is the
//!   inverse side and is never written through.

pub mod member;
pub mod member_dto;
pub mod team;
