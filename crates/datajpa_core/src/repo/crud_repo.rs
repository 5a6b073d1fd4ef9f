//! Generic CRUD contract and its session-backed implementation.
//!
//! # Responsibility
//! - Provide `save/find/count/delete` for any mapped entity.
//! - Route every call through the caller's unit of work.
//!
//! # Invariants
//! - `find_by_id` reports a missing row as `Ok(None)`; only `get_by_id`
//!   raises `NotFound`.
//! - Construction fails when the entity's table or columns are missing.

use crate::entity::{Entity, EntityId, Managed, ID_FIELD};
use crate::error::RepoResult;
use crate::query::descriptor::{Operator, QueryDescriptor};
use crate::query::page::{Page, PageRequest};
use crate::query::plan::QueryPlan;
use crate::query::QueryHints;
use crate::session::Session;
use rusqlite::types::Value;

/// Repository contract shared by all entities.
pub trait CrudRepository<E: Entity> {
    /// Persists a transient entity or merges a detached one.
    fn save(&self, entity: E) -> RepoResult<Managed<E>>;
    fn find_by_id(&self, id: EntityId) -> RepoResult<Option<Managed<E>>>;
    fn get_by_id(&self, id: EntityId) -> RepoResult<Managed<E>>;
    fn exists_by_id(&self, id: EntityId) -> RepoResult<bool>;
    fn find_all(&self) -> RepoResult<Vec<Managed<E>>>;
    fn find_all_paged(&self, request: &PageRequest) -> RepoResult<Page<Managed<E>>>;
    fn count(&self) -> RepoResult<u64>;
    fn delete(&self, entity: &Managed<E>) -> RepoResult<()>;
    /// Returns whether a row was deleted.
    fn delete_by_id(&self, id: EntityId) -> RepoResult<bool>;
}

/// `CrudRepository` over a borrowed session.
pub struct SessionRepository<'s, E> {
    session: &'s Session,
    all: QueryPlan<E>,
    by_id: QueryPlan<E>,
}

impl<'s, E: Entity> SessionRepository<'s, E> {
    /// Constructs a repository after checking the entity's table mapping.
    pub fn try_new(session: &'s Session) -> RepoResult<Self> {
        session.ensure_mapped::<E>()?;
        Ok(Self {
            session,
            all: QueryPlan::all(),
            by_id: QueryPlan::derive(&QueryDescriptor::new().by(ID_FIELD, Operator::Equal))?,
        })
    }

    pub fn session(&self) -> &'s Session {
        self.session
    }
}

impl<E: Entity> CrudRepository<E> for SessionRepository<'_, E> {
    fn save(&self, entity: E) -> RepoResult<Managed<E>> {
        self.session.merge(entity)
    }

    fn find_by_id(&self, id: EntityId) -> RepoResult<Option<Managed<E>>> {
        self.session.find(id)
    }

    fn get_by_id(&self, id: EntityId) -> RepoResult<Managed<E>> {
        self.session.get(id)
    }

    fn exists_by_id(&self, id: EntityId) -> RepoResult<bool> {
        self.session.exists(&self.by_id.bind(&[Value::Integer(id)])?)
    }

    fn find_all(&self) -> RepoResult<Vec<Managed<E>>> {
        self.session.select(&self.all.bind(&[])?, QueryHints::default())
    }

    fn find_all_paged(&self, request: &PageRequest) -> RepoResult<Page<Managed<E>>> {
        self.session
            .find_page(&self.all.bind(&[])?, request, QueryHints::default())
    }

    fn count(&self) -> RepoResult<u64> {
        self.session.count(&self.all.bind(&[])?)
    }

    fn delete(&self, entity: &Managed<E>) -> RepoResult<()> {
        self.session.remove(entity)
    }

    fn delete_by_id(&self, id: EntityId) -> RepoResult<bool> {
        self.session.remove_by_id::<E>(id)
    }
}
