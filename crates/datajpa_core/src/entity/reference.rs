//! Association references between entities.
//!
//! # Responsibility
//! - Represent to-one associations as `Unresolved(key) | Resolved(handle)`.
//! - Represent inverse to-many associations as lazily loaded collections.
//!
//! # Invariants
//! - Unresolved references hold only a weak link to their session; resolving
//!   after the session ended yields `RepoError::StaleAccess`.
//! - Once resolved, a reference keeps its handle for the rest of its life.

use super::{Entity, EntityId, Managed};
use crate::error::{RepoError, RepoResult};
use crate::query::descriptor::{Operator, QueryDescriptor};
use crate::query::plan::QueryPlan;
use crate::query::QueryHints;
use crate::session::{SessionId, SessionState};
use log::debug;
use rusqlite::types::Value;
use std::cell::RefCell;
use std::fmt::{Debug, Formatter};
use std::rc::{Rc, Weak};
use uuid::Uuid;

/// Session binding handed to `Entity::from_values` so loaded entities can
/// create lazy associations.
#[derive(Clone)]
pub struct LoadContext {
    session: Weak<SessionState>,
    session_id: SessionId,
}

impl LoadContext {
    pub(crate) fn new(session: &Rc<SessionState>) -> Self {
        Self {
            session: Rc::downgrade(session),
            session_id: session.id(),
        }
    }

    /// Context with no session. References created from it can never resolve.
    pub fn detached() -> Self {
        Self {
            session: Weak::new(),
            session_id: Uuid::nil(),
        }
    }

    pub fn reference<T: Entity>(&self, id: EntityId) -> LazyRef<T> {
        LazyRef {
            state: RefCell::new(RefState::Unresolved {
                id,
                session: self.session.clone(),
                session_id: self.session_id,
            }),
        }
    }

    /// Inverse collection of `T` whose `mapped_by` field points at `owner_id`.
    pub fn collection<T: Entity>(&self, owner_id: EntityId, mapped_by: &'static str) -> LazyCollection<T> {
        LazyCollection {
            state: RefCell::new(CollectionState::Unresolved {
                owner_id,
                mapped_by,
                session: self.session.clone(),
                session_id: self.session_id,
            }),
        }
    }
}

enum RefState<T> {
    Unresolved {
        id: EntityId,
        session: Weak<SessionState>,
        session_id: SessionId,
    },
    Resolved(Managed<T>),
}

/// Owning to-one association.
pub struct LazyRef<T: Entity> {
    state: RefCell<RefState<T>>,
}

impl<T: Entity> LazyRef<T> {
    /// Reference to an in-memory instance (resolved from the start).
    pub fn to(target: &Managed<T>) -> Self {
        Self {
            state: RefCell::new(RefState::Resolved(target.clone())),
        }
    }

    /// Key of the referenced row, `None` when the target is still transient.
    pub fn id(&self) -> Option<EntityId> {
        match &*self.state.borrow() {
            RefState::Unresolved { id, .. } => Some(*id),
            RefState::Resolved(handle) => handle.id(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(&*self.state.borrow(), RefState::Resolved(_))
    }

    /// Returns the target, fetching it by key on first use.
    ///
    /// # Errors
    /// - `StaleAccess` when the owning session has ended.
    /// - `NotFound` when the referenced row no longer exists.
    pub fn resolve(&self) -> RepoResult<Managed<T>> {
        let (id, session, session_id) = match &*self.state.borrow() {
            RefState::Resolved(handle) => return Ok(handle.clone()),
            RefState::Unresolved {
                id,
                session,
                session_id,
            } => (*id, session.clone(), *session_id),
        };

        let stale = || RepoError::StaleAccess {
            entity: T::meta().name,
            id,
            session: session_id,
        };
        let state = session.upgrade().ok_or_else(stale)?;
        if !state.is_open() {
            return Err(stale());
        }

        debug!(
            "event=lazy_load module=entity status=start entity={} session={session_id}",
            T::meta().name
        );
        let handle = state
            .find::<T>(id, QueryHints::default())?
            .ok_or(RepoError::NotFound {
                entity: T::meta().name,
                id,
            })?;
        *self.state.borrow_mut() = RefState::Resolved(handle.clone());
        Ok(handle)
    }

    pub(crate) fn resolve_with(&self, target: Managed<T>) {
        *self.state.borrow_mut() = RefState::Resolved(target);
    }
}

impl<T: Entity> Clone for LazyRef<T> {
    fn clone(&self) -> Self {
        let state = match &*self.state.borrow() {
            RefState::Unresolved {
                id,
                session,
                session_id,
            } => RefState::Unresolved {
                id: *id,
                session: session.clone(),
                session_id: *session_id,
            },
            RefState::Resolved(handle) => RefState::Resolved(handle.clone()),
        };
        Self {
            state: RefCell::new(state),
        }
    }
}

impl<T: Entity> PartialEq for LazyRef<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self.id(), other.id()) {
            (Some(left), Some(right)) => left == right,
            (None, None) => match (&*self.state.borrow(), &*other.state.borrow()) {
                (RefState::Resolved(left), RefState::Resolved(right)) => {
                    Managed::same_instance(left, right)
                }
                _ => false,
            },
            _ => false,
        }
    }
}

impl<T: Entity> Debug for LazyRef<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyRef")
            .field("entity", &T::meta().name)
            .field("id", &self.id())
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Relation descriptor used by eager joined fetches.
pub struct ToOne<O, T: Entity> {
    /// Logical field on the owner holding the foreign key.
    pub field: &'static str,
    pub reference: fn(&O) -> Option<&LazyRef<T>>,
}

enum CollectionState<T> {
    Unresolved {
        owner_id: EntityId,
        mapped_by: &'static str,
        session: Weak<SessionState>,
        session_id: SessionId,
    },
    Resolved(Vec<Managed<T>>),
}

/// Inverse (non-owning) to-many association.
///
/// The collection is read-only from the owner's point of view: changing a
/// member's team is done on the member side and is visible here only after the
/// collection is loaded again in a later unit of work.
pub struct LazyCollection<T: Entity> {
    state: RefCell<CollectionState<T>>,
}

impl<T: Entity> LazyCollection<T> {
    /// Empty, already-resolved collection for transient owners.
    pub fn empty() -> Self {
        Self {
            state: RefCell::new(CollectionState::Resolved(Vec::new())),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(&*self.state.borrow(), CollectionState::Resolved(_))
    }

    /// Loads the collection on first use.
    ///
    /// # Errors
    /// - `StaleAccess` when the owning session has ended.
    pub fn resolve(&self) -> RepoResult<Vec<Managed<T>>> {
        let (owner_id, mapped_by, session, session_id) = match &*self.state.borrow() {
            CollectionState::Resolved(items) => return Ok(items.clone()),
            CollectionState::Unresolved {
                owner_id,
                mapped_by,
                session,
                session_id,
            } => (*owner_id, *mapped_by, session.clone(), *session_id),
        };

        let stale = || RepoError::StaleAccess {
            entity: T::meta().name,
            id: owner_id,
            session: session_id,
        };
        let state = session.upgrade().ok_or_else(stale)?;
        if !state.is_open() {
            return Err(stale());
        }

        let plan = QueryPlan::<T>::derive(&QueryDescriptor::new().by_literal(
            mapped_by,
            Operator::Equal,
            Value::Integer(owner_id),
        ))?;
        let items = state.select(&plan.bind(&[])?, QueryHints::default())?;
        *self.state.borrow_mut() = CollectionState::Resolved(items.clone());
        Ok(items)
    }
}

impl<T: Entity> Default for LazyCollection<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T: Entity> Clone for LazyCollection<T> {
    fn clone(&self) -> Self {
        let state = match &*self.state.borrow() {
            CollectionState::Unresolved {
                owner_id,
                mapped_by,
                session,
                session_id,
            } => CollectionState::Unresolved {
                owner_id: *owner_id,
                mapped_by: *mapped_by,
                session: session.clone(),
                session_id: *session_id,
            },
            CollectionState::Resolved(items) => CollectionState::Resolved(items.clone()),
        };
        Self {
            state: RefCell::new(state),
        }
    }
}

impl<T: Entity> Debug for LazyCollection<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &*self.state.borrow() {
            CollectionState::Unresolved { .. } => write!(f, "LazyCollection<{}>(unresolved)", T::meta().name),
            CollectionState::Resolved(items) => {
                write!(f, "LazyCollection<{}>(len={})", T::meta().name, items.len())
            }
        }
    }
}
