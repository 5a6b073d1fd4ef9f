//! Per-session identity map with snapshot-based change tracking.
//!
//! # Responsibility
//! - Hold at most one managed instance per `(table, id)`.
//! - Remember the column values an instance had when it was loaded or last
//!   flushed, so flush can write only what changed.
//!
//! # Invariants
//! - Entries registered without a snapshot (read-only) are never reported
//!   dirty.
//! - Dirty checks never panic on an instance the caller holds mutably.
//! - The map is owned by exactly one session and is never shared.

use crate::entity::{Entity, EntityId, EntityMeta, Managed};
use crate::error::{RepoError, RepoResult};
use log::debug;
use rusqlite::types::Value;
use std::any::Any;
use std::collections::BTreeMap;

/// Cache key: table name plus primary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    pub table: &'static str,
    pub id: EntityId,
}

impl EntityKey {
    pub fn of<E: Entity>(id: EntityId) -> Self {
        Self {
            table: E::meta().table,
            id,
        }
    }
}

/// What a dirty check does with an instance that is currently borrowed mutably.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BusyEntries {
    /// Leave it dirty for a later flush.
    Defer,
    /// Fail with `RepoError::EntityBusy`.
    Reject,
}

/// Row write produced by a dirty check.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PendingUpdate {
    pub(crate) key: EntityKey,
    pub(crate) meta: &'static EntityMeta,
    pub(crate) values: Vec<Value>,
}

trait CacheEntry {
    fn as_any(&self) -> &dyn Any;
    fn meta(&self) -> &'static EntityMeta;
    fn is_read_only(&self) -> bool;
    /// Current values when they differ from the snapshot.
    ///
    /// Fails with `EntityBusy` when the instance is borrowed mutably.
    fn changed_values(&self, id: EntityId) -> RepoResult<Option<Vec<Value>>>;
    fn mark_clean(&mut self, values: Vec<Value>);
}

struct TrackedEntry<E> {
    handle: Managed<E>,
    snapshot: Option<Vec<Value>>,
}

impl<E: Entity> CacheEntry for TrackedEntry<E> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn meta(&self) -> &'static EntityMeta {
        E::meta()
    }

    fn is_read_only(&self) -> bool {
        self.snapshot.is_none()
    }

    fn changed_values(&self, id: EntityId) -> RepoResult<Option<Vec<Value>>> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(None);
        };
        let current = self
            .handle
            .try_borrow()
            .ok_or(RepoError::EntityBusy {
                entity: E::meta().name,
                id,
            })?
            .to_values()?;
        Ok((&current != snapshot).then_some(current))
    }

    fn mark_clean(&mut self, values: Vec<Value>) {
        if self.snapshot.is_some() {
            self.snapshot = Some(values);
        }
    }
}

/// Identity map for one unit of work.
#[derive(Default)]
pub struct IdentityMap {
    entries: BTreeMap<EntityKey, Box<dyn CacheEntry>>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<E: Entity>(&self, id: EntityId) -> Option<Managed<E>> {
        self.entries
            .get(&EntityKey::of::<E>(id))
            .and_then(|entry| entry.as_any().downcast_ref::<TrackedEntry<E>>())
            .map(|entry| entry.handle.clone())
    }

    /// Registers a managed instance. `snapshot: None` marks it read-only.
    ///
    /// Returns the already-registered handle instead when the key is taken.
    pub fn register<E: Entity>(
        &mut self,
        id: EntityId,
        handle: Managed<E>,
        snapshot: Option<Vec<Value>>,
    ) -> Managed<E> {
        if let Some(existing) = self.get::<E>(id) {
            return existing;
        }
        self.entries.insert(
            EntityKey::of::<E>(id),
            Box::new(TrackedEntry {
                handle: handle.clone(),
                snapshot,
            }),
        );
        handle
    }

    /// True when `handle` is the instance registered under its key.
    pub fn contains<E: Entity>(&self, handle: &Managed<E>) -> bool {
        handle
            .id()
            .and_then(|id| self.get::<E>(id))
            .is_some_and(|cached| Managed::same_instance(&cached, handle))
    }

    pub fn is_read_only(&self, key: &EntityKey) -> Option<bool> {
        self.entries.get(key).map(|entry| entry.is_read_only())
    }

    pub fn remove(&mut self, key: &EntityKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Collects writes for every tracked entry whose values changed.
    pub(crate) fn pending_updates(&self, busy: BusyEntries) -> RepoResult<Vec<PendingUpdate>> {
        let mut updates = Vec::new();
        for (key, entry) in &self.entries {
            let values = match entry.changed_values(key.id) {
                Ok(values) => values,
                Err(RepoError::EntityBusy { entity, id }) if busy == BusyEntries::Defer => {
                    debug!(
                        "event=session_flush module=session status=deferred entity={entity} id={id}"
                    );
                    continue;
                }
                Err(err) => return Err(err),
            };
            if let Some(values) = values {
                updates.push(PendingUpdate {
                    key: *key,
                    meta: entry.meta(),
                    values,
                });
            }
        }
        Ok(updates)
    }

    pub(crate) fn mark_clean(&mut self, key: &EntityKey, values: Vec<Value>) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.mark_clean(values);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BusyEntries, EntityKey, IdentityMap};
    use crate::entity::{Entity, Managed};
    use crate::error::RepoError;
    use crate::model::member::Member;
    use crate::model::team::Team;
    use rusqlite::types::Value;

    fn loaded_member(id: i64, username: &str, age: i32) -> Managed<Member> {
        let mut member = Member::new(username, age);
        member.assign_id(id);
        Managed::new(member)
    }

    #[test]
    fn register_keeps_first_instance_per_key() {
        let mut map = IdentityMap::new();
        let first = loaded_member(1, "member1", 10);
        let second = loaded_member(1, "other", 99);

        let kept = map.register(1, first.clone(), Some(Vec::new()));
        let again = map.register(1, second.clone(), Some(Vec::new()));

        assert!(Managed::same_instance(&kept, &first));
        assert!(Managed::same_instance(&again, &first));
        assert!(!map.contains(&second));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn keys_are_scoped_by_table() {
        let mut map = IdentityMap::new();
        let member = loaded_member(1, "member1", 10);
        let mut team = Team::new("teamA");
        team.assign_id(1);
        let team = Managed::new(team);

        map.register(1, member, None);
        map.register(1, team, None);

        assert_eq!(map.len(), 2);
        assert!(map.get::<Team>(1).is_some());
        assert!(map.get::<Member>(1).is_some());
    }

    #[test]
    fn dirty_check_compares_against_snapshot() {
        let mut map = IdentityMap::new();
        let member = loaded_member(1, "member1", 10);
        let snapshot = member.borrow().to_values().unwrap();
        map.register(1, member.clone(), Some(snapshot));

        assert!(map.pending_updates(BusyEntries::Reject).unwrap().is_empty());

        member.borrow_mut().age = 11;
        let updates = map.pending_updates(BusyEntries::Reject).unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].key, EntityKey::of::<Member>(1));
        assert_eq!(updates[0].values[1], Value::Integer(11));

        map.mark_clean(&updates[0].key, updates[0].values.clone());
        assert!(map.pending_updates(BusyEntries::Reject).unwrap().is_empty());
    }

    #[test]
    fn read_only_entries_are_never_dirty() {
        let mut map = IdentityMap::new();
        let member = loaded_member(1, "member1", 10);
        map.register(1, member.clone(), None);

        member.borrow_mut().username = "changed".to_string();

        assert!(map.pending_updates(BusyEntries::Reject).unwrap().is_empty());
        assert_eq!(map.is_read_only(&EntityKey::of::<Member>(1)), Some(true));
    }

    #[test]
    fn busy_entries_are_deferred_or_rejected() {
        let mut map = IdentityMap::new();
        let member = loaded_member(1, "member1", 10);
        let snapshot = member.borrow().to_values().unwrap();
        map.register(1, member.clone(), Some(snapshot));

        let mut guard = member.borrow_mut();
        guard.age = 11;

        assert!(map.pending_updates(BusyEntries::Defer).unwrap().is_empty());
        assert!(matches!(
            map.pending_updates(BusyEntries::Reject),
            Err(RepoError::EntityBusy {
                entity: "Member",
                id: 1
            })
        ));

        drop(guard);
        assert_eq!(map.pending_updates(BusyEntries::Defer).unwrap().len(), 1);
    }
}
