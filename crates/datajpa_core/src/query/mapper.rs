//! Row-to-object mapping.
//!
//! # Responsibility
//! - Turn entity tuples into managed handles through the identity map.
//! - Turn projection and scalar tuples into plain values with no cache use.
//!
//! # Invariants
//! - A tuple whose key is already cached yields the cached instance; the
//!   tuple's other columns are ignored.
//! - Projections and scalars never touch the identity map.

use super::QueryHints;
use crate::entity::{integer_at, Entity, LoadContext, Managed, ToOne};
use crate::error::{RepoError, RepoResult};
use crate::session::identity_map::IdentityMap;
use rusqlite::types::{FromSql, Value, ValueRef};

/// Read-only value shaped from selected columns.
pub trait Projection: Sized {
    fn from_tuple(values: &[Value]) -> RepoResult<Self>;
}

pub(crate) fn map_entity<E: Entity>(
    cache: &mut IdentityMap,
    ctx: &LoadContext,
    values: &[Value],
    hints: QueryHints,
) -> RepoResult<Managed<E>> {
    let meta = E::meta();
    let id = integer_at(values, 0, &format!("{}.{}", meta.table, meta.id_column))?;
    if let Some(cached) = cache.get::<E>(id) {
        return Ok(cached);
    }

    let entity = E::from_values(values, ctx)?;
    let snapshot = if hints.read_only {
        None
    } else {
        Some(entity.to_values()?)
    };
    Ok(cache.register(id, Managed::new(entity), snapshot))
}

pub(crate) fn map_entities<E: Entity>(
    cache: &mut IdentityMap,
    ctx: &LoadContext,
    rows: &[Vec<Value>],
    hints: QueryHints,
) -> RepoResult<Vec<Managed<E>>> {
    rows.iter()
        .map(|row| map_entity(cache, ctx, row, hints))
        .collect()
}

/// Maps `owner columns ++ target columns` tuples from a LEFT JOIN.
///
/// The owner's reference is marked resolved when it points at the joined row.
pub(crate) fn map_joined<O: Entity, T: Entity>(
    cache: &mut IdentityMap,
    ctx: &LoadContext,
    rows: &[Vec<Value>],
    relation: &ToOne<O, T>,
    hints: QueryHints,
) -> RepoResult<Vec<Managed<O>>> {
    let split = O::meta().column_count();
    let expected = split + T::meta().column_count();
    let mut owners = Vec::with_capacity(rows.len());
    for row in rows {
        if row.len() != expected {
            return Err(RepoError::InvalidData(format!(
                "joined {} tuple has {} columns, expected {expected}",
                O::meta().table,
                row.len()
            )));
        }
        let (owner_values, target_values) = row.split_at(split);
        let owner = map_entity::<O>(cache, ctx, owner_values, hints)?;

        if !matches!(target_values.first(), Some(Value::Null)) {
            let target = map_entity::<T>(cache, ctx, target_values, hints)?;
            // Instances the caller holds mutably keep their lazy reference.
            let target_id = target.try_borrow().and_then(|target| target.id());
            if let (Some(owner_ref), Some(target_id)) = (owner.try_borrow(), target_id) {
                if let Some(reference) = (relation.reference)(&owner_ref) {
                    if !reference.is_resolved() && reference.id() == Some(target_id) {
                        reference.resolve_with(target);
                    }
                }
            }
        }
        owners.push(owner);
    }
    Ok(owners)
}

pub(crate) fn map_projections<P: Projection>(rows: &[Vec<Value>]) -> RepoResult<Vec<P>> {
    rows.iter().map(|row| P::from_tuple(row)).collect()
}

/// Maps single-column rows through `FromSql`.
pub(crate) fn map_scalars<T: FromSql>(rows: &[Vec<Value>]) -> RepoResult<Vec<T>> {
    rows.iter()
        .map(|row| match row.as_slice() {
            [value] => T::column_result(ValueRef::from(value))
                .map_err(|err| RepoError::InvalidData(format!("scalar column: {err}"))),
            _ => Err(RepoError::InvalidData(format!(
                "scalar query returned {} columns, expected 1",
                row.len()
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{map_entities, map_entity, map_joined, map_scalars};
    use crate::entity::{LoadContext, Managed};
    use crate::error::RepoError;
    use crate::model::member::Member;
    use crate::query::QueryHints;
    use crate::session::identity_map::{EntityKey, IdentityMap};
    use rusqlite::types::Value;

    fn member_row(id: i64, username: &str, age: i64, team_id: Option<i64>) -> Vec<Value> {
        vec![
            Value::Integer(id),
            Value::Text(username.to_string()),
            Value::Integer(age),
            team_id.map_or(Value::Null, Value::Integer),
        ]
    }

    #[test]
    fn cached_instance_wins_over_fresh_tuple() {
        let mut cache = IdentityMap::new();
        let ctx = LoadContext::detached();

        let first = map_entity::<Member>(
            &mut cache,
            &ctx,
            &member_row(1, "member1", 10, None),
            QueryHints::default(),
        )
        .unwrap();
        let second = map_entity::<Member>(
            &mut cache,
            &ctx,
            &member_row(1, "renamed", 55, None),
            QueryHints::default(),
        )
        .unwrap();

        assert!(Managed::same_instance(&first, &second));
        assert_eq!(second.borrow().username, "member1");
        assert_eq!(second.borrow().age, 10);
    }

    #[test]
    fn read_only_hint_registers_without_snapshot() {
        let mut cache = IdentityMap::new();
        let rows = vec![member_row(1, "member1", 10, None), member_row(2, "member2", 20, None)];

        let members =
            map_entities::<Member>(&mut cache, &LoadContext::detached(), &rows, QueryHints::read_only())
                .unwrap();

        assert_eq!(members.len(), 2);
        assert_eq!(cache.is_read_only(&EntityKey::of::<Member>(2)), Some(true));
    }

    #[test]
    fn joined_rows_resolve_owner_reference() {
        let mut cache = IdentityMap::new();
        let mut row = member_row(1, "member1", 10, Some(7));
        row.extend([Value::Integer(7), Value::Text("teamA".to_string())]);
        let mut orphan = member_row(2, "member2", 20, None);
        orphan.extend([Value::Null, Value::Null]);

        let members = map_joined(
            &mut cache,
            &LoadContext::detached(),
            &[row, orphan],
            &Member::TEAM,
            QueryHints::default(),
        )
        .unwrap();

        let first = members[0].borrow();
        let team_ref = first.team.as_ref().expect("team reference");
        assert!(team_ref.is_resolved());
        assert_eq!(team_ref.resolve().unwrap().borrow().name, "teamA");
        assert!(members[1].borrow().team.is_none());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn joined_rows_leave_mutably_held_owner_lazy() {
        let mut cache = IdentityMap::new();
        let ctx = LoadContext::detached();
        let owner = map_entity::<Member>(
            &mut cache,
            &ctx,
            &member_row(1, "member1", 10, Some(7)),
            QueryHints::default(),
        )
        .unwrap();
        let mut row = member_row(1, "member1", 10, Some(7));
        row.extend([Value::Integer(7), Value::Text("teamA".to_string())]);

        let guard = owner.borrow_mut();
        let members =
            map_joined(&mut cache, &ctx, &[row], &Member::TEAM, QueryHints::default()).unwrap();
        drop(guard);

        assert!(Managed::same_instance(&members[0], &owner));
        assert!(!owner.borrow().team.as_ref().unwrap().is_resolved());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn scalar_rows_must_have_one_column() {
        let names = map_scalars::<String>(&[vec![Value::Text("a".to_string())]]).unwrap();
        assert_eq!(names, vec!["a".to_string()]);

        let err = map_scalars::<String>(&[vec![Value::Integer(1), Value::Integer(2)]]).unwrap_err();
        assert!(matches!(err, RepoError::InvalidData(_)));
    }
}
