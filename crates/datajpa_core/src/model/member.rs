//! Member entity.
//!
//! # Invariants
//! - `team`, when set, must point at a persisted team before the member is
//!   written; otherwise writes fail with `UnsavedReference`.
//! - `age` fits in `i32`; wider persisted values are rejected on load.

use super::team::Team;
use crate::entity::{
    Entity, EntityId, EntityMeta, FieldKind, FieldMeta, LazyRef, LoadContext, Managed, ToOne,
    TupleReader,
};
use crate::error::{RepoError, RepoResult};
use crate::query::plan::ValidationError;
use rusqlite::types::Value;

static MEMBER_FIELDS: [FieldMeta; 3] = [
    FieldMeta {
        name: "username",
        column: "username",
        kind: FieldKind::Text,
        nullable: false,
    },
    FieldMeta {
        name: "age",
        column: "age",
        kind: FieldKind::Integer,
        nullable: false,
    },
    FieldMeta {
        name: "team",
        column: "team_id",
        kind: FieldKind::Integer,
        nullable: true,
    },
];

static MEMBER_META: EntityMeta = EntityMeta {
    name: "Member",
    table: "member",
    id_column: "id",
    fields: &MEMBER_FIELDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    id: Option<EntityId>,
    pub username: String,
    pub age: i32,
    /// Owning side of the member/team association.
    pub team: Option<LazyRef<Team>>,
}

fn member_team(member: &Member) -> Option<&LazyRef<Team>> {
    member.team.as_ref()
}

impl Member {
    /// Relation used by joined fetches of a member's team.
    pub const TEAM: ToOne<Member, Team> = ToOne {
        field: "team",
        reference: member_team,
    };

    pub fn new(username: impl Into<String>, age: i32) -> Self {
        Self {
            id: None,
            username: username.into(),
            age,
            team: None,
        }
    }

    pub fn with_team(username: impl Into<String>, age: i32, team: &Managed<Team>) -> Self {
        let mut member = Self::new(username, age);
        member.change_team(team);
        member
    }

    /// Points the member at `team`.
    ///
    /// Only the owning side changes; an already loaded `Team.members`
    /// collection is not updated in memory.
    pub fn change_team(&mut self, team: &Managed<Team>) {
        self.team = Some(LazyRef::to(team));
    }

    pub fn leave_team(&mut self) {
        self.team = None;
    }

    /// Key of the referenced team without loading it.
    pub fn team_id(&self) -> Option<EntityId> {
        self.team.as_ref().and_then(LazyRef::id)
    }
}

impl Entity for Member {
    fn meta() -> &'static EntityMeta {
        &MEMBER_META
    }

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn assign_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn to_values(&self) -> RepoResult<Vec<Value>> {
        let team_id = match &self.team {
            None => Value::Null,
            Some(reference) => match reference.id() {
                Some(id) => Value::Integer(id),
                None => {
                    return Err(ValidationError::UnsavedReference {
                        entity: MEMBER_META.name,
                        field: "team",
                    }
                    .into())
                }
            },
        };
        Ok(vec![
            Value::Text(self.username.clone()),
            Value::Integer(i64::from(self.age)),
            team_id,
        ])
    }

    fn from_values(values: &[Value], ctx: &LoadContext) -> RepoResult<Self> {
        let reader = TupleReader::new(&MEMBER_META, values)?;
        let age = reader.integer("age")?;
        let age = i32::try_from(age)
            .map_err(|_| RepoError::InvalidData(format!("member.age out of range: {age}")))?;
        Ok(Self {
            id: Some(reader.id()?),
            username: reader.text("username")?,
            age,
            team: reader
                .optional_integer("team")?
                .map(|team_id| ctx.reference::<Team>(team_id)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::Member;
    use crate::entity::{Entity, LoadContext, Managed};
    use crate::error::RepoError;
    use crate::model::team::Team;
    use crate::query::plan::ValidationError;
    use rusqlite::types::Value;

    #[test]
    fn values_follow_field_order() {
        let mut team = Team::new("teamA");
        team.assign_id(4);
        let member = Member::with_team("member1", 10, &Managed::new(team));

        assert_eq!(
            member.to_values().unwrap(),
            vec![
                Value::Text("member1".to_string()),
                Value::Integer(10),
                Value::Integer(4),
            ]
        );
    }

    #[test]
    fn transient_team_reference_is_rejected() {
        let member = Member::with_team("member1", 10, &Managed::new(Team::new("teamA")));
        assert!(matches!(
            member.to_values(),
            Err(RepoError::Validation(ValidationError::UnsavedReference {
                field: "team",
                ..
            }))
        ));
    }

    #[test]
    fn loaded_team_key_stays_unresolved() {
        let values = vec![
            Value::Integer(1),
            Value::Text("member1".to_string()),
            Value::Integer(10),
            Value::Integer(3),
        ];
        let member = Member::from_values(&values, &LoadContext::detached()).unwrap();

        assert_eq!(member.id(), Some(1));
        assert_eq!(member.team_id(), Some(3));
        assert!(!member.team.as_ref().unwrap().is_resolved());
    }

    #[test]
    fn out_of_range_age_is_invalid_data() {
        let values = vec![
            Value::Integer(1),
            Value::Text("member1".to_string()),
            Value::Integer(i64::MAX),
            Value::Null,
        ];
        assert!(matches!(
            Member::from_values(&values, &LoadContext::detached()),
            Err(RepoError::InvalidData(_))
        ));
    }
}
