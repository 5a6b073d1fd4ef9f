//! Team entity.

use super::member::Member;
use crate::entity::{
    Entity, EntityId, EntityMeta, FieldKind, FieldMeta, LazyCollection, LoadContext, Managed,
    TupleReader,
};
use crate::error::RepoResult;
use rusqlite::types::Value;

static TEAM_FIELDS: [FieldMeta; 1] = [FieldMeta {
    name: "name",
    column: "name",
    kind: FieldKind::Text,
    nullable: false,
}];

static TEAM_META: EntityMeta = EntityMeta {
    name: "Team",
    table: "team",
    id_column: "id",
    fields: &TEAM_FIELDS,
};

#[derive(Debug, Clone)]
pub struct Team {
    id: Option<EntityId>,
    pub name: String,
    members: LazyCollection<Member>,
}

impl Team {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            members: LazyCollection::empty(),
        }
    }

    /// Members whose `team` points here, loaded on first call.
    ///
    /// # Errors
    /// - `StaleAccess` when the loading session has ended.
    pub fn members(&self) -> RepoResult<Vec<Managed<Member>>> {
        self.members.resolve()
    }
}

impl PartialEq for Team {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name
    }
}

impl Entity for Team {
    fn meta() -> &'static EntityMeta {
        &TEAM_META
    }

    fn id(&self) -> Option<EntityId> {
        self.id
    }

    fn assign_id(&mut self, id: EntityId) {
        self.id = Some(id);
    }

    fn to_values(&self) -> RepoResult<Vec<Value>> {
        Ok(vec![Value::Text(self.name.clone())])
    }

    fn from_values(values: &[Value], ctx: &LoadContext) -> RepoResult<Self> {
        let reader = TupleReader::new(&TEAM_META, values)?;
        let id = reader.id()?;
        Ok(Self {
            id: Some(id),
            name: reader.text("name")?,
            members: ctx.collection::<Member>(id, "team"),
        })
    }
}
