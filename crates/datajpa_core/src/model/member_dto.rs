//! Member projection with the owning team's name.

use super::member::Member;
use crate::entity::{integer_at, optional_text_at, text_at, Entity, EntityId};
use crate::error::RepoResult;
use crate::query::mapper::Projection;
use crate::query::plan::ValidationError;
use serde::{Deserialize, Serialize};

/// Read-only `{id, username, teamName}` value. Never tracked, never written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberDto {
    pub id: EntityId,
    pub username: String,
    pub team_name: Option<String>,
}

impl MemberDto {
    /// Member LEFT JOIN team; members without a team yield `team_name: None`.
    pub const SELECT_SQL: &'static str = "SELECT m.id, m.username, t.name
FROM member m
LEFT JOIN team t ON t.id = m.team_id
ORDER BY m.id";

    /// Builds the projection from a loaded member, resolving its team if set.
    ///
    /// # Errors
    /// - `TransientEntity` when the member has no key yet.
    /// - `StaleAccess` when the team is unresolved and its session has ended.
    pub fn from_member(member: &Member) -> RepoResult<Self> {
        let id = member.id().ok_or(ValidationError::TransientEntity {
            entity: Member::meta().name,
        })?;
        let team_name = match &member.team {
            Some(reference) => Some(reference.resolve()?.borrow().name.clone()),
            None => None,
        };
        Ok(Self {
            id,
            username: member.username.clone(),
            team_name,
        })
    }
}

impl Projection for MemberDto {
    fn from_tuple(values: &[rusqlite::types::Value]) -> RepoResult<Self> {
        Ok(Self {
            id: integer_at(values, 0, "member.id")?,
            username: text_at(values, 1, "member.username")?,
            team_name: optional_text_at(values, 2, "team.name")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::MemberDto;
    use crate::query::mapper::Projection;
    use rusqlite::types::Value;

    #[test]
    fn null_team_column_maps_to_none() {
        let dto = MemberDto::from_tuple(&[
            Value::Integer(1),
            Value::Text("AAA".to_string()),
            Value::Null,
        ])
        .unwrap();
        assert_eq!(dto.team_name, None);

        let json = serde_json::to_value(&dto).unwrap();
        assert_eq!(json["teamName"], serde_json::Value::Null);
        assert_eq!(json["username"], "AAA");
    }
}
