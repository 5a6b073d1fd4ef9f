//! Team repository.

use super::crud_repo::{CrudRepository, SessionRepository};
use crate::entity::{EntityId, Managed};
use crate::error::RepoResult;
use crate::model::team::Team;
use crate::query::method_name::parse_method_name;
use crate::query::page::{Page, PageRequest};
use crate::query::plan::QueryPlan;
use crate::query::QueryHints;
use crate::session::Session;
use rusqlite::types::Value;

pub trait TeamRepository: CrudRepository<Team> {
    fn find_by_name(&self, name: &str) -> RepoResult<Vec<Managed<Team>>>;
}

pub struct SqliteTeamRepository<'s> {
    crud: SessionRepository<'s, Team>,
    by_name: QueryPlan<Team>,
}

impl<'s> SqliteTeamRepository<'s> {
    pub fn try_new(session: &'s Session) -> RepoResult<Self> {
        let parsed = parse_method_name("findByName")?;
        Ok(Self {
            crud: SessionRepository::try_new(session)?,
            by_name: QueryPlan::derive(&parsed.descriptor)?,
        })
    }
}

impl CrudRepository<Team> for SqliteTeamRepository<'_> {
    fn save(&self, entity: Team) -> RepoResult<Managed<Team>> {
        self.crud.save(entity)
    }

    fn find_by_id(&self, id: EntityId) -> RepoResult<Option<Managed<Team>>> {
        self.crud.find_by_id(id)
    }

    fn get_by_id(&self, id: EntityId) -> RepoResult<Managed<Team>> {
        self.crud.get_by_id(id)
    }

    fn exists_by_id(&self, id: EntityId) -> RepoResult<bool> {
        self.crud.exists_by_id(id)
    }

    fn find_all(&self) -> RepoResult<Vec<Managed<Team>>> {
        self.crud.find_all()
    }

    fn find_all_paged(&self, request: &PageRequest) -> RepoResult<Page<Managed<Team>>> {
        self.crud.find_all_paged(request)
    }

    fn count(&self) -> RepoResult<u64> {
        self.crud.count()
    }

    fn delete(&self, entity: &Managed<Team>) -> RepoResult<()> {
        self.crud.delete(entity)
    }

    fn delete_by_id(&self, id: EntityId) -> RepoResult<bool> {
        self.crud.delete_by_id(id)
    }
}

impl TeamRepository for SqliteTeamRepository<'_> {
    fn find_by_name(&self, name: &str) -> RepoResult<Vec<Managed<Team>>> {
        let bound = self.by_name.bind(&[Value::Text(name.to_string())])?;
        self.crud
            .session()
            .select(&bound, QueryHints::default())
    }
}
