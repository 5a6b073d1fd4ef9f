//! Member repository: derived, authored, paged, bulk and fetch-join queries.
//!
//! # Responsibility
//! - Expose member queries as typed methods over one unit of work.
//! - Derive every query plan when the repository is built.
//!
//! # Invariants
//! - A misconfigured method name or descriptor fails `try_new`, never a
//!   later call.
//! - `bulk_age_plus` bypasses the session cache; callers clear it before
//!   re-reading affected members.

use super::crud_repo::{CrudRepository, SessionRepository};
use crate::entity::{EntityId, Managed};
use crate::error::RepoResult;
use crate::model::member::Member;
use crate::model::member_dto::MemberDto;
use crate::model::team::Team;
use crate::query::bulk::{Assignment, BulkUpdate};
use crate::query::descriptor::{Operator, QueryDescriptor};
use crate::query::executor::SqlStatement;
use crate::query::method_name::{parse_method_name, Subject};
use crate::query::page::{Page, PageRequest};
use crate::query::plan::{QueryPlan, ValidationError};
use crate::query::QueryHints;
use crate::session::Session;
use rusqlite::types::Value;

const FIND_USER_SQL: &str = "SELECT id, username, age, team_id
FROM member
WHERE username = ?1 AND age = ?2";

const USERNAME_LIST_SQL: &str = "SELECT username FROM member ORDER BY id";

const MEMBER_CUSTOM_SQL: &str = "SELECT id, username, age, team_id FROM member ORDER BY id";

/// Member-specific queries on top of CRUD.
pub trait MemberRepository: CrudRepository<Member> {
    fn find_by_username_and_age_greater_than(
        &self,
        username: &str,
        age: i32,
    ) -> RepoResult<Vec<Managed<Member>>>;
    fn find_by_username(&self, username: &str) -> RepoResult<Vec<Managed<Member>>>;
    fn find_top3_by_order_by_age_desc(&self) -> RepoResult<Vec<Managed<Member>>>;
    /// Authored query: exact username and age.
    fn find_user(&self, username: &str, age: i32) -> RepoResult<Vec<Managed<Member>>>;
    fn find_username_list(&self) -> RepoResult<Vec<String>>;
    fn find_member_dto(&self) -> RepoResult<Vec<MemberDto>>;
    fn find_by_age(&self, age: i32, request: &PageRequest) -> RepoResult<Page<Managed<Member>>>;
    fn count_by_age(&self, age: i32) -> RepoResult<u64>;
    /// Adds one to the age of every member aged `age` or older.
    fn bulk_age_plus(&self, age: i32) -> RepoResult<usize>;
    /// Members with their teams loaded in the same statement.
    fn find_member_fetch_join(&self) -> RepoResult<Vec<Managed<Member>>>;
    /// Loads without dirty tracking.
    fn find_read_only_by_username(&self, username: &str) -> RepoResult<Option<Managed<Member>>>;
    fn find_member_custom(&self) -> RepoResult<Vec<Managed<Member>>>;
}

struct MemberPlans {
    by_username_and_age_greater_than: QueryPlan<Member>,
    by_username: QueryPlan<Member>,
    top3_by_age_desc: QueryPlan<Member>,
    by_age: QueryPlan<Member>,
    count_by_age: QueryPlan<Member>,
    read_only_by_username: QueryPlan<Member>,
    all: QueryPlan<Member>,
    age_plus: BulkUpdate<Member>,
}

impl MemberPlans {
    fn derive() -> RepoResult<Self> {
        let age_at_least = QueryPlan::derive(
            &QueryDescriptor::new().by("age", Operator::GreaterThanEqual),
        )?;
        Ok(Self {
            by_username_and_age_greater_than: derive_method(
                "findByUsernameAndAgeGreaterThan",
                Subject::Find,
            )?,
            by_username: derive_method("findByUsername", Subject::Find)?,
            top3_by_age_desc: derive_method("findTop3ByOrderByAgeDesc", Subject::Find)?,
            by_age: derive_method("findByAge", Subject::Find)?,
            count_by_age: derive_method("countByAge", Subject::Count)?,
            read_only_by_username: derive_method("findReadOnlyByUsername", Subject::Find)?,
            all: QueryPlan::all(),
            age_plus: BulkUpdate::new(age_at_least).set("age", Assignment::Increment(1))?,
        })
    }
}

fn derive_method(name: &str, expected: Subject) -> RepoResult<QueryPlan<Member>> {
    let parsed = parse_method_name(name)?;
    if parsed.subject != expected {
        return Err(ValidationError::InvalidMethodName {
            name: name.to_string(),
            reason: format!("expected a {expected:?} query, got {:?}", parsed.subject),
        }
        .into());
    }
    Ok(QueryPlan::derive(&parsed.descriptor)?)
}

fn text(value: &str) -> Value {
    Value::Text(value.to_string())
}

fn integer(value: i32) -> Value {
    Value::Integer(i64::from(value))
}

/// SQLite-backed member repository bound to one session.
pub struct SqliteMemberRepository<'s> {
    crud: SessionRepository<'s, Member>,
    plans: MemberPlans,
}

impl<'s> SqliteMemberRepository<'s> {
    /// Checks the member/team mapping and derives every query plan.
    pub fn try_new(session: &'s Session) -> RepoResult<Self> {
        session.ensure_mapped::<Team>()?;
        Ok(Self {
            crud: SessionRepository::try_new(session)?,
            plans: MemberPlans::derive()?,
        })
    }

    fn session(&self) -> &'s Session {
        self.crud.session()
    }
}

impl CrudRepository<Member> for SqliteMemberRepository<'_> {
    fn save(&self, entity: Member) -> RepoResult<Managed<Member>> {
        self.crud.save(entity)
    }

    fn find_by_id(&self, id: EntityId) -> RepoResult<Option<Managed<Member>>> {
        self.crud.find_by_id(id)
    }

    fn get_by_id(&self, id: EntityId) -> RepoResult<Managed<Member>> {
        self.crud.get_by_id(id)
    }

    fn exists_by_id(&self, id: EntityId) -> RepoResult<bool> {
        self.crud.exists_by_id(id)
    }

    fn find_all(&self) -> RepoResult<Vec<Managed<Member>>> {
        self.crud.find_all()
    }

    fn find_all_paged(&self, request: &PageRequest) -> RepoResult<Page<Managed<Member>>> {
        self.crud.find_all_paged(request)
    }

    fn count(&self) -> RepoResult<u64> {
        self.crud.count()
    }

    fn delete(&self, entity: &Managed<Member>) -> RepoResult<()> {
        self.crud.delete(entity)
    }

    fn delete_by_id(&self, id: EntityId) -> RepoResult<bool> {
        self.crud.delete_by_id(id)
    }
}

impl MemberRepository for SqliteMemberRepository<'_> {
    fn find_by_username_and_age_greater_than(
        &self,
        username: &str,
        age: i32,
    ) -> RepoResult<Vec<Managed<Member>>> {
        let bound = self
            .plans
            .by_username_and_age_greater_than
            .bind(&[text(username), integer(age)])?;
        self.session().select(&bound, QueryHints::default())
    }

    fn find_by_username(&self, username: &str) -> RepoResult<Vec<Managed<Member>>> {
        let bound = self.plans.by_username.bind(&[text(username)])?;
        self.session().select(&bound, QueryHints::default())
    }

    fn find_top3_by_order_by_age_desc(&self) -> RepoResult<Vec<Managed<Member>>> {
        let bound = self.plans.top3_by_age_desc.bind(&[])?;
        self.session().select(&bound, QueryHints::default())
    }

    fn find_user(&self, username: &str, age: i32) -> RepoResult<Vec<Managed<Member>>> {
        let statement = SqlStatement::new(FIND_USER_SQL, vec![text(username), integer(age)]);
        self.session()
            .query_entities(&statement, QueryHints::default())
    }

    fn find_username_list(&self) -> RepoResult<Vec<String>> {
        self.session()
            .query_scalars(&SqlStatement::new(USERNAME_LIST_SQL, Vec::new()))
    }

    fn find_member_dto(&self) -> RepoResult<Vec<MemberDto>> {
        self.session()
            .query_projection(&SqlStatement::new(MemberDto::SELECT_SQL, Vec::new()))
    }

    fn find_by_age(&self, age: i32, request: &PageRequest) -> RepoResult<Page<Managed<Member>>> {
        let bound = self.plans.by_age.bind(&[integer(age)])?;
        self.session()
            .find_page(&bound, request, QueryHints::default())
    }

    fn count_by_age(&self, age: i32) -> RepoResult<u64> {
        self.session()
            .count(&self.plans.count_by_age.bind(&[integer(age)])?)
    }

    fn bulk_age_plus(&self, age: i32) -> RepoResult<usize> {
        self.session()
            .execute_bulk(&self.plans.age_plus, &[integer(age)])
    }

    fn find_member_fetch_join(&self) -> RepoResult<Vec<Managed<Member>>> {
        let bound = self.plans.all.bind(&[])?;
        self.session()
            .find_joined(&bound, &Member::TEAM, QueryHints::default())
    }

    fn find_read_only_by_username(&self, username: &str) -> RepoResult<Option<Managed<Member>>> {
        let bound = self.plans.read_only_by_username.bind(&[text(username)])?;
        self.session().select_one(&bound, QueryHints::read_only())
    }

    fn find_member_custom(&self) -> RepoResult<Vec<Managed<Member>>> {
        self.session().query_entities(
            &SqlStatement::new(MEMBER_CUSTOM_SQL, Vec::new()),
            QueryHints::default(),
        )
    }
}
