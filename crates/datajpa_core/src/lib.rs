//! Persistence core for member/team records.
//!
//! Sessions (units of work) own a SQLite connection and an identity map;
//! repositories derive their queries from method names and descriptors.

pub mod db;
pub mod entity;
pub mod error;
pub mod logging;
pub mod model;
pub mod query;
pub mod repo;
pub mod service;
pub mod session;

pub use entity::{Entity, EntityId, LazyCollection, LazyRef, Managed};
pub use error::{RepoError, RepoResult};
pub use logging::init_logging_from_env;
pub use model::member::Member;
pub use model::member_dto::MemberDto;
pub use model::team::Team;
pub use query::bulk::{Assignment, BulkDelete, BulkMutation, BulkUpdate};
pub use query::descriptor::{Direction, Operator, QueryDescriptor};
pub use query::method_name::{parse_method_name, ParsedMethod, Subject};
pub use query::page::{Page, PageRequest, Sort};
pub use query::plan::{QueryPlan, ValidationError};
pub use query::QueryHints;
pub use repo::crud_repo::{CrudRepository, SessionRepository};
pub use repo::member_repo::{MemberRepository, SqliteMemberRepository};
pub use repo::team_repo::{SqliteTeamRepository, TeamRepository};
pub use service::member_service::MemberService;
pub use session::{FlushMode, Session, SessionConfig, SessionId};
