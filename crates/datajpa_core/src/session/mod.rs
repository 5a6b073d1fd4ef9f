//! Unit of work: one connection, one transaction, one identity map.
//!
//! # Responsibility
//! - Own the store connection for the duration of one logical operation.
//! - Track managed entities and write their changes on flush.
//! - Run queries, paging, joined fetches and bulk statements.
//!
//! # Invariants
//! - A session is used from one thread (`!Send`); concurrent work uses
//!   separate sessions with separate connections and caches.
//! - The transaction is rolled back on drop unless `commit` succeeded.
//! - Lazy references created by this session fail with `StaleAccess` once it
//!   has ended.

pub mod identity_map;

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::{open_db_in_memory, open_db_with_timeout, DEFAULT_BUSY_TIMEOUT};
use crate::entity::{Entity, EntityId, LoadContext, Managed, ToOne};
use crate::error::{RepoError, RepoResult};
use crate::query::bulk::BulkMutation;
use crate::query::executor::{QueryExecutor, SqlStatement};
use crate::query::mapper::{
    map_entities, map_entity, map_joined, map_projections, map_scalars, Projection,
};
use crate::query::page::{Page, PageRequest};
use crate::query::plan::{resolve_field, resolve_sort, BoundQuery, ValidationError};
use crate::query::QueryHints;
use identity_map::{BusyEntries, EntityKey, IdentityMap};
use log::{debug, info, warn};
use rusqlite::types::{FromSql, Value};
use rusqlite::Connection;
use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Random tag identifying one unit of work in logs and errors.
pub type SessionId = Uuid;

/// When tracked changes are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlushMode {
    /// Before every query or bulk statement, and on commit.
    #[default]
    Auto,
    /// Only on explicit `flush` and on commit.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub flush_mode: FlushMode,
    pub busy_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            flush_mode: FlushMode::Auto,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

/// Shared core of a session. Lazy references hold it weakly.
pub struct SessionState {
    id: SessionId,
    conn: Connection,
    flush_mode: FlushMode,
    open: Cell<bool>,
    cache: RefCell<IdentityMap>,
    started_at: Instant,
}

impl SessionState {
    pub(crate) fn id(&self) -> SessionId {
        self.id
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open.get()
    }

    fn executor(&self) -> QueryExecutor<'_> {
        QueryExecutor::new(&self.conn)
    }

    /// Cache-first lookup by key.
    pub(crate) fn find<T: Entity>(
        self: &Rc<Self>,
        id: EntityId,
        hints: QueryHints,
    ) -> RepoResult<Option<Managed<T>>> {
        if let Some(cached) = self.cache.borrow().get::<T>(id) {
            return Ok(Some(cached));
        }
        let Some(values) = self.executor().fetch_by_key(T::meta(), id)? else {
            return Ok(None);
        };
        let ctx = LoadContext::new(self);
        map_entity(&mut self.cache.borrow_mut(), &ctx, &values, hints).map(Some)
    }

    pub(crate) fn select<T: Entity>(
        self: &Rc<Self>,
        bound: &BoundQuery<'_, T>,
        hints: QueryHints,
    ) -> RepoResult<Vec<Managed<T>>> {
        self.auto_flush()?;
        let rows = self.executor().fetch(&bound.select_statement(&[], None))?;
        self.map_rows(&rows, hints)
    }

    fn map_rows<T: Entity>(
        self: &Rc<Self>,
        rows: &[Vec<Value>],
        hints: QueryHints,
    ) -> RepoResult<Vec<Managed<T>>> {
        let ctx = LoadContext::new(self);
        map_entities(&mut self.cache.borrow_mut(), &ctx, rows, hints)
    }

    fn auto_flush(&self) -> RepoResult<usize> {
        match self.flush_mode {
            FlushMode::Auto => self.flush(BusyEntries::Defer),
            FlushMode::Manual => Ok(0),
        }
    }

    /// Writes pending changes. Instances the caller holds mutably are
    /// skipped under `BusyEntries::Defer` and stay dirty.
    fn flush(&self, busy: BusyEntries) -> RepoResult<usize> {
        let updates = self.cache.borrow().pending_updates(busy)?;
        if updates.is_empty() {
            return Ok(0);
        }

        let executor = self.executor();
        for update in &updates {
            let rows = executor.update_row(update.meta, update.key.id, update.values.clone())?;
            if rows == 0 {
                warn!(
                    "event=session_flush module=session status=stale session={} entity={} id={}",
                    self.id, update.meta.name, update.key.id
                );
                return Err(RepoError::StaleState {
                    entity: update.meta.name,
                    id: update.key.id,
                });
            }
            self.cache
                .borrow_mut()
                .mark_clean(&update.key, update.values.clone());
        }
        debug!(
            "event=session_flush module=session status=ok session={} rows={}",
            self.id,
            updates.len()
        );
        Ok(updates.len())
    }

    fn finish(&self, statement: &str, event: &str) -> RepoResult<()> {
        self.open.set(false);
        let result = self.conn.execute_batch(statement);
        let duration_ms = self.started_at.elapsed().as_millis();
        match &result {
            Ok(()) => info!(
                "event={event} module=session status=ok session={} duration_ms={duration_ms}",
                self.id
            ),
            Err(err) => warn!(
                "event={event} module=session status=error session={} duration_ms={duration_ms} error={err}",
                self.id
            ),
        }
        result.map_err(Into::into)
    }
}

/// Explicit unit of work passed to repositories by reference.
pub struct Session {
    state: Rc<SessionState>,
}

impl Session {
    /// Starts a unit of work on a migrated connection with default config.
    pub fn begin(conn: Connection) -> RepoResult<Self> {
        Self::begin_with(conn, SessionConfig::default())
    }

    /// Starts a unit of work and opens its transaction.
    ///
    /// # Errors
    /// - `UninitializedConnection` when the schema version does not match.
    pub fn begin_with(conn: Connection, config: SessionConfig) -> RepoResult<Self> {
        let expected_version = latest_version();
        let actual_version = current_user_version(&conn)?;
        if actual_version != expected_version {
            return Err(RepoError::UninitializedConnection {
                expected_version,
                actual_version,
            });
        }

        conn.busy_timeout(config.busy_timeout)?;
        conn.execute_batch("BEGIN DEFERRED;")?;

        let state = Rc::new(SessionState {
            id: Uuid::new_v4(),
            conn,
            flush_mode: config.flush_mode,
            open: Cell::new(true),
            cache: RefCell::new(IdentityMap::new()),
            started_at: Instant::now(),
        });
        info!(
            "event=session_begin module=session status=ok session={} flush_mode={:?}",
            state.id, config.flush_mode
        );
        Ok(Self { state })
    }

    /// Fresh in-memory store plus a session over it.
    pub fn open_in_memory() -> RepoResult<Self> {
        Self::begin(open_db_in_memory()?)
    }

    /// Opens (and migrates) a database file, then starts a session on it.
    pub fn open_file(path: impl AsRef<Path>, config: SessionConfig) -> RepoResult<Self> {
        Self::begin_with(open_db_with_timeout(path, config.busy_timeout)?, config)
    }

    pub fn id(&self) -> SessionId {
        self.state.id
    }

    pub fn flush_mode(&self) -> FlushMode {
        self.state.flush_mode
    }

    /// Checks that the table and every mapped column of `E` exist.
    pub fn ensure_mapped<E: Entity>(&self) -> RepoResult<()> {
        let meta = E::meta();
        if !table_exists(&self.state.conn, meta.table)? {
            return Err(RepoError::MissingRequiredTable(meta.table));
        }
        let columns =
            std::iter::once(meta.id_column).chain(meta.fields.iter().map(|field| field.column));
        for column in columns {
            if !table_has_column(&self.state.conn, meta.table, column)? {
                return Err(RepoError::MissingRequiredColumn {
                    table: meta.table,
                    column,
                });
            }
        }
        Ok(())
    }

    /// Inserts a transient entity and returns its managed handle.
    pub fn persist<E: Entity>(&self, entity: E) -> RepoResult<Managed<E>> {
        let handle = Managed::new(entity);
        self.persist_handle(&handle)?;
        Ok(handle)
    }

    /// Inserts the instance behind `handle` and starts tracking it.
    ///
    /// Persisting an instance this session already manages is a no-op.
    ///
    /// # Errors
    /// - `UnsavedReference` when an owning reference targets a transient entity.
    /// - `DetachedEntity` when the handle carries a key it is not managed under.
    pub fn persist_handle<E: Entity>(&self, handle: &Managed<E>) -> RepoResult<()> {
        let meta = E::meta();
        if let Some(id) = handle.id() {
            if self.contains(handle) {
                return Ok(());
            }
            return Err(ValidationError::DetachedEntity {
                entity: meta.name,
                id,
            }
            .into());
        }

        let values = handle.borrow().to_values()?;
        let id = self.state.executor().insert(meta, None, values.clone())?;
        handle.borrow_mut().assign_id(id);
        self.state
            .cache
            .borrow_mut()
            .register(id, handle.clone(), Some(values));
        debug!(
            "event=entity_persist module=session status=ok session={} entity={} id={id}",
            self.state.id, meta.name
        );
        Ok(())
    }

    /// Copies a detached instance's state into the managed one.
    ///
    /// Transient instances are persisted. A key with no row is inserted
    /// under that key.
    pub fn merge<E: Entity>(&self, entity: E) -> RepoResult<Managed<E>> {
        let Some(id) = entity.id() else {
            return self.persist(entity);
        };
        if let Some(managed) = self.find::<E>(id)? {
            *managed.borrow_mut() = entity;
            return Ok(managed);
        }

        let meta = E::meta();
        let values = entity.to_values()?;
        self.state
            .executor()
            .insert(meta, Some(id), values.clone())?;
        let handle = self
            .state
            .cache
            .borrow_mut()
            .register(id, Managed::new(entity), Some(values));
        debug!(
            "event=entity_merge module=session status=inserted session={} entity={} id={id}",
            self.state.id, meta.name
        );
        Ok(handle)
    }

    /// Cache-first lookup by key; `Ok(None)` when no row exists.
    pub fn find<E: Entity>(&self, id: EntityId) -> RepoResult<Option<Managed<E>>> {
        self.find_with_hints(id, QueryHints::default())
    }

    pub fn find_with_hints<E: Entity>(
        &self,
        id: EntityId,
        hints: QueryHints,
    ) -> RepoResult<Option<Managed<E>>> {
        self.state.find(id, hints)
    }

    /// Required lookup by key.
    ///
    /// # Errors
    /// - `NotFound` when no row exists.
    pub fn get<E: Entity>(&self, id: EntityId) -> RepoResult<Managed<E>> {
        self.find(id)?.ok_or(RepoError::NotFound {
            entity: E::meta().name,
            id,
        })
    }

    pub fn contains<E: Entity>(&self, handle: &Managed<E>) -> bool {
        self.state.cache.borrow().contains(handle)
    }

    /// Deletes the row behind `handle` now and stops tracking it.
    pub fn remove<E: Entity>(&self, handle: &Managed<E>) -> RepoResult<()> {
        let id = handle.id().ok_or(ValidationError::TransientEntity {
            entity: E::meta().name,
        })?;
        self.remove_by_id::<E>(id).map(|_| ())
    }

    /// Deletes by key; returns whether a row was deleted.
    pub fn remove_by_id<E: Entity>(&self, id: EntityId) -> RepoResult<bool> {
        let meta = E::meta();
        let deleted = self.state.executor().delete_row(meta, id)?;
        self.state.cache.borrow_mut().remove(&EntityKey::of::<E>(id));
        debug!(
            "event=entity_remove module=session status=ok session={} entity={} id={id} rows={deleted}",
            self.state.id, meta.name
        );
        Ok(deleted > 0)
    }

    /// Writes every tracked change; returns the number of rows updated.
    ///
    /// # Errors
    /// - `EntityBusy` when a tracked instance is borrowed mutably.
    /// - `StaleState` when a tracked row was deleted behind the cache.
    pub fn flush(&self) -> RepoResult<usize> {
        self.state.flush(BusyEntries::Reject)
    }

    /// Detaches every managed instance. Pending changes are discarded.
    pub fn clear(&self) {
        let mut cache = self.state.cache.borrow_mut();
        let evicted = cache.len();
        cache.clear();
        debug!(
            "event=session_clear module=session status=ok session={} evicted={evicted}",
            self.state.id
        );
    }

    /// Stops tracking one instance; returns whether it was managed.
    pub fn detach<E: Entity>(&self, handle: &Managed<E>) -> bool {
        if !self.contains(handle) {
            return false;
        }
        handle
            .id()
            .is_some_and(|id| self.state.cache.borrow_mut().remove(&EntityKey::of::<E>(id)))
    }

    pub fn cached_count(&self) -> usize {
        self.state.cache.borrow().len()
    }

    /// Flushes and commits. The session ends either way.
    pub fn commit(self) -> RepoResult<()> {
        let flushed = self.state.flush(BusyEntries::Reject)?;
        debug!(
            "event=session_commit module=session status=flushed session={} rows={flushed}",
            self.state.id
        );
        self.state.finish("COMMIT;", "session_commit")
    }

    /// Discards every change made in this unit of work.
    pub fn rollback(self) -> RepoResult<()> {
        self.state.finish("ROLLBACK;", "session_rollback")
    }

    /// Runs a bound plan and maps rows through the identity map.
    pub fn select<E: Entity>(
        &self,
        bound: &BoundQuery<'_, E>,
        hints: QueryHints,
    ) -> RepoResult<Vec<Managed<E>>> {
        self.state.select(bound, hints)
    }

    /// Like `select`, for plans expected to match at most one row.
    ///
    /// # Errors
    /// - `InvalidData` when more than one row matches.
    pub fn select_one<E: Entity>(
        &self,
        bound: &BoundQuery<'_, E>,
        hints: QueryHints,
    ) -> RepoResult<Option<Managed<E>>> {
        let mut rows = self.select(bound, hints)?;
        if rows.len() > 1 {
            return Err(RepoError::InvalidData(format!(
                "expected at most one {}, got {}",
                E::meta().name,
                rows.len()
            )));
        }
        Ok(rows.pop())
    }

    pub fn count<E: Entity>(&self, bound: &BoundQuery<'_, E>) -> RepoResult<u64> {
        self.state.auto_flush()?;
        self.state.executor().count(&bound.count_statement())
    }

    pub fn exists<E: Entity>(&self, bound: &BoundQuery<'_, E>) -> RepoResult<bool> {
        Ok(self.count(bound)? > 0)
    }

    /// Windowed, sorted content plus total count over the same filter.
    ///
    /// The count query is skipped when the content alone determines the total.
    pub fn find_page<E: Entity>(
        &self,
        bound: &BoundQuery<'_, E>,
        request: &PageRequest,
        hints: QueryHints,
    ) -> RepoResult<Page<Managed<E>>> {
        let sort = resolve_sort(E::meta(), request.sort())?;
        self.state.auto_flush()?;

        let executor = self.state.executor();
        let rows = executor.fetch(&bound.select_statement(&sort, Some(request.window())))?;
        let content = self.state.map_rows::<E>(&rows, hints)?;
        let total = match request.known_total(content.len()) {
            Some(total) => total,
            None => executor.count(&bound.count_statement())?,
        };
        debug!(
            "event=page_fetch module=session status=ok session={} entity={} page={} size={} rows={} total={total}",
            self.state.id,
            E::meta().name,
            request.page_index(),
            request.page_size(),
            content.len()
        );
        Ok(Page::new(content, request, total))
    }

    /// Owner rows LEFT JOINed with their to-one target in one statement.
    pub fn find_joined<O: Entity, T: Entity>(
        &self,
        bound: &BoundQuery<'_, O>,
        relation: &ToOne<O, T>,
        hints: QueryHints,
    ) -> RepoResult<Vec<Managed<O>>> {
        let fk = resolve_field(O::meta(), relation.field)?;
        self.state.auto_flush()?;
        let rows = self
            .state
            .executor()
            .fetch(&bound.joined_statement(T::meta(), fk.column))?;
        let ctx = LoadContext::new(&self.state);
        map_joined(&mut self.state.cache.borrow_mut(), &ctx, &rows, relation, hints)
    }

    /// Authored query whose rows are full `E` tuples (`id` first).
    pub fn query_entities<E: Entity>(
        &self,
        statement: &SqlStatement,
        hints: QueryHints,
    ) -> RepoResult<Vec<Managed<E>>> {
        self.state.auto_flush()?;
        let rows = self.state.executor().fetch(statement)?;
        self.state.map_rows(&rows, hints)
    }

    /// Authored query mapped into read-only projections.
    pub fn query_projection<P: Projection>(&self, statement: &SqlStatement) -> RepoResult<Vec<P>> {
        self.state.auto_flush()?;
        map_projections(&self.state.executor().fetch(statement)?)
    }

    /// Authored single-column query.
    pub fn query_scalars<T: FromSql>(&self, statement: &SqlStatement) -> RepoResult<Vec<T>> {
        self.state.auto_flush()?;
        map_scalars(&self.state.executor().fetch(statement)?)
    }

    /// Runs a set-based statement and returns the affected row count.
    ///
    /// Loaded instances are not refreshed; call `clear` before reading
    /// affected rows again in this session.
    pub fn execute_bulk(&self, mutation: &dyn BulkMutation, params: &[Value]) -> RepoResult<usize> {
        let statement = mutation.statement(params)?;
        self.state.auto_flush()?;
        let affected = self.state.executor().execute(&statement)?;
        info!(
            "event=bulk_execute module=session status=ok session={} entity={} kind={} rows={affected}",
            self.state.id,
            mutation.entity().name,
            mutation.kind().name()
        );
        Ok(affected)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state.is_open() {
            // Errors are already logged by `finish`.
            let _ = self.state.finish("ROLLBACK;", "session_rollback");
        }
    }
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::{FlushMode, Session, SessionConfig};
    use crate::db::open_db_in_memory;
    use crate::entity::Managed;
    use crate::error::RepoError;
    use crate::model::member::Member;
    use crate::model::team::Team;
    use crate::query::bulk::BulkDelete;
    use crate::query::plan::{QueryPlan, ValidationError};

    #[test]
    fn rejects_connection_without_schema() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err = Session::begin(conn).err().expect("unmigrated connection must fail");
        assert!(matches!(
            err,
            RepoError::UninitializedConnection {
                actual_version: 0,
                ..
            }
        ));
    }

    #[test]
    fn ensure_mapped_reports_missing_table() {
        let conn = open_db_in_memory().unwrap();
        conn.execute_batch("DROP TABLE member;").unwrap();
        let session = Session::begin(conn).unwrap();

        assert!(matches!(
            session.ensure_mapped::<Member>(),
            Err(RepoError::MissingRequiredTable("member"))
        ));
        assert!(session.ensure_mapped::<Team>().is_ok());
    }

    #[test]
    fn persist_assigns_key_and_registers_instance() {
        let session = Session::open_in_memory().unwrap();
        let member = session.persist(Member::new("member1", 10)).unwrap();

        assert_eq!(member.id(), Some(1));
        assert!(session.contains(&member));
        assert!(Managed::same_instance(&session.get::<Member>(1).unwrap(), &member));
    }

    #[test]
    fn detached_handle_with_key_cannot_be_persisted() {
        let session = Session::open_in_memory().unwrap();
        let member = session.persist(Member::new("member1", 10)).unwrap();
        let copy = Managed::new(member.to_detached());

        let err = session.persist_handle(&copy).unwrap_err();
        assert!(matches!(
            err,
            RepoError::Validation(ValidationError::DetachedEntity { id: 1, .. })
        ));
    }

    #[test]
    fn manual_flush_mode_defers_writes() {
        let conn = open_db_in_memory().unwrap();
        let session = Session::begin_with(
            conn,
            SessionConfig {
                flush_mode: FlushMode::Manual,
                ..SessionConfig::default()
            },
        )
        .unwrap();
        let member = session.persist(Member::new("member1", 10)).unwrap();
        member.borrow_mut().age = 30;

        session.clear();
        assert_eq!(session.get::<Member>(1).unwrap().borrow().age, 10);
    }

    #[test]
    fn flush_writes_only_changed_entities() {
        let session = Session::open_in_memory().unwrap();
        let first = session.persist(Member::new("member1", 10)).unwrap();
        let _second = session.persist(Member::new("member2", 20)).unwrap();

        assert_eq!(session.flush().unwrap(), 0);
        first.borrow_mut().username = "renamed".to_string();
        assert_eq!(session.flush().unwrap(), 1);
        assert_eq!(session.flush().unwrap(), 0);
    }

    #[test]
    fn queries_run_while_an_entity_is_borrowed_mutably() {
        let session = Session::open_in_memory().unwrap();
        let member = session.persist(Member::new("member1", 10)).unwrap();
        let all = QueryPlan::<Member>::all();

        let mut guard = member.borrow_mut();
        guard.age = 30;
        assert_eq!(session.count(&all.bind(&[]).unwrap()).unwrap(), 1);
        assert!(matches!(
            session.flush(),
            Err(RepoError::EntityBusy {
                entity: "Member",
                id: 1
            })
        ));
        drop(guard);

        assert_eq!(session.flush().unwrap(), 1);
    }

    #[test]
    fn collection_loads_through_a_mutably_held_owner() {
        let session = Session::open_in_memory().unwrap();
        let team = session.persist(Team::new("teamA")).unwrap();
        session.persist(Member::with_team("member1", 10, &team)).unwrap();
        session.clear();

        let team = session.get::<Team>(1).unwrap();
        let mut guard = team.borrow_mut();
        guard.name = "renamed".to_string();
        let members = guard.members().unwrap();
        drop(guard);

        assert_eq!(members.len(), 1);
        assert_eq!(session.flush().unwrap(), 1);
    }

    #[test]
    fn flushing_a_row_deleted_behind_the_cache_is_stale() {
        let session = Session::open_in_memory().unwrap();
        let member = session.persist(Member::new("member1", 10)).unwrap();

        let purge = BulkDelete::new(QueryPlan::<Member>::all());
        assert_eq!(session.execute_bulk(&purge, &[]).unwrap(), 1);
        member.borrow_mut().age = 30;

        assert!(matches!(
            session.flush(),
            Err(RepoError::StaleState {
                entity: "Member",
                id: 1
            })
        ));
    }
}
