//! Entity metadata, managed handles and tuple decoding helpers.
//!
//! # Responsibility
//! - Describe how a Rust type maps onto one SQLite table.
//! - Hand out shared, interior-mutable handles for session-managed instances.
//!
//! # Invariants
//! - Tuples are laid out as `id` followed by `EntityMeta::fields` in order.
//! - Identity of a persisted entity is its primary key; before persistence it
//!   is the handle itself (`Managed::same_instance`).

pub mod reference;

use crate::error::{RepoError, RepoResult};
use rusqlite::types::Value;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt::{Debug, Formatter};
use std::rc::Rc;

pub use reference::{LazyCollection, LazyRef, LoadContext, ToOne};

/// Generated primary key type shared by all mapped tables.
pub type EntityId = i64;

/// Logical name of the primary key pseudo-field.
pub const ID_FIELD: &str = "id";

/// Storage kind of a mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Integer,
    Text,
}

impl FieldKind {
    /// Returns whether `value` can be stored in (or compared with) this field.
    ///
    /// `NULL` is never accepted here; null checks go through `IsNull`.
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Integer, Value::Integer(_)) | (Self::Text, Value::Text(_))
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Text => "text",
        }
    }
}

/// Returns a short type name for a bound value, used in validation messages.
pub fn value_kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Integer(_) => "integer",
        Value::Real(_) => "real",
        Value::Text(_) => "text",
        Value::Blob(_) => "blob",
    }
}

/// Mapping of one logical field onto one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldMeta {
    /// Logical name used by descriptors and sort requests (snake_case).
    pub name: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
    pub nullable: bool,
}

/// Static table mapping for one entity type.
#[derive(Debug, PartialEq, Eq)]
pub struct EntityMeta {
    /// Display name used in errors and log events.
    pub name: &'static str,
    pub table: &'static str,
    pub id_column: &'static str,
    /// Non-key fields in tuple order.
    pub fields: &'static [FieldMeta],
}

impl EntityMeta {
    /// Resolves a logical field name, including the `id` pseudo-field.
    pub fn field(&self, name: &str) -> Option<FieldMeta> {
        if name == ID_FIELD {
            return Some(FieldMeta {
                name: ID_FIELD,
                column: self.id_column,
                kind: FieldKind::Integer,
                nullable: false,
            });
        }
        self.fields.iter().find(|field| field.name == name).copied()
    }

    /// Number of columns in one entity tuple (key included).
    pub fn column_count(&self) -> usize {
        self.fields.len() + 1
    }

    /// Renders the select list for this entity, optionally alias-qualified.
    pub fn select_list(&self, alias: Option<&str>) -> String {
        std::iter::once(self.id_column)
            .chain(self.fields.iter().map(|field| field.column))
            .map(|column| qualify(alias, column))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub(crate) fn find_by_key_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = ?1",
            self.select_list(None),
            self.table,
            self.id_column
        )
    }

    pub(crate) fn insert_sql(&self, with_id: bool) -> String {
        let mut columns = Vec::with_capacity(self.column_count());
        if with_id {
            columns.push(self.id_column);
        }
        columns.extend(self.fields.iter().map(|field| field.column));
        let placeholders = (1..=columns.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            self.table,
            columns.join(", ")
        )
    }

    pub(crate) fn update_sql(&self) -> String {
        let assignments = self
            .fields
            .iter()
            .enumerate()
            .map(|(index, field)| format!("{} = ?{}", field.column, index + 1))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "UPDATE {} SET {assignments} WHERE {} = ?{}",
            self.table,
            self.id_column,
            self.fields.len() + 1
        )
    }

    pub(crate) fn delete_by_key_sql(&self) -> String {
        format!("DELETE FROM {} WHERE {} = ?1", self.table, self.id_column)
    }
}

pub(crate) fn qualify(alias: Option<&str>, column: &str) -> String {
    match alias {
        Some(alias) => format!("{alias}.{column}"),
        None => column.to_string(),
    }
}

/// A Rust type mapped onto one table.
///
/// Implementations are hand-written per entity; see `model::member`.
pub trait Entity: Debug + Clone + 'static {
    fn meta() -> &'static EntityMeta;

    /// Primary key, `None` while transient.
    fn id(&self) -> Option<EntityId>;

    /// Called once by the session after the row is inserted.
    fn assign_id(&mut self, id: EntityId);

    /// Column values for `EntityMeta::fields`, in order, key excluded.
    ///
    /// # Errors
    /// - `ValidationError::UnsavedReference` when an owning reference points
    ///   at a transient entity.
    fn to_values(&self) -> RepoResult<Vec<Value>>;

    /// Builds an instance from a full tuple (`id` first).
    fn from_values(values: &[Value], ctx: &LoadContext) -> RepoResult<Self>;
}

/// Shared handle to an entity instance.
///
/// Within one session every handle for the same key points to the same
/// instance. Mutations through `borrow_mut` are picked up by the next flush
/// unless the instance was loaded read-only.
pub struct Managed<E>(Rc<RefCell<E>>);

impl<E> Managed<E> {
    /// Wraps a transient instance. It becomes managed once persisted.
    pub fn new(entity: E) -> Self {
        Self(Rc::new(RefCell::new(entity)))
    }

    /// # Panics
    /// Panics if the instance is currently mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, E> {
        self.0.borrow()
    }

    /// Like `borrow`, but `None` while the instance is mutably borrowed.
    pub fn try_borrow(&self) -> Option<Ref<'_, E>> {
        self.0.try_borrow().ok()
    }

    /// # Panics
    /// Panics if the instance is currently borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, E> {
        self.0.borrow_mut()
    }

    /// Reference identity: both handles point at one in-memory instance.
    pub fn same_instance(left: &Self, right: &Self) -> bool {
        Rc::ptr_eq(&left.0, &right.0)
    }
}

impl<E: Entity> Managed<E> {
    pub fn id(&self) -> Option<EntityId> {
        self.0.borrow().id()
    }

    /// Copies the current state out of the handle.
    pub fn to_detached(&self) -> E {
        self.0.borrow().clone()
    }
}

impl<E> Clone for Managed<E> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<E: Debug> Debug for Managed<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.0.try_borrow() {
            Ok(entity) => f.debug_tuple("Managed").field(&*entity).finish(),
            Err(_) => f.write_str("Managed(<borrowed>)"),
        }
    }
}

/// Positional reader over one entity tuple, with column-aware error messages.
pub struct TupleReader<'a> {
    meta: &'static EntityMeta,
    values: &'a [Value],
}

impl<'a> TupleReader<'a> {
    pub fn new(meta: &'static EntityMeta, values: &'a [Value]) -> RepoResult<Self> {
        if values.len() != meta.column_count() {
            return Err(RepoError::InvalidData(format!(
                "{} tuple has {} columns, expected {}",
                meta.table,
                values.len(),
                meta.column_count()
            )));
        }
        Ok(Self { meta, values })
    }

    pub fn id(&self) -> RepoResult<EntityId> {
        integer_at(self.values, 0, &self.location(self.meta.id_column))
    }

    pub fn integer(&self, field: &str) -> RepoResult<i64> {
        let (index, column) = self.position(field)?;
        integer_at(self.values, index, &self.location(column))
    }

    pub fn optional_integer(&self, field: &str) -> RepoResult<Option<i64>> {
        let (index, column) = self.position(field)?;
        optional_integer_at(self.values, index, &self.location(column))
    }

    pub fn text(&self, field: &str) -> RepoResult<String> {
        let (index, column) = self.position(field)?;
        text_at(self.values, index, &self.location(column))
    }

    fn position(&self, field: &str) -> RepoResult<(usize, &'static str)> {
        self.meta
            .fields
            .iter()
            .position(|candidate| candidate.name == field)
            .map(|index| (index + 1, self.meta.fields[index].column))
            .ok_or_else(|| {
                RepoError::InvalidData(format!("{} has no field `{field}`", self.meta.name))
            })
    }

    fn location(&self, column: &str) -> String {
        format!("{}.{column}", self.meta.table)
    }
}

/// Reads a required integer column.
pub fn integer_at(values: &[Value], index: usize, location: &str) -> RepoResult<i64> {
    match values.get(index) {
        Some(Value::Integer(value)) => Ok(*value),
        other => Err(unexpected(other, "integer", location)),
    }
}

/// Reads a nullable integer column.
pub fn optional_integer_at(values: &[Value], index: usize, location: &str) -> RepoResult<Option<i64>> {
    match values.get(index) {
        Some(Value::Null) => Ok(None),
        Some(Value::Integer(value)) => Ok(Some(*value)),
        other => Err(unexpected(other, "integer or null", location)),
    }
}

/// Reads a required text column.
pub fn text_at(values: &[Value], index: usize, location: &str) -> RepoResult<String> {
    match values.get(index) {
        Some(Value::Text(value)) => Ok(value.clone()),
        other => Err(unexpected(other, "text", location)),
    }
}

/// Reads a nullable text column.
pub fn optional_text_at(values: &[Value], index: usize, location: &str) -> RepoResult<Option<String>> {
    match values.get(index) {
        Some(Value::Null) => Ok(None),
        Some(Value::Text(value)) => Ok(Some(value.clone())),
        other => Err(unexpected(other, "text or null", location)),
    }
}

fn unexpected(found: Option<&Value>, expected: &str, location: &str) -> RepoError {
    match found {
        Some(value) => RepoError::InvalidData(format!(
            "expected {expected} in {location}, found {}",
            value_kind_name(value)
        )),
        None => RepoError::InvalidData(format!("missing column {location}")),
    }
}
