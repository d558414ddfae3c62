//! Replicated entity fields with change notification.
//!
//! A [`ReplicatedEntity`] is an ordered list of typed fields, each declared
//! once with a stable tag. Writes are authority gated. Once per simulation
//! tick [`ReplicatedEntity::collect_changes`] diffs every field against the
//! last value broadcast and produces an [`EntityUpdate`] (postcard-encoded,
//! declaration order). Incoming updates are applied with
//! [`ReplicatedEntity::apply_update`], again in declaration order, firing
//! each changed field's observers once with `(old, new)`.
//!
//! Delivery of updates to other participants belongs to the remote runtime.

use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;

use bevy_ecs::prelude::*;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::authority::{AuthorityGate, Ownership};
use crate::error::Rejected;

// ---------------------------------------------------------------------------
// NetworkId
// ---------------------------------------------------------------------------

/// Runtime-assigned identifier of a networked entity, identical on every
/// participant.
#[derive(Component, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NetworkId(pub u64);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures while writing, encoding, or applying replicated fields.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// The write was refused by the authority gate.
    #[error(transparent)]
    Rejected(#[from] Rejected),

    /// An update named a field this entity never declared.
    #[error("unknown replicated field `{0}`")]
    UnknownField(String),

    /// A handle does not refer to a field of the expected type.
    #[error("field handle #{0} does not match this entity's declarations")]
    HandleMismatch(usize),

    /// Field bytes could not be decoded.
    #[error("cannot decode field `{tag}`: {source}")]
    Decode {
        /// Field tag.
        tag: String,
        /// Underlying codec error.
        #[source]
        source: postcard::Error,
    },

    /// Field value could not be encoded.
    #[error("cannot encode field `{tag}`: {source}")]
    Encode {
        /// Field tag.
        tag: &'static str,
        /// Underlying codec error.
        #[source]
        source: postcard::Error,
    },
}

// ---------------------------------------------------------------------------
// Wire message
// ---------------------------------------------------------------------------

/// Changed fields of one entity, produced once per tick.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EntityUpdate {
    /// Entity the fields belong to.
    pub network_id: NetworkId,
    /// Tick at which the changes were collected.
    pub tick: u64,
    /// `(tag, postcard bytes)` in declaration order.
    pub fields: Vec<(String, Vec<u8>)>,
}

/// Outcome of [`ReplicatedEntity::apply_update`].
#[derive(Debug, Default)]
pub struct ApplyReport {
    /// Fields whose value changed.
    pub changed: usize,
    /// Fields that could not be applied. Other fields were still applied.
    pub errors: Vec<ReplicationError>,
}

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// Bound shared by every replicated value type.
pub trait FieldValue: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> FieldValue for T where T: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static
{}

/// Typed reference to a declared field.
pub struct FieldHandle<T> {
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> FieldHandle<T> {
    /// Handle to the `index`-th declared field. Only valid for entities
    /// whose declarations put a `T` at that position.
    pub const fn at(index: usize) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    /// Declaration index.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl<T> Clone for FieldHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for FieldHandle<T> {}

impl<T> std::fmt::Debug for FieldHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("FieldHandle").field(&self.index).finish()
    }
}

type ChangeObserver<T> = Box<dyn FnMut(&T, &T) + Send + Sync>;

struct Field<T: FieldValue> {
    tag: &'static str,
    value: T,
    last_broadcast: Option<T>,
    observers: Vec<ChangeObserver<T>>,
}

impl<T: FieldValue> Field<T> {
    /// Stores `value`; fires observers if it differs. Returns whether it did.
    fn replace(&mut self, value: T) -> bool {
        if self.value == value {
            return false;
        }
        let old = std::mem::replace(&mut self.value, value);
        for observer in &mut self.observers {
            observer(&old, &self.value);
        }
        true
    }
}

/// Object-safe view of a [`Field`] used for tag-driven encode/apply.
trait ErasedField: Send + Sync {
    fn tag(&self) -> &'static str;
    fn encode_if_dirty(&mut self) -> Result<Option<Vec<u8>>, ReplicationError>;
    fn apply_bytes(&mut self, bytes: &[u8]) -> Result<bool, ReplicationError>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: FieldValue> ErasedField for Field<T> {
    fn tag(&self) -> &'static str {
        self.tag
    }

    fn encode_if_dirty(&mut self) -> Result<Option<Vec<u8>>, ReplicationError> {
        if self.last_broadcast.as_ref() == Some(&self.value) {
            return Ok(None);
        }
        let bytes = postcard::to_allocvec(&self.value).map_err(|source| {
            ReplicationError::Encode {
                tag: self.tag,
                source,
            }
        })?;
        self.last_broadcast = Some(self.value.clone());
        Ok(Some(bytes))
    }

    fn apply_bytes(&mut self, bytes: &[u8]) -> Result<bool, ReplicationError> {
        let value: T = postcard::from_bytes(bytes).map_err(|source| ReplicationError::Decode {
            tag: self.tag.to_string(),
            source,
        })?;
        // Remote values are already known to every peer; never echo them.
        self.last_broadcast = Some(value.clone());
        Ok(self.replace(value))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// ReplicatedEntity
// ---------------------------------------------------------------------------

/// Ordered set of replicated fields belonging to one entity.
#[derive(Component, Default)]
pub struct ReplicatedEntity {
    fields: Vec<Box<dyn ErasedField>>,
    by_tag: HashMap<&'static str, usize>,
}

impl ReplicatedEntity {
    /// Entity with no fields.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the next field. Tags must be unique per entity.
    ///
    /// # Panics
    ///
    /// Panics if `tag` was already declared; declarations are static.
    pub fn declare<T: FieldValue>(&mut self, tag: &'static str, initial: T) -> FieldHandle<T> {
        assert!(
            !self.by_tag.contains_key(tag),
            "replicated field `{tag}` declared twice"
        );
        let index = self.fields.len();
        self.fields.push(Box::new(Field {
            tag,
            value: initial,
            last_broadcast: None,
            observers: Vec::new(),
        }));
        self.by_tag.insert(tag, index);
        FieldHandle::at(index)
    }

    /// Number of declared fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// `true` if nothing was declared.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Declared tags in declaration order.
    pub fn tags(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|f| f.tag())
    }

    /// Current value. Reads are never gated.
    pub fn get<T: FieldValue>(&self, handle: FieldHandle<T>) -> Option<&T> {
        self.fields
            .get(handle.index)
            .and_then(|f| f.as_any().downcast_ref::<Field<T>>())
            .map(|f| &f.value)
    }

    /// Authority-gated write. Returns `Ok(true)` if the value changed (and
    /// observers fired), `Ok(false)` if it was already equal.
    pub fn set<T: FieldValue>(
        &mut self,
        handle: FieldHandle<T>,
        value: T,
        gate: &AuthorityGate,
        ownership: &Ownership,
    ) -> Result<bool, ReplicationError> {
        gate.check_write(ownership)?;
        let field = self.field_mut(handle)?;
        Ok(field.replace(value))
    }

    /// Registers `observer(old, new)` on a field.
    pub fn on_changed<T: FieldValue>(
        &mut self,
        handle: FieldHandle<T>,
        observer: impl FnMut(&T, &T) + Send + Sync + 'static,
    ) -> Result<(), ReplicationError> {
        self.field_mut(handle)?.observers.push(Box::new(observer));
        Ok(())
    }

    /// Encodes every field that differs from its last broadcast value.
    /// Returns `None` when nothing changed.
    pub fn collect_changes(
        &mut self,
        network_id: NetworkId,
        tick: u64,
    ) -> Result<Option<EntityUpdate>, ReplicationError> {
        let mut fields = Vec::new();
        for field in &mut self.fields {
            if let Some(bytes) = field.encode_if_dirty()? {
                fields.push((field.tag().to_string(), bytes));
            }
        }
        if fields.is_empty() {
            return Ok(None);
        }
        Ok(Some(EntityUpdate {
            network_id,
            tick,
            fields,
        }))
    }

    /// Applies a remote update in declaration order, regardless of the
    /// order fields appear in the message.
    pub fn apply_update(&mut self, update: &EntityUpdate) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut ordered = Vec::with_capacity(update.fields.len());
        for (tag, bytes) in &update.fields {
            match self.by_tag.get(tag.as_str()) {
                Some(&index) => ordered.push((index, bytes)),
                None => report
                    .errors
                    .push(ReplicationError::UnknownField(tag.clone())),
            }
        }
        ordered.sort_by_key(|(index, _)| *index);

        for (index, bytes) in ordered {
            match self.fields[index].apply_bytes(bytes) {
                Ok(true) => report.changed += 1,
                Ok(false) => {}
                Err(err) => report.errors.push(err),
            }
        }
        if !report.errors.is_empty() {
            tracing::warn!(
                network_id = update.network_id.0,
                errors = report.errors.len(),
                "replication update partially rejected"
            );
        }
        report
    }

    fn field_mut<T: FieldValue>(
        &mut self,
        handle: FieldHandle<T>,
    ) -> Result<&mut Field<T>, ReplicationError> {
        self.fields
            .get_mut(handle.index)
            .and_then(|f| f.as_any_mut().downcast_mut::<Field<T>>())
            .ok_or(ReplicationError::HandleMismatch(handle.index))
    }
}

impl std::fmt::Debug for ReplicatedEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicatedEntity")
            .field("fields", &self.tags().collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
#[path = "replication_tests.rs"]
mod tests;
