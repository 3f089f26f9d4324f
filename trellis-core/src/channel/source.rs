//! Source Implementation
//!
//! A Source is the authoritative store for a value. It is the only kind of
//! channel that accepts writes.
//!
//! # How Sources Work
//!
//! 1. A write mutates the value in place, under the value lock.
//!
//! 2. The lock is released.
//!
//! 3. The matching event is delivered to every downstream edge before the
//!    write call returns.
//!
//! Reads never have side effects.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{Channel, ChannelEvent, ChannelId, NodeKind, Outgoing};
use crate::error::Result;
use crate::path::Path;
use crate::value;

/// An authoritative, externally written channel.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use trellis_core::channel::{Channel, Source};
/// use trellis_core::path::Path;
///
/// let rows = Source::new(json!([1, 2, 3]));
/// rows.set_data_at_index(&Path::from("0"), json!(4)).unwrap();
/// rows.insert_at_index(&Path::from("1"), json!(9)).unwrap();
/// assert_eq!(rows.get_data().unwrap(), json!([4, 9, 2, 3]));
/// ```
pub struct Source {
    /// Unique identifier for this source.
    id: ChannelId,

    /// The current value.
    value: RwLock<Value>,

    /// Downstream edges.
    outgoing: Outgoing,
}

impl Source {
    /// Create a new source holding `value`.
    pub fn new(value: impl Into<Value>) -> Arc<Self> {
        Arc::new(Self {
            id: ChannelId::new(),
            value: RwLock::new(value.into()),
            outgoing: Outgoing::new(),
        })
    }

    /// Create a new source from any serializable value.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Arc<Self>> {
        Ok(Self::new(serde_json::to_value(value)?))
    }

    /// Replace the whole value and invalidate everything downstream.
    pub fn set_data(&self, new_value: impl Into<Value>) -> Result<()> {
        *self.value.write() = new_value.into();
        debug!(node = %self.id, "set data");
        self.outgoing.emit(self.id, &ChannelEvent::FullInvalidate)
    }

    /// Replace the value at `path` and invalidate that path downstream.
    ///
    /// The root path behaves like [`Source::set_data`].
    pub fn set_data_at_index(&self, path: &Path, new_value: impl Into<Value>) -> Result<()> {
        if path.is_root() {
            return self.set_data(new_value);
        }
        value::set_at(&mut self.value.write(), path, new_value.into())?;
        debug!(node = %self.id, %path, "set data at index");
        self.outgoing
            .emit(self.id, &ChannelEvent::PathInvalidate(path.clone()))
    }

    /// Insert into the sequence at `path.parent()`, at the index named by
    /// the last segment of `path`.
    pub fn insert_at_index(&self, path: &Path, new_value: impl Into<Value>) -> Result<()> {
        value::insert_at(&mut self.value.write(), path, new_value.into())?;
        debug!(node = %self.id, %path, "insert at index");
        self.outgoing.emit(self.id, &ChannelEvent::Insert(path.clone()))
    }

    /// Replace the whole value with `f(current)`.
    pub fn update<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&Value) -> Value,
    {
        let new_value = {
            let guard = self.value.read();
            f(&guard)
        };
        self.set_data(new_value)
    }
}

impl Channel for Source {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Source
    }

    fn get_data(&self) -> Result<Value> {
        Ok(self.value.read().clone())
    }

    fn get_data_at_index(&self, path: &Path) -> Result<Value> {
        value::get_at(&self.value.read(), path).cloned()
    }

    fn outgoing(&self) -> &Outgoing {
        &self.outgoing
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.id)
            .field("value", &*self.value.read())
            .field("downstream_count", &self.outgoing.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
