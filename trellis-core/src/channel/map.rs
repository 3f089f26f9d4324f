//! Elementwise Map
//!
//! Applies a transform to every element of an upstream sequence. Each
//! output index depends only on the same input index, so a write to one
//! element dirties exactly one output element.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use smallvec::smallvec;
use tracing::trace;

use super::derived::{Derived, DerivedKind, Emit, NodeState};
use super::{Channel, ChannelEvent};
use crate::error::{ChannelError, Result};
use crate::path::Path;
use crate::value;

/// Element transform of an [`ElementwiseMap`].
pub type Transform = Arc<dyn Fn(&Value) -> Result<Value> + Send + Sync>;

/// A derived channel holding `upstream.map(transform)`.
pub type ElementwiseMap = Derived<MapNode>;

/// [`DerivedKind`] of an [`ElementwiseMap`].
pub struct MapNode {
    upstream: Arc<dyn Channel>,
    transform: Transform,
}

impl MapNode {
    pub fn new(upstream: Arc<dyn Channel>, transform: Transform) -> Self {
        Self {
            upstream,
            transform,
        }
    }
}

/// The output index an upstream path falls into.
fn element_of(path: &Path) -> Option<Path> {
    path.first_segment().map(Path::from)
}

impl DerivedKind for MapNode {
    const INVALIDATES_INSERTED: bool = true;

    fn name(&self) -> &'static str {
        "map"
    }

    fn upstreams(&self) -> Vec<Arc<dyn Channel>> {
        vec![self.upstream.clone()]
    }

    fn on_path_invalidate(
        &mut self,
        slot: usize,
        path: &Path,
        state: &mut NodeState,
    ) -> Result<Emit> {
        match element_of(path) {
            Some(index) => {
                state.dirty.mark_dirty(&index);
                Ok(smallvec![ChannelEvent::PathInvalidate(index)])
            }
            None => self.on_full_invalidate(slot, state),
        }
    }

    fn on_insert(&mut self, _slot: usize, path: &Path, state: &mut NodeState) -> Result<Emit> {
        if path.depth() > 1 {
            // Insertion inside an element changes that element's input.
            let index = element_of(path).unwrap_or_default();
            state.dirty.mark_dirty(&index);
            return Ok(smallvec![ChannelEvent::PathInvalidate(index)]);
        }

        let at = path.last_index()?;
        if let Value::Array(items) = &mut state.cache {
            if at <= items.len() {
                items.insert(at, Value::Null);
            }
        }
        state.dirty.rebase_for_insert(path);
        state.dirty.mark_dirty(path);
        trace!(node = %state.id(), %path, "spliced placeholder");

        let mut emit: Emit = smallvec![ChannelEvent::Insert(path.clone())];
        // An upstream that follows up with its own invalidation gets it
        // forwarded by `on_path_invalidate`; sending one here too would
        // reach listeners once per map in a chain.
        if !self.upstream.invalidates_inserted() {
            emit.push(ChannelEvent::PathInvalidate(path.clone()));
        }
        Ok(emit)
    }

    fn recompute_all(&self, cache: &mut Value) -> Result<()> {
        let input = self.upstream.get_data()?;
        let Value::Array(items) = input else {
            return Err(ChannelError::invalid_path(
                &Path::root(),
                "elementwise map input is not a sequence",
            ));
        };
        let mapped = items
            .iter()
            .map(|item| (self.transform)(item))
            .collect::<Result<Vec<_>>>()?;
        *cache = Value::Array(mapped);
        Ok(())
    }

    fn recompute_at(&self, path: &Path, cache: &mut Value) -> Result<()> {
        let index = element_of(path)
            .ok_or_else(|| ChannelError::invalid_path(path, "no element index"))?;
        let input = self.upstream.get_data_at_index(&index)?;
        value::write_at(cache, &index, (self.transform)(&input)?)
    }
}

impl ElementwiseMap {
    /// Map every element of `upstream` through `f`.
    pub fn new<F>(upstream: Arc<dyn Channel>, f: F) -> Arc<Self>
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self::try_new(upstream, move |item| Ok(f(item)))
    }

    /// Map every element of `upstream` through a transform that may fail.
    ///
    /// A failure surfaces from the read that triggered the recompute.
    pub fn try_new<F>(upstream: Arc<dyn Channel>, f: F) -> Arc<Self>
    where
        F: Fn(&Value) -> Result<Value> + Send + Sync + 'static,
    {
        Derived::with_kind(MapNode::new(upstream, Arc::new(f)))
    }

    /// Map every element through a typed function, converting with serde.
    pub fn typed<A, B, F>(upstream: Arc<dyn Channel>, f: F) -> Arc<Self>
    where
        A: DeserializeOwned,
        B: Serialize,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        Self::try_new(upstream, move |item| {
            let input: A = serde_json::from_value(item.clone())?;
            Ok(serde_json::to_value(f(input))?)
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
