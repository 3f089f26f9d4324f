//! Path View
//!
//! Exposes `upstream[watched]` as a channel of its own. Events from
//! upstream are translated into the view's address space: writes inside
//! the watched value become writes at the relative sub-path, writes at or
//! above it invalidate the whole view, and everything else is ignored.
//!
//! The watched path is state, not configuration. Inserting into the
//! sequence that holds the watched element (at or before it) moves the
//! element, and the view follows it without recomputing.

use std::sync::Arc;

use serde_json::Value;
use smallvec::{smallvec, SmallVec};
use tracing::debug;

use super::derived::{Derived, DerivedKind, Emit, NodeState};
use super::{Channel, ChannelEvent};
use crate::error::Result;
use crate::path::Path;
use crate::value;

/// A derived channel holding the upstream value at a (moving) path.
pub type PathView = Derived<ViewNode>;

/// [`DerivedKind`] of a [`PathView`].
pub struct ViewNode {
    upstream: Arc<dyn Channel>,
    watched: Path,
}

impl ViewNode {
    pub fn new(upstream: Arc<dyn Channel>, watched: Path) -> Self {
        Self { upstream, watched }
    }

    /// The upstream path currently viewed.
    pub fn watched(&self) -> &Path {
        &self.watched
    }
}

impl DerivedKind for ViewNode {
    fn name(&self) -> &'static str {
        "view"
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
        if path.is_ancestor_or_self_of(&self.watched) {
            // The watched value itself, or a container holding it, was replaced.
            return self.on_full_invalidate(slot, state);
        }
        match path.sub_path(&self.watched) {
            Some(sub) => {
                state.dirty.mark_dirty(&sub);
                Ok(smallvec![ChannelEvent::PathInvalidate(sub)])
            }
            None => Ok(SmallVec::new()),
        }
    }

    fn on_insert(&mut self, _slot: usize, path: &Path, state: &mut NodeState) -> Result<Emit> {
        if let Some(sub) = path.sub_path(&self.watched) {
            if !state.dirty.is_all_dirty() {
                match value::insert_at(&mut state.cache, &sub, Value::Null) {
                    Ok(()) => {
                        state.dirty.rebase_for_insert(&sub);
                        state.dirty.mark_dirty(&sub);
                    }
                    Err(_) => state.dirty.mark_all_dirty(),
                }
            }
            return Ok(smallvec![ChannelEvent::Insert(sub)]);
        }

        if let Some(moved) = self.watched.shift_for_insert(path) {
            debug!(node = %state.id(), from = %self.watched, to = %moved, "view re-based");
            self.watched = moved;
        }
        Ok(SmallVec::new())
    }

    fn recompute_all(&self, cache: &mut Value) -> Result<()> {
        *cache = self.upstream.get_data_at_index(&self.watched)?;
        Ok(())
    }

    fn recompute_at(&self, path: &Path, cache: &mut Value) -> Result<()> {
        let data = self.upstream.get_data_at_index(&self.watched.join(path))?;
        value::write_at(cache, path, data)
    }
}

impl PathView {
    /// View `upstream` at `path`.
    pub fn new(upstream: Arc<dyn Channel>, path: impl Into<Path>) -> Arc<Self> {
        Derived::with_kind(ViewNode::new(upstream, path.into()))
    }

    /// The upstream path currently viewed.
    pub fn watched(&self) -> Path {
        self.with_node(|node| node.watched().clone())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
