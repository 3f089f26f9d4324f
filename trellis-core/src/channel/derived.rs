//! Derived Node Implementation
//!
//! A Derived node caches a value computed from one or more upstream
//! channels and recomputes only what is stale, only when read.
//!
//! # How Derived Nodes Work
//!
//! 1. On construction the node registers one weak edge on each upstream,
//!    tagged with the upstream's slot index. The cache starts fully dirty.
//!
//! 2. When an event arrives on a slot, the node's [`DerivedKind`] updates
//!    the dirty set (and, for insertions, the shape of the cache) and says
//!    which events to pass on. Nothing is recomputed at this point.
//!
//! 3. On `get_data`, a fully invalidated node recomputes everything once;
//!    otherwise only the listed dirty paths are recomputed.
//!
//! 4. On `get_data_at_index`, only the stale addresses covering the
//!    requested path are recomputed.
//!
//! # Locking
//!
//! Cache, dirty set and kind live behind one mutex. Recomputation holds it
//! while reading upstream, which is safe because the graph is acyclic and
//! locks are always taken downstream first. Event fan-out happens after the
//! lock is released.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use smallvec::{smallvec, SmallVec};
use tracing::{trace, warn};

use super::{
    Channel, ChannelEvent, ChannelId, Connection, NodeKind, Outgoing, Subscriber, SubscriberId,
};
use crate::dirty::DirtySet;
use crate::error::{ChannelError, Result};
use crate::path::Path;
use crate::value;

/// Events a handler asks its node to pass downstream, in order.
pub type Emit = SmallVec<[ChannelEvent; 2]>;

/// The per-node state event handlers may touch.
#[derive(Debug)]
pub struct NodeState {
    id: ChannelId,

    /// Last computed output. Valid only where `dirty` says clean.
    pub cache: Value,

    /// Stale addresses of `cache`.
    pub dirty: DirtySet,
}

impl NodeState {
    fn new(id: ChannelId) -> Self {
        Self {
            id,
            cache: Value::Null,
            dirty: DirtySet::all_dirty(),
        }
    }

    /// The owning node.
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// The error for an event this node has no reaction to.
    pub fn unsupported(&self, event: &ChannelEvent) -> ChannelError {
        ChannelError::UnsupportedModification {
            node: self.id,
            event: event.to_string(),
        }
    }
}

/// The behaviour that distinguishes one kind of derived node from another.
///
/// Event handlers may only change the node's [`NodeState`] and must not
/// read upstream. Recompute handlers read upstream and write the cache.
pub trait DerivedKind: Send + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Upstream channels, in slot order.
    fn upstreams(&self) -> Vec<Arc<dyn Channel>>;

    /// See [`Channel::invalidates_inserted`].
    const INVALIDATES_INSERTED: bool = false;

    /// The upstream on `slot` may have changed entirely.
    fn on_full_invalidate(&mut self, _slot: usize, state: &mut NodeState) -> Result<Emit> {
        state.dirty.mark_all_dirty();
        Ok(smallvec![ChannelEvent::FullInvalidate])
    }

    /// The upstream on `slot` may have changed at `path`.
    fn on_path_invalidate(
        &mut self,
        slot: usize,
        path: &Path,
        state: &mut NodeState,
    ) -> Result<Emit>;

    /// The upstream on `slot` had an element inserted at `path`.
    fn on_insert(&mut self, _slot: usize, path: &Path, state: &mut NodeState) -> Result<Emit> {
        Err(state.unsupported(&ChannelEvent::Insert(path.clone())))
    }

    /// Rebuild the whole cache from upstream.
    fn recompute_all(&self, cache: &mut Value) -> Result<()>;

    /// Rebuild the cache at `path` (and below) from upstream.
    fn recompute_at(&self, path: &Path, cache: &mut Value) -> Result<()>;
}

/// Counts of recompute handler invocations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecomputeStats {
    /// `recompute_all` calls.
    pub full: usize,

    /// `recompute_at` calls.
    pub partial: usize,
}

struct Inner<K> {
    kind: K,
    state: NodeState,
}

/// A lazily recomputed channel whose value is a function of its upstreams.
pub struct Derived<K: DerivedKind> {
    /// Unique identifier for this node.
    id: ChannelId,

    /// Owner ID of the edges this node registered upstream.
    subscriber_id: SubscriberId,

    /// Strong references to the inputs, in slot order.
    upstreams: Vec<Arc<dyn Channel>>,

    inner: Mutex<Inner<K>>,

    /// Downstream edges.
    outgoing: Outgoing,

    /// Set once the node has left the graph; every read then recomputes.
    detached: AtomicBool,

    full_recomputes: AtomicUsize,
    partial_recomputes: AtomicUsize,
}

impl<K: DerivedKind> Derived<K> {
    /// Create a node of the given kind and connect it to its upstreams.
    pub fn with_kind(kind: K) -> Arc<Self> {
        let upstreams = kind.upstreams();
        let id = ChannelId::new();
        let node = Arc::new(Self {
            id,
            subscriber_id: SubscriberId::new(),
            upstreams,
            inner: Mutex::new(Inner {
                kind,
                state: NodeState::new(id),
            }),
            outgoing: Outgoing::new(),
            detached: AtomicBool::new(false),
            full_recomputes: AtomicUsize::new(0),
            partial_recomputes: AtomicUsize::new(0),
        });

        let weak: Weak<dyn Subscriber> = Arc::downgrade(&node) as Weak<dyn Subscriber>;
        for (slot, upstream) in node.upstreams.iter().enumerate() {
            upstream.connect(Connection::new(node.subscriber_id, slot, weak.clone()));
            trace!(node = %node.id, upstream = %upstream.id(), slot, "connected");
        }
        node
    }

    /// Remove this node's edges from all upstreams.
    ///
    /// The node stays readable but no longer hears about upstream writes,
    /// so from here on every read recomputes from upstream.
    pub fn disconnect(&self) {
        if self.detached.swap(true, Ordering::SeqCst) {
            return;
        }
        for upstream in &self.upstreams {
            upstream.disconnect(self.subscriber_id);
        }
        self.inner.lock().state.dirty.mark_all_dirty();
        trace!(node = %self.id, "disconnected");
    }

    pub fn is_connected(&self) -> bool {
        !self.detached.load(Ordering::SeqCst)
    }

    /// Recompute counters since construction.
    pub fn stats(&self) -> RecomputeStats {
        RecomputeStats {
            full: self.full_recomputes.load(Ordering::SeqCst),
            partial: self.partial_recomputes.load(Ordering::SeqCst),
        }
    }

    /// A copy of the current dirty set.
    pub fn dirty(&self) -> DirtySet {
        self.inner.lock().state.dirty.clone()
    }

    /// Run `f` against the node kind, e.g. to inspect its configuration.
    pub fn with_node<R>(&self, f: impl FnOnce(&K) -> R) -> R {
        f(&self.inner.lock().kind)
    }

    fn recompute_all(&self, inner: &mut Inner<K>) -> Result<()> {
        self.full_recomputes.fetch_add(1, Ordering::SeqCst);
        trace!(node = %self.id, kind = inner.kind.name(), "recompute all");
        inner.kind.recompute_all(&mut inner.state.cache)
    }

    fn recompute_at(&self, inner: &mut Inner<K>, path: &Path) -> Result<()> {
        self.partial_recomputes.fetch_add(1, Ordering::SeqCst);
        trace!(node = %self.id, kind = inner.kind.name(), %path, "recompute at");
        inner.kind.recompute_at(path, &mut inner.state.cache)?;
        inner.state.dirty.mark_clean(path);
        Ok(())
    }

    /// Bring the whole cache up to date.
    fn resolve_all(&self, inner: &mut Inner<K>) -> Result<()> {
        match inner.state.dirty.list_dirty() {
            None => {
                self.recompute_all(inner)?;
                inner.state.dirty.mark_all_clean();
            }
            Some(pending) => {
                for path in pending {
                    // A listed ancestor is recomputed on its own turn and
                    // covers this path; a cleaned one already did.
                    let covered = path
                        .parent()
                        .is_some_and(|parent| inner.state.dirty.is_dirty(&parent));
                    if covered || !inner.state.dirty.is_dirty(&path) {
                        continue;
                    }
                    self.recompute_at(inner, &path)?;
                }
            }
        }
        Ok(())
    }

    /// Bring every address covering or below `path` up to date.
    fn resolve_at(&self, inner: &mut Inner<K>, path: &Path) -> Result<()> {
        if let Some(root) = inner.state.dirty.dirty_root(path) {
            self.recompute_at(inner, &root)?;
        }
        for below in inner.state.dirty.dirty_below(path) {
            if inner.state.dirty.is_dirty(&below) {
                self.recompute_at(inner, &below)?;
            }
        }
        Ok(())
    }

    fn settle(&self, inner: &mut Inner<K>) {
        if self.detached.load(Ordering::SeqCst) {
            inner.state.dirty.mark_all_dirty();
        }
    }

    fn dispatch(&self, slot: usize, event: &ChannelEvent) -> Result<Emit> {
        let mut guard = self.inner.lock();
        let Inner { kind, state } = &mut *guard;
        trace!(node = %self.id, kind = kind.name(), slot, %event, "received");
        match event {
            ChannelEvent::FullInvalidate => kind.on_full_invalidate(slot, state),
            ChannelEvent::PathInvalidate(path) => kind.on_path_invalidate(slot, path, state),
            ChannelEvent::Insert(path) => kind.on_insert(slot, path, state),
        }
    }
}

impl<K: DerivedKind> Channel for Derived<K> {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Derived
    }

    fn get_data(&self) -> Result<Value> {
        let mut inner = self.inner.lock();
        self.resolve_all(&mut inner)?;
        let data = inner.state.cache.clone();
        self.settle(&mut inner);
        Ok(data)
    }

    fn get_data_at_index(&self, path: &Path) -> Result<Value> {
        if path.is_root() {
            return self.get_data();
        }
        let mut inner = self.inner.lock();
        self.resolve_at(&mut inner, path)?;
        let stale = inner.state.dirty.is_dirty(path);
        debug_assert!(!stale, "derived node {} left `{path}` dirty after resolving", self.id);
        if stale {
            return Err(ChannelError::StaleCacheRead {
                node: self.id,
                path: path.clone(),
            });
        }
        let data = value::get_at(&inner.state.cache, path)?.clone();
        self.settle(&mut inner);
        Ok(data)
    }

    fn outgoing(&self) -> &Outgoing {
        &self.outgoing
    }

    fn invalidates_inserted(&self) -> bool {
        K::INVALIDATES_INSERTED
    }
}

impl<K: DerivedKind> Subscriber for Derived<K> {
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn receive(&self, slot: usize, event: &ChannelEvent) -> Result<()> {
        let emitted = match self.dispatch(slot, event) {
            Ok(emitted) => emitted,
            Err(err) => {
                if matches!(err, ChannelError::UnsupportedModification { .. }) {
                    warn!(node = %self.id, slot, %event, "unsupported modification");
                }
                return Err(err);
            }
        };
        for next in &emitted {
            self.outgoing.emit(self.id, next)?;
        }
        Ok(())
    }
}

impl<K: DerivedKind> Drop for Derived<K> {
    fn drop(&mut self) {
        if !self.detached.load(Ordering::SeqCst) {
            for upstream in &self.upstreams {
                upstream.disconnect(self.subscriber_id);
            }
        }
    }
}

impl<K: DerivedKind> std::fmt::Debug for Derived<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("Derived")
            .field("id", &self.id)
            .field("kind", &inner.kind.name())
            .field("dirty", &inner.state.dirty)
            .field("stats", &self.stats())
            .field("downstream_count", &self.outgoing.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
