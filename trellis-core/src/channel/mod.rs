//! Channels
//!
//! This module implements the channel graph: addressable data nodes that
//! are either authoritative stores or cached projections of other nodes.
//!
//! # Concepts
//!
//! ## Sources
//!
//! A [`Source`] owns its value. It is written only by explicit calls, which
//! mutate the value in place (wholesale, at a path, or by inserting into a
//! sequence) and then notify every downstream edge.
//!
//! ## Derived Nodes
//!
//! A [`Derived`] node caches a pure function of one or more upstream
//! channels. Events arriving from upstream only update its [`DirtySet`];
//! recomputation happens when somebody reads, and only for the addresses
//! that are actually stale. [`ElementwiseMap`], [`PathView`] and
//! [`ZipWith`] are the node kinds shipped here; new kinds implement
//! [`DerivedKind`].
//!
//! ## Listeners
//!
//! A [`Listener`] is a leaf that turns events into callbacks. It has no
//! cache: every invalidation is answered with an immediate read upstream.
//!
//! # Propagation
//!
//! Writes propagate depth first and synchronously: when a write call
//! returns, every node downstream of the source has seen the event. Events
//! are eager, computation is lazy.
//!
//! Edges point downstream weakly and are owned by the upstream node; nodes
//! hold strong references to their upstreams only. See [`Outgoing`].
//!
//! [`DirtySet`]: crate::dirty::DirtySet

mod node;
mod connection;
mod source;
mod derived;
mod map;
mod view;
mod zip;
mod listener;

use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;
use crate::path::Path;

pub use node::{ChannelId, NodeKind, SubscriberId};
pub use connection::{Connection, Outgoing};
pub use source::Source;
pub use derived::{Derived, DerivedKind, Emit, NodeState, RecomputeStats};
pub use map::{ElementwiseMap, MapNode, Transform};
pub use view::{PathView, ViewNode};
pub use zip::{Combine, ZipNode, ZipWith};
pub use listener::{Listener, Modification};

/// An event carried along an edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The whole value may have changed.
    FullInvalidate,

    /// The value at this path may have changed.
    PathInvalidate(Path),

    /// An element was inserted into a sequence at this path; everything at
    /// or after that index moved up by one.
    Insert(Path),
}

impl fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FullInvalidate => f.write_str("full-invalidate"),
            Self::PathInvalidate(path) => write!(f, "path-invalidate({path})"),
            Self::Insert(path) => write!(f, "insert({path})"),
        }
    }
}

/// A readable node in the graph.
pub trait Channel: Send + Sync {
    fn id(&self) -> ChannelId;

    fn kind(&self) -> NodeKind;

    /// The whole current value.
    fn get_data(&self) -> Result<Value>;

    /// The current value at `path`. The root path reads the whole value.
    fn get_data_at_index(&self, path: &Path) -> Result<Value>;

    /// The outgoing edge list of this channel.
    fn outgoing(&self) -> &Outgoing;

    /// Whether every top-level `Insert(i)` this channel emits is followed
    /// by a `PathInvalidate(i)` for the new element.
    fn invalidates_inserted(&self) -> bool {
        false
    }

    /// Register a downstream edge.
    fn connect(&self, connection: Connection) {
        self.outgoing().connect(connection);
    }

    /// Remove every edge registered by `subscriber_id`.
    fn disconnect(&self, subscriber_id: SubscriberId) -> usize {
        self.outgoing().disconnect(subscriber_id)
    }

    /// Number of registered downstream edges.
    fn downstream_count(&self) -> usize {
        self.outgoing().len()
    }
}

/// A node that receives events from upstream channels.
pub trait Subscriber: Send + Sync {
    fn subscriber_id(&self) -> SubscriberId;

    /// Handle `event` arriving on input `slot`.
    fn receive(&self, slot: usize, event: &ChannelEvent) -> Result<()>;
}

/// Typed reads over any channel.
pub trait ChannelExt: Channel {
    /// Read the whole value and deserialize it.
    fn get_data_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.get_data()?)?)
    }

    /// Read the value at `path` and deserialize it.
    fn get_data_at_index_as<T: DeserializeOwned>(&self, path: &Path) -> Result<T> {
        Ok(serde_json::from_value(self.get_data_at_index(path)?)?)
    }
}

impl<C: Channel + ?Sized> ChannelExt for C {}
