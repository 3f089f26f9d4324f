//! Listener Implementation
//!
//! A Listener is the leaf of the graph. It turns upstream events into plain
//! callbacks and keeps no cache of its own.
//!
//! # How Listeners Work
//!
//! - `FullInvalidate` reads the whole upstream value and calls `on_data`.
//! - `PathInvalidate(p)` reads upstream at `p` and calls `on_data_at_index`.
//! - `Insert(p)` calls `on_modify` directly, without reading: the caller
//!   observes the structural edit itself.
//!
//! Reads happen synchronously inside the write that caused them, so a
//! listener downstream of a derived node forces that node to recompute
//! the affected addresses right away.

use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use super::{Channel, ChannelEvent, Connection, Subscriber, SubscriberId};
use crate::error::Result;
use crate::path::Path;

/// A structural edit reported to [`Listener`] callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Modification {
    /// An element was inserted at `path`.
    Insert { path: Path },
}

type DataCallback = Box<dyn Fn(Value) + Send + Sync>;
type DataAtIndexCallback = Box<dyn Fn(&Path, Value) + Send + Sync>;
type ModifyCallback = Box<dyn Fn(&Modification) + Send + Sync>;

/// Callback sink attached to a single upstream channel.
///
/// # Example
///
/// ```rust
/// use std::sync::{Arc, Mutex};
/// use serde_json::json;
/// use trellis_core::channel::{Listener, Source};
/// use trellis_core::path::Path;
///
/// let source = Source::new(json!([1, 2]));
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let seen_clone = seen.clone();
/// let _listener = Listener::new(
///     source.clone(),
///     |_| {},
///     move |path, value| seen_clone.lock().unwrap().push((path.clone(), value)),
///     |_| {},
/// );
///
/// source.set_data_at_index(&Path::from("1"), json!(5)).unwrap();
/// assert_eq!(*seen.lock().unwrap(), vec![(Path::from("1"), json!(5))]);
/// ```
pub struct Listener {
    subscriber_id: SubscriberId,
    upstream: Arc<dyn Channel>,
    on_data: DataCallback,
    on_data_at_index: DataAtIndexCallback,
    on_modify: ModifyCallback,
}

impl Listener {
    /// Attach callbacks to `upstream`.
    ///
    /// The listener stays registered for as long as the returned handle
    /// lives, or until [`Listener::disconnect`].
    pub fn new<D, I, M>(
        upstream: Arc<dyn Channel>,
        on_data: D,
        on_data_at_index: I,
        on_modify: M,
    ) -> Arc<Self>
    where
        D: Fn(Value) + Send + Sync + 'static,
        I: Fn(&Path, Value) + Send + Sync + 'static,
        M: Fn(&Modification) + Send + Sync + 'static,
    {
        let listener = Arc::new(Self {
            subscriber_id: SubscriberId::new(),
            upstream,
            on_data: Box::new(on_data),
            on_data_at_index: Box::new(on_data_at_index),
            on_modify: Box::new(on_modify),
        });

        let weak: Weak<dyn Subscriber> = Arc::downgrade(&listener) as Weak<dyn Subscriber>;
        listener
            .upstream
            .connect(Connection::new(listener.subscriber_id, 0, weak));
        trace!(upstream = %listener.upstream.id(), "listener connected");
        listener
    }

    /// Stop receiving events.
    pub fn disconnect(&self) {
        self.upstream.disconnect(self.subscriber_id);
    }
}

impl Subscriber for Listener {
    fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    fn receive(&self, _slot: usize, event: &ChannelEvent) -> Result<()> {
        match event {
            ChannelEvent::FullInvalidate => (self.on_data)(self.upstream.get_data()?),
            ChannelEvent::PathInvalidate(path) => {
                (self.on_data_at_index)(path, self.upstream.get_data_at_index(path)?)
            }
            ChannelEvent::Insert(path) => {
                (self.on_modify)(&Modification::Insert { path: path.clone() })
            }
        }
        Ok(())
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.upstream.disconnect(self.subscriber_id);
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("subscriber_id", &self.subscriber_id)
            .field("upstream", &self.upstream.id())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
