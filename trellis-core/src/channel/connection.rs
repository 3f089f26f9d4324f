//! Edges between channels.
//!
//! An upstream node owns the list of its outgoing [`Connection`]s. Each
//! connection holds only a weak reference to the downstream node, so the
//! graph has strong references pointing upstream and nothing else: dropping
//! the last handle to a downstream node frees it, and its registrations are
//! removed on drop or pruned on the next emission.

use std::sync::Weak;

use parking_lot::RwLock;
use smallvec::SmallVec;
use tracing::trace;

use super::{ChannelEvent, ChannelId, Subscriber, SubscriberId};
use crate::error::Result;

/// One outgoing edge.
#[derive(Clone)]
pub struct Connection {
    /// Registration owner, used for removal.
    subscriber_id: SubscriberId,

    /// Which of the downstream node's inputs this edge feeds.
    slot: usize,

    /// The downstream node. Never keeps it alive.
    target: Weak<dyn Subscriber>,
}

impl Connection {
    pub fn new(subscriber_id: SubscriberId, slot: usize, target: Weak<dyn Subscriber>) -> Self {
        Self {
            subscriber_id,
            slot,
            target,
        }
    }

    pub fn subscriber_id(&self) -> SubscriberId {
        self.subscriber_id
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("subscriber_id", &self.subscriber_id)
            .field("slot", &self.slot)
            .field("alive", &(self.target.strong_count() > 0))
            .finish()
    }
}

/// The outgoing edge list of a channel.
#[derive(Debug, Default)]
pub struct Outgoing {
    edges: RwLock<Vec<Connection>>,
}

impl Outgoing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a downstream edge. Emission order is registration order.
    pub fn connect(&self, connection: Connection) {
        self.edges.write().push(connection);
    }

    /// Remove every edge registered by `subscriber_id`.
    ///
    /// Returns the number of edges removed.
    pub fn disconnect(&self, subscriber_id: SubscriberId) -> usize {
        let mut edges = self.edges.write();
        let before = edges.len();
        edges.retain(|c| c.subscriber_id != subscriber_id);
        before - edges.len()
    }

    /// Number of registered edges, live or not.
    pub fn len(&self) -> usize {
        self.edges.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.read().is_empty()
    }

    /// Deliver `event` to every live downstream edge, depth first.
    ///
    /// The edge list is snapshotted first and no lock is held while
    /// downstream handlers run, so handlers may read this channel or
    /// register new edges. The first failing handler stops the fan-out.
    pub fn emit(&self, from: ChannelId, event: &ChannelEvent) -> Result<()> {
        let snapshot: SmallVec<[(usize, Weak<dyn Subscriber>); 4]> = self
            .edges
            .read()
            .iter()
            .map(|c| (c.slot, c.target.clone()))
            .collect();

        trace!(node = %from, %event, fanout = snapshot.len(), "emit");

        let mut dead = 0usize;
        let mut outcome = Ok(());
        for (slot, target) in snapshot {
            match target.upgrade() {
                Some(subscriber) => {
                    if let Err(err) = subscriber.receive(slot, event) {
                        outcome = Err(err);
                        break;
                    }
                }
                None => dead += 1,
            }
        }

        if dead > 0 {
            self.prune();
        }
        outcome
    }

    /// Drop edges whose downstream node no longer exists.
    fn prune(&self) {
        let mut edges = self.edges.write();
        let before = edges.len();
        edges.retain(|c| c.target.strong_count() > 0);
        trace!(pruned = before - edges.len(), "pruned dead edges");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    use crate::path::Path;

    struct Recorder {
        id: SubscriberId,
        seen: Mutex<Vec<(usize, ChannelEvent)>>,
    }

    impl Recorder {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: SubscriberId::new(),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Subscriber for Recorder {
        fn subscriber_id(&self) -> SubscriberId {
            self.id
        }

        fn receive(&self, slot: usize, event: &ChannelEvent) -> Result<()> {
            self.seen.lock().push((slot, event.clone()));
            Ok(())
        }
    }

    fn edge(recorder: &Arc<Recorder>, slot: usize) -> Connection {
        let weak: Weak<dyn Subscriber> = Arc::downgrade(recorder) as Weak<dyn Subscriber>;
        Connection::new(recorder.id, slot, weak)
    }

    #[test]
    fn emit_reaches_every_edge_with_its_slot() {
        let outgoing = Outgoing::new();
        let a = Recorder::new();
        let b = Recorder::new();
        outgoing.connect(edge(&a, 0));
        outgoing.connect(edge(&b, 1));

        let event = ChannelEvent::PathInvalidate(Path::from("3"));
        outgoing.emit(ChannelId::new(), &event).unwrap();

        assert_eq!(a.seen.lock().as_slice(), &[(0, event.clone())]);
        assert_eq!(b.seen.lock().as_slice(), &[(1, event)]);
    }

    #[test]
    fn disconnect_removes_all_edges_of_a_subscriber() {
        let outgoing = Outgoing::new();
        let a = Recorder::new();
        outgoing.connect(edge(&a, 0));
        outgoing.connect(edge(&a, 1));
        assert_eq!(outgoing.len(), 2);

        assert_eq!(outgoing.disconnect(a.id), 2);
        assert!(outgoing.is_empty());

        outgoing.emit(ChannelId::new(), &ChannelEvent::FullInvalidate).unwrap();
        assert!(a.seen.lock().is_empty());
    }

    #[test]
    fn dead_edges_are_pruned_on_emit() {
        let outgoing = Outgoing::new();
        let a = Recorder::new();
        outgoing.connect(edge(&a, 0));
        drop(a);

        assert_eq!(outgoing.len(), 1);
        outgoing.emit(ChannelId::new(), &ChannelEvent::FullInvalidate).unwrap();
        assert_eq!(outgoing.len(), 0);
    }
}
