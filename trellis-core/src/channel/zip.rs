//! Zip
//!
//! Combines two upstream sequences element by element. Output index `i`
//! depends on index `i` of both inputs, so a write on either slot dirties
//! one element. The output is as long as the shorter input, and writes
//! past its end on the longer input have no effect on it.
//!
//! Insertion is not supported: after an insert into one input the pairing
//! of the remaining elements is ambiguous, and guessing would silently
//! corrupt the cache.

use std::sync::Arc;

use serde_json::Value;
use smallvec::{smallvec, SmallVec};
use tracing::trace;

use super::derived::{Derived, DerivedKind, Emit, NodeState};
use super::{Channel, ChannelEvent};
use crate::dirty::DirtySet;
use crate::error::{ChannelError, Result};
use crate::path::Path;
use crate::value;

/// Pair transform of a [`ZipWith`].
pub type Combine = Arc<dyn Fn(&Value, &Value) -> Result<Value> + Send + Sync>;

/// A derived channel holding `zip(left, right).map(combine)`.
pub type ZipWith = Derived<ZipNode>;

/// [`DerivedKind`] of a [`ZipWith`].
pub struct ZipNode {
    left: Arc<dyn Channel>,
    right: Arc<dyn Channel>,
    combine: Combine,
}

impl ZipNode {
    pub fn new(left: Arc<dyn Channel>, right: Arc<dyn Channel>, combine: Combine) -> Self {
        Self {
            left,
            right,
            combine,
        }
    }
}

fn sequence(value: Value, side: &str) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        _ => Err(ChannelError::invalid_path(
            &Path::root(),
            format!("zip {side} input is not a sequence"),
        )),
    }
}

/// Whether `index` lies past the end of a cache whose length is known.
///
/// The length is only authoritative after a full recompute, i.e. while the
/// dirty set is in positive mode.
fn past_end(index: &str, state: &NodeState) -> bool {
    if !matches!(state.dirty, DirtySet::Positive { .. }) {
        return false;
    }
    match (&state.cache, index.parse::<usize>()) {
        (Value::Array(items), Ok(i)) => i >= items.len(),
        _ => false,
    }
}

impl DerivedKind for ZipNode {
    fn name(&self) -> &'static str {
        "zip"
    }

    fn upstreams(&self) -> Vec<Arc<dyn Channel>> {
        vec![self.left.clone(), self.right.clone()]
    }

    fn on_path_invalidate(
        &mut self,
        slot: usize,
        path: &Path,
        state: &mut NodeState,
    ) -> Result<Emit> {
        match path.first_segment() {
            Some(index) if past_end(index, state) => {
                trace!(node = %state.id(), slot, %path, "write past zipped length");
                Ok(SmallVec::new())
            }
            Some(index) => {
                let index = Path::from(index);
                state.dirty.mark_dirty(&index);
                Ok(smallvec![ChannelEvent::PathInvalidate(index)])
            }
            None => self.on_full_invalidate(slot, state),
        }
    }

    fn recompute_all(&self, cache: &mut Value) -> Result<()> {
        let left = sequence(self.left.get_data()?, "left")?;
        let right = sequence(self.right.get_data()?, "right")?;
        let combined = left
            .iter()
            .zip(right.iter())
            .map(|(a, b)| (self.combine)(a, b))
            .collect::<Result<Vec<_>>>()?;
        *cache = Value::Array(combined);
        Ok(())
    }

    fn recompute_at(&self, path: &Path, cache: &mut Value) -> Result<()> {
        let index = path
            .first_segment()
            .map(Path::from)
            .ok_or_else(|| ChannelError::invalid_path(path, "no element index"))?;
        let pair = (
            self.left.get_data_at_index(&index),
            self.right.get_data_at_index(&index),
        );
        let (a, b) = match pair {
            (Ok(a), Ok(b)) => (a, b),
            // One input is too short, so there is no output element here.
            (Err(ChannelError::InvalidPath { .. }), _)
            | (_, Err(ChannelError::InvalidPath { .. })) => return Ok(()),
            (Err(err), _) | (_, Err(err)) => return Err(err),
        };
        value::write_at(cache, &index, (self.combine)(&a, &b)?)
    }
}

impl ZipWith {
    /// Combine `left` and `right` element by element with `f`.
    pub fn new<F>(left: Arc<dyn Channel>, right: Arc<dyn Channel>, f: F) -> Arc<Self>
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        Self::try_new(left, right, move |a, b| Ok(f(a, b)))
    }

    /// Combine element by element with a function that may fail.
    pub fn try_new<F>(left: Arc<dyn Channel>, right: Arc<dyn Channel>, f: F) -> Arc<Self>
    where
        F: Fn(&Value, &Value) -> Result<Value> + Send + Sync + 'static,
    {
        Derived::with_kind(ZipNode::new(left, right, Arc::new(f)))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::channel::{RecomputeStats, Source};

    fn p(raw: &str) -> Path {
        Path::from(raw)
    }

    fn sum(a: &Value, b: &Value) -> Value {
        json!(a.as_i64().unwrap_or_default() + b.as_i64().unwrap_or_default())
    }

    #[test]
    fn zips_to_shorter_length() {
        let left = Source::new(json!([1, 2, 3]));
        let right = Source::new(json!([10, 20]));
        let zip = ZipWith::new(left.clone(), right.clone(), sum);
        assert_eq!(zip.get_data().unwrap(), json!([11, 22]));
    }

    #[test]
    fn writes_on_either_slot_dirty_one_element() {
        let left = Source::new(json!([1, 2, 3]));
        let right = Source::new(json!([10, 20, 30]));
        let zip = ZipWith::new(left.clone(), right.clone(), sum);
        zip.get_data().unwrap();

        left.set_data_at_index(&p("0"), json!(5)).unwrap();
        right.set_data_at_index(&p("2"), json!(0)).unwrap();
        assert_eq!(zip.dirty().list_dirty(), Some(vec![p("0"), p("2")]));
        assert_eq!(zip.get_data().unwrap(), json!([15, 22, 3]));
        assert_eq!(zip.stats(), RecomputeStats { full: 1, partial: 2 });

        right.set_data(json!([1, 1, 1])).unwrap();
        assert_eq!(zip.get_data().unwrap(), json!([6, 3, 4]));
        assert_eq!(zip.stats(), RecomputeStats { full: 2, partial: 2 });
    }

    #[test]
    fn same_channel_on_both_slots() {
        let source = Source::new(json!([1, 2]));
        let zip = ZipWith::new(source.clone(), source.clone(), sum);
        assert_eq!(source.downstream_count(), 2);
        assert_eq!(zip.get_data().unwrap(), json!([2, 4]));

        source.set_data_at_index(&p("1"), json!(5)).unwrap();
        assert_eq!(zip.get_data().unwrap(), json!([2, 10]));

        drop(zip);
        assert_eq!(source.downstream_count(), 0);
    }

    #[test]
    fn insert_is_unsupported() {
        let left = Source::new(json!([1]));
        let right = Source::new(json!([2]));
        let zip = ZipWith::new(left.clone(), right.clone(), sum);

        let err = left.insert_at_index(&p("0"), json!(0)).unwrap_err();
        assert!(err.to_string().contains("insert(0)"));
        assert!(matches!(
            err,
            ChannelError::UnsupportedModification { node, .. } if node == zip.id()
        ));
    }

    #[test]
    fn writes_past_the_shorter_input_are_ignored() {
        let left = Source::new(json!([1, 2, 3]));
        let right = Source::new(json!([10, 20]));
        let zip = ZipWith::new(left.clone(), right.clone(), sum);
        assert_eq!(zip.get_data().unwrap(), json!([11, 22]));

        left.set_data_at_index(&p("2"), json!(9)).unwrap();
        assert!(zip.dirty().is_all_clean());
        assert_eq!(zip.get_data().unwrap(), json!([11, 22]));
        assert_eq!(zip.get_data().unwrap(), json!([11, 22]));

        // Now the right input is the longer one.
        right.set_data(json!([10, 20, 30, 40])).unwrap();
        assert_eq!(zip.get_data().unwrap(), json!([11, 22, 39]));
        right.set_data_at_index(&p("3"), json!(0)).unwrap();
        assert!(zip.dirty().is_all_clean());
        assert_eq!(zip.get_data().unwrap(), json!([11, 22, 39]));
        assert_eq!(zip.stats(), RecomputeStats { full: 2, partial: 0 });
    }

    #[test]
    fn reads_past_the_shorter_input_leave_no_dirt() {
        let left = Source::new(json!([1, 2, 3]));
        let right = Source::new(json!([10, 20]));
        let zip = ZipWith::new(left.clone(), right.clone(), sum);

        let err = zip.get_data_at_index(&p("2")).unwrap_err();
        assert!(matches!(err, ChannelError::InvalidPath { .. }));
        assert_eq!(zip.dirty().list_clean(), Some(vec![p("2")]));
        assert_eq!(zip.get_data().unwrap(), json!([11, 22]));
    }
}
