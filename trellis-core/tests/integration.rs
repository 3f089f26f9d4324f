//! Integration Tests for Channel Graphs
//!
//! These tests verify that sources, derived nodes and listeners work
//! together correctly across multi-node graphs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use trellis_core::channel::{
    Channel, ChannelExt, ElementwiseMap, Listener, Modification, PathView, RecomputeStats, Source,
    ZipWith,
};
use trellis_core::path::Path;
use trellis_core::ChannelError;

fn p(raw: &str) -> Path {
    Path::from(raw)
}

/// Doubling map over a source, with a shared call counter.
fn counted_double(source: &Arc<Source>) -> (Arc<ElementwiseMap>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let map = ElementwiseMap::new(source.clone(), move |x| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        json!(x.as_i64().unwrap_or_default() * 2)
    });
    (map, calls)
}

/// Test the read-all, partial write, partial read sequence on a map.
#[test]
fn map_recomputes_only_written_element() {
    let source = Source::new(json!([1, 2, 3]));
    let (map, _) = counted_double(&source);

    assert_eq!(map.get_data().unwrap(), json!([2, 4, 6]));
    assert_eq!(map.stats(), RecomputeStats { full: 1, partial: 0 });

    source.set_data_at_index(&p("2"), json!(5)).unwrap();
    assert_eq!(map.get_data_at_index(&p("2")).unwrap(), json!(10));
    assert_eq!(map.stats(), RecomputeStats { full: 1, partial: 1 });

    assert_eq!(map.get_data().unwrap(), json!([2, 4, 10]));
    assert_eq!(map.stats(), RecomputeStats { full: 1, partial: 1 });
}

/// Test that an insert before the first read is seen by the map.
#[test]
fn insert_before_first_read() {
    let source = Source::new(json!([1, 2, 3]));
    let (map, _) = counted_double(&source);

    source.insert_at_index(&p("0"), json!(5)).unwrap();
    assert_eq!(map.get_data().unwrap(), json!([10, 2, 4, 6]));
}

/// Test that a view over a matrix follows an inserted row.
#[test]
fn view_rebases_on_row_insert() {
    let matrix = Source::new(json!([[1, 2], [3, 4], [5, 6]]));
    let view = PathView::new(matrix.clone(), "1");
    assert_eq!(view.get_data().unwrap(), json!([3, 4]));

    matrix.insert_at_index(&p("0"), json!([0, 0])).unwrap();
    assert_eq!(view.watched(), p("2"));
    assert_eq!(view.get_data().unwrap(), json!([3, 4]));
    assert_eq!(view.stats(), RecomputeStats { full: 1, partial: 0 });

    matrix.set_data_at_index(&p("2"), json!([7, 8])).unwrap();
    assert!(view.dirty().is_all_dirty());
    assert_eq!(view.get_data().unwrap(), json!([7, 8]));
    assert_eq!(view.stats(), RecomputeStats { full: 2, partial: 0 });
}

/// Test that reads in a chain never touch clean elements.
#[test]
fn chain_is_lazy_and_targeted() {
    let source = Source::new(json!([1, 2, 3, 4]));
    let (first, first_calls) = counted_double(&source);
    let second = ElementwiseMap::typed(first.clone(), |x: i64| x + 1);

    assert_eq!(second.get_data().unwrap(), json!([3, 5, 7, 9]));
    assert_eq!(first_calls.load(Ordering::SeqCst), 4);

    // Writes only mark; nothing is computed until a read.
    source.set_data_at_index(&p("1"), json!(10)).unwrap();
    source.set_data_at_index(&p("3"), json!(0)).unwrap();
    assert_eq!(first_calls.load(Ordering::SeqCst), 4);

    assert_eq!(second.get_data_at_index(&p("1")).unwrap(), json!(21));
    assert_eq!(first_calls.load(Ordering::SeqCst), 5);

    assert_eq!(second.get_data().unwrap(), json!([3, 21, 7, 1]));
    assert_eq!(first_calls.load(Ordering::SeqCst), 6);
    assert_eq!(first.stats(), RecomputeStats { full: 1, partial: 2 });
    assert_eq!(second.stats(), RecomputeStats { full: 1, partial: 2 });
}

/// Test that a view only invalidates on writes it can observe.
#[test]
fn view_over_map_ignores_other_elements() {
    let source = Source::new(json!([1, 2, 3]));
    let (map, calls) = counted_double(&source);
    let view = PathView::new(map.clone(), "0");
    assert_eq!(view.get_data().unwrap(), json!(2));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    source.set_data_at_index(&p("2"), json!(9)).unwrap();
    assert!(view.dirty().is_all_clean());
    assert_eq!(view.get_data().unwrap(), json!(2));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    source.set_data_at_index(&p("0"), json!(4)).unwrap();
    assert_eq!(view.get_data().unwrap(), json!(8));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Test listener callbacks downstream of a map and a view.
#[test]
fn listener_sees_every_kind_of_write() {
    #[derive(Debug, PartialEq)]
    enum Seen {
        Data(Value),
        At(Path, Value),
        Modify(Modification),
    }

    let source = Source::new(json!([1, 2, 3]));
    let (map, _) = counted_double(&source);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let (a, b, c) = (seen.clone(), seen.clone(), seen.clone());
    let _listener = Listener::new(
        map.clone(),
        move |value| a.lock().push(Seen::Data(value)),
        move |path, value| b.lock().push(Seen::At(path.clone(), value)),
        move |m| c.lock().push(Seen::Modify(m.clone())),
    );

    source.set_data_at_index(&p("1"), json!(10)).unwrap();
    source.insert_at_index(&p("0"), json!(7)).unwrap();
    source.set_data(json!([1])).unwrap();

    assert_eq!(
        *seen.lock(),
        vec![
            Seen::At(p("1"), json!(20)),
            Seen::Modify(Modification::Insert { path: p("0") }),
            Seen::At(p("0"), json!(14)),
            Seen::Data(json!([2])),
        ]
    );
}

/// Test that inserted elements keep trailing cached values valid.
#[test]
fn insert_then_read_shifted_indices() {
    let source = Source::new(json!([1, 2, 3]));
    let (map, calls) = counted_double(&source);
    let tail = PathView::new(map.clone(), "2");
    assert_eq!(map.get_data().unwrap(), json!([2, 4, 6]));
    assert_eq!(tail.get_data().unwrap(), json!(6));

    source.insert_at_index(&p("1"), json!(100)).unwrap();
    assert_eq!(tail.watched(), p("3"));

    assert_eq!(map.get_data_at_index(&p("2")).unwrap(), json!(4));
    assert_eq!(map.get_data_at_index(&p("3")).unwrap(), json!(6));
    assert_eq!(tail.get_data().unwrap(), json!(6));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    assert_eq!(map.get_data().unwrap(), json!([2, 200, 4, 6]));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

/// Test that a zip reports inserts as unsupported without corrupting state.
#[test]
fn zip_rejects_insert() {
    let left = Source::new(json!([1, 2]));
    let right = Source::new(json!([10, 20]));
    let zip = ZipWith::new(left.clone(), right.clone(), |a, b| {
        json!(a.as_i64().unwrap_or_default() * b.as_i64().unwrap_or_default())
    });
    assert_eq!(zip.get_data().unwrap(), json!([10, 40]));

    let err = right.insert_at_index(&p("0"), json!(0)).unwrap_err();
    assert!(matches!(err, ChannelError::UnsupportedModification { .. }));

    // The source still applied the write.
    assert_eq!(right.get_data().unwrap(), json!([0, 10, 20]));
}

/// Test that writes past the end of a shorter zip input never fail.
#[test]
fn zip_of_unequal_inputs_with_listener() {
    let left = Source::new(json!([1, 2, 3]));
    let right = Source::new(json!([10, 20]));
    let zip = ZipWith::new(left.clone(), right.clone(), |a, b| {
        json!(a.as_i64().unwrap_or_default() + b.as_i64().unwrap_or_default())
    });
    assert_eq!(zip.get_data().unwrap(), json!([11, 22]));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let _listener = Listener::new(
        zip.clone(),
        |_| {},
        move |path, value| seen_clone.lock().push((path.clone(), value)),
        |_| {},
    );

    left.set_data_at_index(&p("2"), json!(9)).unwrap();
    right.set_data_at_index(&p("1"), json!(5)).unwrap();
    left.set_data_at_index(&p("0"), json!(0)).unwrap();

    assert_eq!(*seen.lock(), vec![(p("1"), json!(7)), (p("0"), json!(10))]);
    assert_eq!(zip.get_data().unwrap(), json!([10, 7]));

    // Swap which side is longer and write past the end of the left one.
    right.set_data(json!([1, 1, 1, 1])).unwrap();
    assert_eq!(zip.get_data().unwrap(), json!([1, 3, 10]));
    right.set_data_at_index(&p("3"), json!(50)).unwrap();
    assert_eq!(zip.get_data().unwrap(), json!([1, 3, 10]));
    assert_eq!(seen.lock().len(), 2);
}

/// Test that an insert at the head of a map chain reaches a listener once.
#[test]
fn map_chain_insert_notifies_listener_once() {
    let source = Source::new(json!([1, 2, 3]));
    let (first, calls) = counted_double(&source);
    let second = ElementwiseMap::typed(first.clone(), |x: i64| x + 1);
    let third = ElementwiseMap::typed(second.clone(), |x: i64| x * 10);
    assert_eq!(third.get_data().unwrap(), json!([30, 50, 70]));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let (at, modified) = (seen.clone(), seen.clone());
    let _listener = Listener::new(
        third.clone(),
        |_| {},
        move |path, value| at.lock().push(format!("at {path} {value}")),
        move |m| modified.lock().push(format!("{m:?}")),
    );

    source.insert_at_index(&p("0"), json!(5)).unwrap();
    assert_eq!(
        *seen.lock(),
        vec![
            format!("{:?}", Modification::Insert { path: p("0") }),
            "at 0 110".to_string(),
        ]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(third.get_data().unwrap(), json!([110, 30, 50, 70]));
}

/// Test typed access through serde.
#[test]
fn typed_records_round_trip() {
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Row {
        name: String,
        qty: u32,
    }

    let rows = Source::from_serialize(&vec![
        Row { name: "bolt".into(), qty: 3 },
        Row { name: "nut".into(), qty: 8 },
    ])
    .unwrap();
    let totals = ElementwiseMap::typed(rows.clone(), |row: Row| row.qty * 2);
    let second = PathView::new(rows.clone(), "1");

    rows.set_data_at_index(&p("1.qty"), json!(1)).unwrap();
    assert_eq!(totals.get_data_as::<Vec<u32>>().unwrap(), vec![6, 2]);
    assert_eq!(
        second.get_data_as::<Row>().unwrap(),
        Row { name: "nut".into(), qty: 1 }
    );
    assert_eq!(second.get_data_at_index_as::<String>(&p("name")).unwrap(), "nut");
}

/// Test that dropping downstream nodes releases their edges.
#[test]
fn dropping_nodes_releases_edges() {
    let source = Source::new(json!([1, 2]));
    let (map, _) = counted_double(&source);
    let view = PathView::new(map.clone(), "0");
    assert_eq!(source.downstream_count(), 1);
    assert_eq!(map.downstream_count(), 1);

    drop(view);
    assert_eq!(map.downstream_count(), 0);

    // The map is still held here; dropping it releases the source edge.
    drop(map);
    assert_eq!(source.downstream_count(), 0);
    source.set_data_at_index(&p("0"), json!(3)).unwrap();
}

/// Test that invalid paths surface as errors, not panics.
#[test]
fn invalid_paths_are_errors() {
    let source = Source::new(json!({ "rows": [1, 2] }));
    assert!(matches!(
        source.set_data_at_index(&p("rows.5"), json!(0)),
        Err(ChannelError::InvalidPath { .. })
    ));
    assert!(matches!(
        source.insert_at_index(&p("rows.x"), json!(0)),
        Err(ChannelError::InvalidPath { .. })
    ));
    assert!(matches!(
        source.get_data_at_index(&p("missing")),
        Err(ChannelError::InvalidPath { .. })
    ));
    assert_eq!(source.get_data().unwrap(), json!({ "rows": [1, 2] }));
}
