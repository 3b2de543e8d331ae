//! Integration tests for the node store.
//!
//! All tests are deterministic — timestamps are fixed and each test
//! opens its own database in a unique temp directory.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, TimeZone, Utc};

use meshpoint_storage::StoreEngine;
use meshpoint_types::{node_type, point_type, MeshpointError, Point};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Returns a unique temporary directory for each test.
fn temp_dir() -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "mp-store-test-{}-{}-{}",
        std::process::id(),
        id,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    ));
    let _ = std::fs::create_dir_all(&dir);
    dir
}

fn open_store() -> StoreEngine {
    StoreEngine::open(&temp_dir()).unwrap()
}

/// Base timestamp: 2026-01-10 09:00:00 UTC.
fn t(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).single().unwrap()
        + chrono::Duration::seconds(offset_secs)
}

fn typed_node(store: &StoreEngine, parent: &str, typ: &str) -> String {
    let id = uuid::Uuid::new_v4().to_string();
    store
        .merge_points(&id, &[Point::new_text(t(0), point_type::NODE_TYPE, typ)])
        .unwrap();
    store
        .merge_edge_points(&id, parent, &[Point::new_tombstone(t(0), false)])
        .unwrap();
    id
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[test]
fn open_bootstraps_a_root_device_once() {
    let dir = temp_dir();
    let root = {
        let store = StoreEngine::open(&dir).unwrap();
        let node = store.node(store.root_id()).unwrap();
        assert_eq!(node.typ, node_type::DEVICE);
        store.root_id().to_string()
    };

    // reopening preserves the root id
    let store = StoreEngine::open(&dir).unwrap();
    assert_eq!(store.root_id(), root);
}

#[test]
fn root_cannot_be_deleted() {
    let store = open_store();
    let root = store.root_id().to_string();

    let err = store
        .merge_edge_points(&root, "root", &[Point::new_tombstone(t(1), true)])
        .unwrap_err();
    assert!(err.to_string().contains("root"));

    // clearing a tombstone on the sentinel edge is fine
    store
        .merge_edge_points(&root, "root", &[Point::new_tombstone(t(1), false)])
        .unwrap();
}

// ---------------------------------------------------------------------------
// Point merge
// ---------------------------------------------------------------------------

#[test]
fn write_then_read_returns_the_exact_point() {
    let store = open_store();
    let root = store.root_id().to_string();
    let dev = typed_node(&store, &root, node_type::DEVICE);

    let p = Point::new_value(t(1), point_type::VALUE, 3.14);
    store.merge_points(&dev, std::slice::from_ref(&p)).unwrap();

    let views = store.node_edge(&dev, "all").unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].parent, root);
    let stored = meshpoint_types::point::find(&views[0].points, point_type::VALUE, "").unwrap();
    assert_eq!(stored, &p);
}

#[test]
fn lww_keeps_the_newest_point() {
    let store = open_store();
    let dev = typed_node(&store, &store.root_id().to_string(), node_type::DEVICE);

    store
        .merge_points(&dev, &[Point::new_value(t(10), point_type::VALUE, 1.0)])
        .unwrap();
    // older write loses
    store
        .merge_points(&dev, &[Point::new_value(t(5), point_type::VALUE, 2.0)])
        .unwrap();

    let node = store.node(&dev).unwrap();
    assert_eq!(
        meshpoint_types::point::find_value(&node.points, point_type::VALUE),
        1.0
    );

    // equal time keeps the existing point
    store
        .merge_points(&dev, &[Point::new_value(t(10), point_type::VALUE, 3.0)])
        .unwrap();
    let node = store.node(&dev).unwrap();
    assert_eq!(
        meshpoint_types::point::find_value(&node.points, point_type::VALUE),
        1.0
    );
}

#[test]
fn merging_the_same_batch_twice_is_idempotent() {
    let store = open_store();
    let dev = typed_node(&store, &store.root_id().to_string(), node_type::DEVICE);

    let batch = vec![
        Point::new_value(t(1), point_type::VALUE, 42.0),
        Point::new_text(t(1), point_type::DESCRIPTION, "boiler"),
    ];
    store.merge_points(&dev, &batch).unwrap();
    let before = store.node(&dev).unwrap();

    store.merge_points(&dev, &batch).unwrap();
    let after = store.node(&dev).unwrap();
    assert_eq!(before, after);
}

#[test]
fn points_with_distinct_keys_occupy_distinct_slots() {
    let store = open_store();
    let dev = typed_node(&store, &store.root_id().to_string(), node_type::DEVICE);

    let mut p0 = Point::new_value(t(1), point_type::VALUE, 1.0);
    p0.key = "0".into();
    let mut p1 = Point::new_value(t(1), point_type::VALUE, 2.0);
    p1.key = "1".into();
    store.merge_points(&dev, &[p0, p1]).unwrap();

    let node = store.node(&dev).unwrap();
    assert_eq!(
        meshpoint_types::point::find(&node.points, point_type::VALUE, "0").map(|p| p.value),
        Some(1.0)
    );
    assert_eq!(
        meshpoint_types::point::find(&node.points, point_type::VALUE, "1").map(|p| p.value),
        Some(2.0)
    );
}

#[test]
fn node_type_point_sets_the_created_type() {
    let store = open_store();
    let id = uuid::Uuid::new_v4().to_string();
    store
        .merge_points(
            &id,
            &[Point::new_text(t(0), point_type::NODE_TYPE, node_type::RULE)],
        )
        .unwrap();
    assert_eq!(store.node(&id).unwrap().typ, node_type::RULE);

    // absent nodeType defaults to device
    let id2 = uuid::Uuid::new_v4().to_string();
    store
        .merge_points(&id2, &[Point::new_value(t(0), point_type::VALUE, 1.0)])
        .unwrap();
    assert_eq!(store.node(&id2).unwrap().typ, node_type::DEVICE);
}

// ---------------------------------------------------------------------------
// Edges and traversal
// ---------------------------------------------------------------------------

#[test]
fn descendants_walks_breadth_first_with_type_filter() {
    let store = open_store();
    let root = store.root_id().to_string();
    let group = typed_node(&store, &root, node_type::GROUP);
    let dev = typed_node(&store, &group, node_type::DEVICE);
    let user = typed_node(&store, &group, node_type::USER);
    let _nested = typed_node(&store, &dev, node_type::VARIABLE);

    // direct children only
    let direct = store.descendants(&group, "", false, false).unwrap();
    assert_eq!(direct.len(), 2);

    // recursive, filtered
    let vars = store
        .descendants(&root, node_type::VARIABLE, true, false)
        .unwrap();
    assert_eq!(vars.len(), 1);

    let users = store
        .descendants(&root, node_type::USER, true, false)
        .unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id, user);
}

#[test]
fn tombstoned_edges_are_hidden_by_default() {
    let store = open_store();
    let root = store.root_id().to_string();
    let dev = typed_node(&store, &root, node_type::DEVICE);

    store
        .merge_edge_points(&dev, &root, &[Point::new_tombstone(t(5), true)])
        .unwrap();

    assert!(store.descendants(&root, "", false, false).unwrap().is_empty());

    // explicit query still sees it
    let all = store.descendants(&root, "", false, true).unwrap();
    assert_eq!(all.len(), 1);
    assert!(all[0].is_tombstone());

    // undelete brings it back
    store
        .merge_edge_points(&dev, &root, &[Point::new_tombstone(t(6), false)])
        .unwrap();
    assert_eq!(store.descendants(&root, "", false, false).unwrap().len(), 1);
}

#[test]
fn multi_parent_child_is_reachable_from_both_parents() {
    let store = open_store();
    let root = store.root_id().to_string();
    let g1 = typed_node(&store, &root, node_type::GROUP);
    let g2 = typed_node(&store, &root, node_type::GROUP);
    let dev = typed_node(&store, &g1, node_type::DEVICE);
    store
        .merge_edge_points(&dev, &g2, &[Point::new_tombstone(t(0), false)])
        .unwrap();

    assert_eq!(store.descendants(&g1, "", false, false).unwrap().len(), 1);
    assert_eq!(store.descendants(&g2, "", false, false).unwrap().len(), 1);

    let ups = store.edges_up(&dev, false).unwrap();
    let mut parents: Vec<&str> = ups.iter().map(|e| e.up.as_str()).collect();
    parents.sort();
    let mut expected = vec![g1.as_str(), g2.as_str()];
    expected.sort();
    assert_eq!(parents, expected);

    // recursive enumeration returns one view per live parent edge
    let devs = store
        .descendants(&root, node_type::DEVICE, true, false)
        .unwrap();
    assert_eq!(devs.len(), 2);
    assert_eq!(meshpoint_types::node::dedup_by_id(devs).len(), 1);
}

#[test]
fn cycle_writes_are_rejected_and_leave_the_store_unchanged() {
    let store = open_store();
    let root = store.root_id().to_string();
    let a = typed_node(&store, &root, node_type::GROUP);
    let b = typed_node(&store, &a, node_type::GROUP);
    let c = typed_node(&store, &b, node_type::GROUP);

    // a -> b -> c; making c a parent of a closes a cycle
    let err = store
        .merge_edge_points(&a, &c, &[Point::new_tombstone(t(1), false)])
        .unwrap_err();
    assert!(matches!(err, MeshpointError::Cycle { .. }));

    // self-edges are cycles too
    assert!(store
        .merge_edge_points(&a, &a, &[Point::new_tombstone(t(1), false)])
        .is_err());

    // the rejected edge does not exist
    assert!(store.edges_up(&a, true).unwrap().iter().all(|e| e.up != c));
}

#[test]
fn edges_to_missing_nodes_are_rejected() {
    let store = open_store();
    let root = store.root_id().to_string();
    let dev = typed_node(&store, &root, node_type::DEVICE);

    let err = store
        .merge_edge_points(&dev, "no-such-parent", &[Point::new_tombstone(t(0), false)])
        .unwrap_err();
    assert!(matches!(err, MeshpointError::NotFound { .. }));

    let err = store
        .merge_edge_points("no-such-child", &root, &[Point::new_tombstone(t(0), false)])
        .unwrap_err();
    assert!(matches!(err, MeshpointError::NotFound { .. }));
}

#[test]
fn node_edge_all_returns_every_parent_view() {
    let store = open_store();
    let root = store.root_id().to_string();
    let g1 = typed_node(&store, &root, node_type::GROUP);
    let dev = typed_node(&store, &g1, node_type::DEVICE);
    store
        .merge_edge_points(&dev, &root, &[Point::new_tombstone(t(0), false)])
        .unwrap();

    let views = store.node_edge(&dev, "all").unwrap();
    assert_eq!(views.len(), 2);

    let one = store.node_edge(&dev, &g1).unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].parent, g1);

    assert!(store.node_edge(&dev, "not-a-parent").is_err());
}

// ---------------------------------------------------------------------------
// User lookup
// ---------------------------------------------------------------------------

#[test]
fn user_check_matches_credentials_exactly() {
    let store = open_store();
    let root = store.root_id().to_string();
    let user = typed_node(&store, &root, node_type::USER);
    store
        .merge_points(
            &user,
            &[
                Point::new_text(t(1), point_type::EMAIL, "admin@example.com"),
                Point::new_text(t(1), point_type::PASS, "hunter2"),
            ],
        )
        .unwrap();

    let hit = store.user_check("admin@example.com", "hunter2").unwrap();
    assert_eq!(hit.len(), 1);
    assert_eq!(hit[0].id, user);

    assert!(store.user_check("admin@example.com", "wrong").unwrap().is_empty());
    assert!(store.user_check("", "").unwrap().is_empty());
}
