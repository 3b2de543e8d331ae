//! End-to-end store service tests over the bus.
//!
//! Each test starts an isolated service instance against its own
//! temp-dir store, the way the daemon wires one up. Writes are
//! stamped with wall-clock time because the engine stamps its own
//! state points that way; deliberately stale writes subtract an
//! explicit offset. Asynchronous effects (action publishes, orphan
//! repair) are observed by polling with a deadline.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use meshpoint_bus::{subject, Bus};
use meshpoint_node::{ServiceHandle, StoreService};
use meshpoint_proto::{decode_nodes_reply, encode_points, encode_request};
use meshpoint_storage::StoreEngine;
use meshpoint_types::config::AppConfig;
use meshpoint_types::{node_type, point, point_type, point_value, MeshpointError, Point};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

static COUNTER: AtomicU32 = AtomicU32::new(0);

fn temp_dir() -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "mp-service-test-{}-{}-{}",
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

fn now() -> DateTime<Utc> {
    Utc::now()
}

/// A timestamp `secs` in the past, for writes that must lose LWW.
fn past(secs: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::seconds(secs)
}

const REQ_TIMEOUT: Duration = Duration::from_secs(2);

struct TestServer {
    store: Arc<StoreEngine>,
    bus: Bus,
    root: String,
    handle: ServiceHandle,
}

/// Starts an isolated service instance; sweep and metric periods are
/// long enough to stay out of the way.
fn test_server() -> TestServer {
    let store = Arc::new(StoreEngine::open(&temp_dir()).unwrap());
    let bus = Bus::new();
    let config = AppConfig {
        data_dir: PathBuf::from("unused-by-tests"),
        schedule_tick_secs: 3600,
        report_metrics_period_secs: 3600,
        ..AppConfig::default()
    };
    let root = store.root_id().to_string();
    let handle = StoreService::new(store.clone(), bus.clone(), config)
        .start()
        .unwrap();
    TestServer {
        store,
        bus,
        root,
        handle,
    }
}

/// Publishes points and awaits the ACK; panics on an error reply.
async fn send_points(srv: &TestServer, node_id: &str, points: &[Point]) {
    let reply = srv
        .bus
        .request(
            &subject::node_points(node_id),
            encode_points(points),
            REQ_TIMEOUT,
        )
        .await
        .unwrap();
    assert!(
        reply.is_empty(),
        "unexpected error reply: {}",
        String::from_utf8_lossy(&reply)
    );
}

/// Publishes edge points and returns the raw reply (empty = ACK).
async fn send_edge_points(
    srv: &TestServer,
    parent: &str,
    child: &str,
    points: &[Point],
) -> Vec<u8> {
    srv.bus
        .request(
            &subject::edge_points(parent, child),
            encode_points(points),
            REQ_TIMEOUT,
        )
        .await
        .unwrap()
}

/// Creates a typed node under `parent` through the bus.
async fn create(srv: &TestServer, parent: &str, typ: &str, points: Vec<Point>) -> String {
    let id = uuid::Uuid::new_v4().to_string();
    let mut all = vec![Point::new_text(now(), point_type::NODE_TYPE, typ)];
    all.extend(points);
    send_points(srv, &id, &all).await;
    let reply = send_edge_points(srv, parent, &id, &[Point::new_tombstone(now(), false)]).await;
    assert!(reply.is_empty(), "{}", String::from_utf8_lossy(&reply));
    id
}

/// Polls until `f` holds or the deadline passes.
async fn wait_for(f: impl Fn() -> bool, ms: u64) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(ms);
    loop {
        if f() {
            return true;
        }
        if tokio::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn stored_value(store: &StoreEngine, node_id: &str, typ: &str) -> f64 {
    store
        .node(node_id)
        .map(|n| point::find_value(&n.points, typ))
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// Write then read
// ---------------------------------------------------------------------------

#[tokio::test]
async fn write_then_read_round_trips_through_the_bus() {
    let srv = test_server();

    let dev = uuid::Uuid::new_v4().to_string();
    let sample = Point::new_value(now(), point_type::VALUE, 3.14);
    send_points(&srv, &dev, std::slice::from_ref(&sample)).await;

    let reply = srv
        .bus
        .request(&subject::node(&dev), b"all".to_vec(), REQ_TIMEOUT)
        .await
        .unwrap();
    let (nodes, error) = decode_nodes_reply(&reply).unwrap();

    assert_eq!(error, "");
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].id, dev);
    let stored = point::find(&nodes[0].points, point_type::VALUE, "").unwrap();
    assert_eq!(stored, &sample);

    srv.handle.shutdown().await;
}

#[tokio::test]
async fn reading_a_missing_node_replies_with_an_error() {
    let srv = test_server();

    let reply = srv
        .bus
        .request(&subject::node("no-such-node"), b"all".to_vec(), REQ_TIMEOUT)
        .await
        .unwrap();
    let (nodes, error) = decode_nodes_reply(&reply).unwrap();

    assert!(nodes.is_empty());
    assert!(error.contains("not found"));

    srv.handle.shutdown().await;
}

#[tokio::test]
async fn newer_point_wins_regardless_of_arrival_order() {
    let srv = test_server();
    let dev = create(&srv, &srv.root.clone(), node_type::DEVICE, vec![]).await;

    send_points(&srv, &dev, &[Point::new_value(now(), point_type::VALUE, 1.0)]).await;
    // stale timestamp: the write is accepted but loses the merge
    send_points(&srv, &dev, &[Point::new_value(past(10), point_type::VALUE, 2.0)]).await;

    assert_eq!(stored_value(&srv.store, &dev, point_type::VALUE), 1.0);

    srv.handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Children queries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn children_query_filters_by_type_and_tombstone() {
    let srv = test_server();
    let root = srv.root.clone();
    let group = create(&srv, &root, node_type::GROUP, vec![]).await;
    let dev = create(&srv, &group, node_type::DEVICE, vec![]).await;
    let _user = create(&srv, &group, node_type::USER, vec![]).await;

    let reply = srv
        .bus
        .request(
            &subject::node_children(&group),
            encode_request(node_type::DEVICE, false),
            REQ_TIMEOUT,
        )
        .await
        .unwrap();
    let (nodes, error) = decode_nodes_reply(&reply).unwrap();
    assert_eq!(error, "");
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].id, dev);

    // tombstone the device edge; it disappears from the default view
    let reply = send_edge_points(&srv, &group, &dev, &[Point::new_tombstone(now(), true)]).await;
    assert!(reply.is_empty());

    let reply = srv
        .bus
        .request(&subject::node_children(&group), Vec::new(), REQ_TIMEOUT)
        .await
        .unwrap();
    let (nodes, _) = decode_nodes_reply(&reply).unwrap();
    assert_eq!(nodes.len(), 1, "only the user should remain");

    // include_del sees it again
    let reply = srv
        .bus
        .request(
            &subject::node_children(&group),
            encode_request("", true),
            REQ_TIMEOUT,
        )
        .await
        .unwrap();
    let (nodes, _) = decode_nodes_reply(&reply).unwrap();
    assert_eq!(nodes.len(), 2);

    srv.handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Cycle rejection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn edge_closing_a_cycle_is_refused_with_an_error_reply() {
    let srv = test_server();
    let root = srv.root.clone();
    let a = create(&srv, &root, node_type::GROUP, vec![]).await;
    let b = create(&srv, &a, node_type::GROUP, vec![]).await;

    // b is a descendant of a; making b a parent of a closes a cycle
    let reply = send_edge_points(&srv, &b, &a, &[Point::new_tombstone(now(), false)]).await;
    let error = String::from_utf8_lossy(&reply);
    assert!(error.contains("cycle"), "reply was: {error}");

    // store unchanged: a's only parent is still the root
    let ups = srv.store.edges_up(&a, true).unwrap();
    assert_eq!(ups.len(), 1);
    assert_eq!(ups[0].up, root);

    srv.handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Simple rule through the full pipeline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rule_under_a_device_fires_its_action_exactly_once() {
    let srv = test_server();
    let root = srv.root.clone();

    let dev = create(&srv, &root, node_type::DEVICE, vec![]).await;
    let target = create(&srv, &root, node_type::VARIABLE, vec![]).await;
    let rule = create(&srv, &dev, node_type::RULE, vec![]).await;
    create(
        &srv,
        &rule,
        node_type::CONDITION,
        vec![
            Point::new_text(now(), point_type::POINT_TYPE, point_type::VALUE),
            Point::new_text(now(), point_type::VALUE_TYPE, point_value::NUMBER),
            Point::new_text(now(), point_type::OPERATOR, point_value::GREATER_THAN),
            Point::new_value(now(), point_type::VALUE_NUMBER, 10.0),
        ],
    )
    .await;
    create(
        &srv,
        &rule,
        node_type::ACTION,
        vec![
            Point::new_text(now(), point_type::NODE_ID, &target),
            Point::new_text(now(), point_type::POINT_TYPE, point_type::VALUE),
            Point::new_text(now(), point_type::VALUE_TYPE, point_value::NUMBER),
            Point::new_value(now(), point_type::VALUE_NUMBER, 1.0),
        ],
    )
    .await;

    let mut target_writes = srv.bus.subscribe(&subject::node_points(&target)).unwrap();

    // below threshold: no fire
    send_points(&srv, &dev, &[Point::new_value(now(), point_type::VALUE, 5.0)]).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(target_writes.depth(), 0);
    assert_eq!(stored_value(&srv.store, &target, point_type::VALUE), 0.0);

    // crossing the threshold fires exactly once
    send_points(&srv, &dev, &[Point::new_value(now(), point_type::VALUE, 15.0)]).await;
    assert!(
        wait_for(
            || stored_value(&srv.store, &target, point_type::VALUE) == 1.0,
            2_000
        )
        .await,
        "action never set the target point"
    );
    assert!(target_writes.recv().await.is_some());

    // still above threshold: edge-triggered, no second fire
    send_points(&srv, &dev, &[Point::new_value(now(), point_type::VALUE, 16.0)]).await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(target_writes.depth(), 0);

    srv.handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Orphan repair
// ---------------------------------------------------------------------------

#[tokio::test]
async fn publishing_device_with_no_edges_attaches_it_to_the_root() {
    let srv = test_server();

    // points to a brand-new id: node is created with no parent edge
    let dev = uuid::Uuid::new_v4().to_string();
    send_points(&srv, &dev, &[Point::new_value(now(), point_type::VALUE, 1.0)]).await;

    let store = srv.store.clone();
    let root = srv.root.clone();
    let dev_check = dev.clone();
    assert!(
        wait_for(
            move || {
                store
                    .edges_up(&dev_check, false)
                    .map(|edges| edges.iter().any(|e| e.up == root))
                    .unwrap_or(false)
            },
            2_000
        )
        .await,
        "repair never attached the device to the root"
    );

    srv.handle.shutdown().await;
}

#[tokio::test]
async fn fully_tombstoned_device_gets_its_parent_edge_restored() {
    let srv = test_server();
    let root = srv.root.clone();
    let dev = create(&srv, &root, node_type::DEVICE, vec![]).await;

    let reply = send_edge_points(&srv, &root, &dev, &[Point::new_tombstone(now(), true)]).await;
    assert!(reply.is_empty());
    assert!(srv.store.edges_up(&dev, false).unwrap().is_empty());

    // the orphan keeps publishing; propagation repairs the edge
    send_points(&srv, &dev, &[Point::new_value(now(), point_type::VALUE, 7.0)]).await;

    let store = srv.store.clone();
    let dev_check = dev.clone();
    assert!(
        wait_for(
            move || !store.edges_up(&dev_check, false).unwrap_or_default().is_empty(),
            2_000
        )
        .await,
        "tombstoned edge was never restored"
    );

    srv.handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn login_returns_the_user_and_a_token_node() {
    let srv = test_server();
    let root = srv.root.clone();
    let user = create(
        &srv,
        &root,
        node_type::USER,
        vec![
            Point::new_text(now(), point_type::EMAIL, "admin@example.com"),
            Point::new_text(now(), point_type::PASS, "hunter2"),
        ],
    )
    .await;

    let creds = encode_points(&[
        Point::new_text(now(), point_type::EMAIL, "admin@example.com"),
        Point::new_text(now(), point_type::PASS, "hunter2"),
    ]);
    let reply = srv
        .bus
        .request(subject::AUTH_USER, creds, REQ_TIMEOUT)
        .await
        .unwrap();
    let (nodes, error) = decode_nodes_reply(&reply).unwrap();

    assert_eq!(error, "");
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].id, user);
    assert_eq!(nodes[1].typ, node_type::JWT);
    let token = point::find_text(&nodes[1].points, point_type::TOKEN);
    assert!(!token.is_empty());

    srv.handle.shutdown().await;
}

#[tokio::test]
async fn failed_login_replies_with_an_empty_payload() {
    let srv = test_server();
    let root = srv.root.clone();
    create(
        &srv,
        &root,
        node_type::USER,
        vec![
            Point::new_text(now(), point_type::EMAIL, "admin@example.com"),
            Point::new_text(now(), point_type::PASS, "hunter2"),
        ],
    )
    .await;

    let creds = encode_points(&[
        Point::new_text(now(), point_type::EMAIL, "admin@example.com"),
        Point::new_text(now(), point_type::PASS, "wrong"),
    ]);
    let reply = srv
        .bus
        .request(subject::AUTH_USER, creds, REQ_TIMEOUT)
        .await
        .unwrap();
    assert!(reply.is_empty(), "reply must not disclose anything");

    srv.handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Software updates
// ---------------------------------------------------------------------------

#[tokio::test]
async fn update_lifecycle_publishes_state_points() {
    let srv = test_server();
    let root = srv.root.clone();
    let dev = create(&srv, &root, node_type::DEVICE, vec![]).await;

    let svc = srv.handle.service().clone();
    svc.start_update(&dev).unwrap();

    // a second start for the same device is refused
    assert!(matches!(
        svc.start_update(&dev),
        Err(MeshpointError::Dispatch { .. })
    ));

    let store = srv.store.clone();
    let dev_check = dev.clone();
    assert!(
        wait_for(
            move || stored_value(&store, &dev_check, point_type::SW_UPDATE_RUNNING) == 1.0,
            2_000
        )
        .await
    );

    svc.finish_update(&dev, None).unwrap();
    let store = srv.store.clone();
    let dev_check = dev.clone();
    assert!(
        wait_for(
            move || {
                stored_value(&store, &dev_check, point_type::SW_UPDATE_RUNNING) == 0.0
                    && stored_value(&store, &dev_check, point_type::SW_UPDATE_PERC_COMPLETE)
                        == 100.0
            },
            2_000
        )
        .await
    );

    // and the device can be updated again
    svc.start_update(&dev).unwrap();

    srv.handle.shutdown().await;
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_stops_servicing_requests() {
    let srv = test_server();
    srv.handle.shutdown().await;

    let err = srv
        .bus
        .request(
            &subject::node(&srv.root),
            b"all".to_vec(),
            Duration::from_millis(100),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MeshpointError::Timeout { .. }));
}
