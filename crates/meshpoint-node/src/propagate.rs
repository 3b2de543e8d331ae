//! Upstream propagation: the root-ward walk after every point merge.
//!
//! When points land on node N, every rule that is a direct child of N
//! gets a chance to react, every `db` sink child of N receives the
//! points, and the walk recurses to each parent of N — so a rule
//! anywhere above a device sees everything published beneath it. A
//! visited set bounds the walk on multi-parent graphs.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use meshpoint_bus::subject;
use meshpoint_proto::encode_points;
use meshpoint_types::node::{dedup_by_id, ROOT_PARENT};
use meshpoint_types::{node_type, Node, Point, Result};

use crate::rules;
use crate::service::StoreService;

// ---------------------------------------------------------------------------
// PointSink
// ---------------------------------------------------------------------------

/// Outbound seam for time-series export.
///
/// The walk discovers `db`-typed nodes and hands them each point
/// batch; what happens beyond that (influx, parquet, a test buffer)
/// is not the core's business.
pub trait PointSink: Send + Sync {
    /// Forwards a point batch to the sink described by `db_node`.
    ///
    /// `source_id`/`source_desc` identify the node the points were
    /// merged into.
    fn write_points(
        &self,
        db_node: &Node,
        source_id: &str,
        source_desc: &str,
        points: &[Point],
    ) -> Result<()>;
}

/// Default sink: logs batches at debug level.
pub struct LogSink;

impl PointSink for LogSink {
    fn write_points(
        &self,
        db_node: &Node,
        source_id: &str,
        _source_desc: &str,
        points: &[Point],
    ) -> Result<()> {
        tracing::debug!(
            sink = %db_node.id,
            source = %source_id,
            count = points.len(),
            "point batch for time-series sink"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Propagation
// ---------------------------------------------------------------------------

/// Walks root-ward from `current_id`, re-evaluating rules and feeding
/// sinks at every level.
///
/// Rule and sink failures are logged and never abort the walk — the
/// triggering mutation has already been committed.
///
/// `repair` enables the orphan heuristic; node point writes pass
/// true. Edge point writes propagate too but with repair off — a
/// tombstone write *is* how a device gets deleted, and repairing on
/// it would make deletion impossible.
pub(crate) fn process_points_upstream(
    svc: &StoreService,
    current_id: &str,
    source_id: &str,
    source_desc: &str,
    points: &[Point],
    visited: &mut HashSet<String>,
    repair: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    if !visited.insert(current_id.to_string()) {
        return Ok(());
    }

    let store = svc.store();

    let rule_nodes = dedup_by_id(store.descendants(current_id, node_type::RULE, false, false)?);
    for rule_node in &rule_nodes {
        if let Err(e) = rules::process_rule_node(store, svc.bus(), rule_node, source_id, points, now)
        {
            tracing::warn!(rule = %rule_node.id, %e, "rule processing failed");
        }
    }

    let db_nodes = dedup_by_id(store.descendants(current_id, node_type::DB, false, false)?);
    for db_node in &db_nodes {
        let sink_result =
            svc.sink()
                .write_points(&db_node.to_node(), source_id, source_desc, points);
        if let Err(e) = sink_result {
            tracing::warn!(sink = %db_node.id, %e, "time-series sink write failed");
        }
    }

    // tombstoned edges are walked too: an orphaned subtree still
    // needs its points to reach repair below
    let edges = store.edges_up(current_id, true)?;

    if repair && current_id == source_id {
        repair_orphan(svc, source_id, &edges, now);
    }

    for edge in &edges {
        if edge.up == ROOT_PARENT {
            continue;
        }
        process_points_upstream(
            svc,
            &edge.up,
            source_id,
            source_desc,
            points,
            visited,
            repair,
            now,
        )?;
    }

    Ok(())
}

/// Re-attaches an orphaned device.
///
/// A device whose parent edges are all tombstoned keeps publishing —
/// the repair clears the tombstone on the most recently deleted
/// parent edge, or attaches the device under the root when it has no
/// edges at all. The restoring write goes through the bus like any
/// other edge mutation.
fn repair_orphan(
    svc: &StoreService,
    source_id: &str,
    edges: &[meshpoint_types::Edge],
    now: DateTime<Utc>,
) {
    let node = match svc.store().node(source_id) {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!(node = %source_id, %e, "orphan check failed");
            return;
        }
    };
    if node.typ != node_type::DEVICE {
        return;
    }
    if edges.iter().any(|e| !e.is_tombstone()) {
        return;
    }

    tracing::warn!(node = %source_id, "orphaned device, restoring parent edge");

    let parent = edges
        .iter()
        .max_by_key(|e| e.tombstone_time())
        .map(|e| e.up.clone())
        .unwrap_or_else(|| svc.store().root_id().to_string());

    let clear = Point::new_tombstone(now, false);
    let publish = svc.bus().publish(
        &subject::edge_points(&parent, source_id),
        encode_points(&[clear]),
    );
    if let Err(e) = publish {
        tracing::error!(node = %source_id, %e, "failed to publish repair edge point");
    }
}
