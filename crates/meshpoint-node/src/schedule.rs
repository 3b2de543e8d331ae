//! Schedule sweeper.
//!
//! Time-windowed conditions only change state when something
//! evaluates them. The sweeper walks the tree on a fixed tick and
//! feeds every rule a synthetic `trigger` point so sustain windows
//! and repeat periods advance even when no device is publishing.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use meshpoint_types::{node_type, point_type, Point, Result};

use crate::rules;
use crate::service::StoreService;

/// Runs the sweep loop until shutdown.
pub(crate) async fn run_sweeper(svc: Arc<StoreService>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(Duration::from_secs(svc.config().schedule_tick_secs));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Err(e) = sweep(&svc).await {
                    tracing::warn!(%e, "schedule sweep failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

/// One sweep: every rule under the root (descending through groups)
/// is evaluated against a synthetic trigger point.
async fn sweep(svc: &Arc<StoreService>) -> Result<()> {
    let store = svc.store();
    let now = Utc::now();
    let trigger = Point::new_value(now, point_type::TRIGGER, 0.0);

    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<_> = store
        .descendants(store.root_id(), "", false, false)?
        .into();

    while let Some(node) = queue.pop_front() {
        if !visited.insert(node.id.clone()) {
            continue;
        }
        match node.typ.as_str() {
            node_type::RULE => {
                let _guard = svc.write_lock().lock().await;
                let result = rules::process_rule_node(
                    store,
                    svc.bus(),
                    &node,
                    "",
                    std::slice::from_ref(&trigger),
                    now,
                );
                if let Err(e) = result {
                    tracing::warn!(rule = %node.id, %e, "scheduled rule evaluation failed");
                }
            }
            node_type::GROUP => {
                queue.extend(store.descendants(&node.id, "", false, false)?);
            }
            _ => {}
        }
    }

    Ok(())
}
