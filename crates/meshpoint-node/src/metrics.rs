//! Handler cycle metrics.
//!
//! Each handler class records how long it takes to process a message.
//! Counters are lock-free atomics so sampling never contends with the
//! write path; the reporter task drains them periodically and
//! publishes the means as points on the root node, alongside the
//! pending-queue depth of the two write subscriptions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use meshpoint_bus::subject;
use meshpoint_proto::encode_points;
use meshpoint_types::{point_type, Point};

use crate::service::StoreService;

// ---------------------------------------------------------------------------
// CycleMetric
// ---------------------------------------------------------------------------

/// Accumulates cycle-time samples for one handler class.
#[derive(Default)]
pub(crate) struct CycleMetric {
    sum_micros: AtomicU64,
    count: AtomicU64,
}

impl CycleMetric {
    /// Records one handler cycle.
    pub(crate) fn sample(&self, elapsed: Duration) {
        self.sum_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Mean cycle time in milliseconds since the last take, resetting
    /// the accumulator. `None` when no samples arrived.
    pub(crate) fn take_mean_ms(&self) -> Option<f64> {
        let count = self.count.swap(0, Ordering::Relaxed);
        let sum = self.sum_micros.swap(0, Ordering::Relaxed);
        if count == 0 {
            return None;
        }
        Some(sum as f64 / count as f64 / 1000.0)
    }
}

/// One [`CycleMetric`] per handler class.
#[derive(Default)]
pub(crate) struct ServiceMetrics {
    pub node_point: CycleMetric,
    pub edge_point: CycleMetric,
    pub node: CycleMetric,
    pub node_children: CycleMetric,
}

/// Depth counters of the write subscriptions, shared with their tasks.
pub(crate) struct PendingDepths {
    pub node_points: Arc<AtomicU64>,
    pub edge_points: Arc<AtomicU64>,
}

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

/// Publishes metric points to the root node on a fixed period until
/// shutdown.
pub(crate) async fn run_reporter(
    svc: Arc<StoreService>,
    depths: PendingDepths,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = Duration::from_secs(svc.config().report_metrics_period_secs);
    let mut tick = tokio::time::interval(period);
    // the immediate first tick would report an empty interval
    tick.tick().await;

    loop {
        tokio::select! {
            _ = tick.tick() => report(&svc, &depths),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

fn report(svc: &StoreService, depths: &PendingDepths) {
    let now = chrono::Utc::now();
    let metrics = svc.metrics();
    let mut points = Vec::new();

    let cycles = [
        (point_type::METRIC_CYCLE_NODE_POINT, &metrics.node_point),
        (
            point_type::METRIC_CYCLE_NODE_EDGE_POINT,
            &metrics.edge_point,
        ),
        (point_type::METRIC_CYCLE_NODE, &metrics.node),
        (
            point_type::METRIC_CYCLE_NODE_CHILDREN,
            &metrics.node_children,
        ),
    ];
    for (typ, metric) in cycles {
        if let Some(mean_ms) = metric.take_mean_ms() {
            points.push(Point::new_value(now, typ, mean_ms));
        }
    }

    points.push(Point::new_value(
        now,
        point_type::METRIC_PENDING_NODE_POINT,
        depths.node_points.load(Ordering::Relaxed) as f64,
    ));
    points.push(Point::new_value(
        now,
        point_type::METRIC_PENDING_NODE_EDGE_POINT,
        depths.edge_points.load(Ordering::Relaxed) as f64,
    ));

    let root = svc.store().root_id().to_string();
    if let Err(e) = svc
        .bus()
        .publish(&subject::node_points(&root), encode_points(&points))
    {
        tracing::warn!(%e, "failed to publish metric points");
    }
}
