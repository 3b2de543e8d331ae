//! Rule engine: condition evaluation and action dispatch.
//!
//! A `rule` node owns three child collections — `condition`, `action`,
//! and `actionInactive`. The rule is active iff *all* conditions are
//! active; activation changes are edge-triggered against the `active`
//! point persisted on the rule node.
//!
//! Evaluation state (`active`, `activeStart`, `lastSent`, `error`
//! points) is written directly to the store — the caller holds the
//! service write lock, so edge detection is deterministic. Only
//! *target* points and notifications travel through the bus.
//!
//! All timing is injected via `now`, which keeps sustain windows and
//! repeat periods testable without sleeping.

use chrono::{DateTime, Duration, Utc};

use meshpoint_bus::{subject, Bus};
use meshpoint_proto::{encode_notification, encode_points};
use meshpoint_storage::StoreEngine;
use meshpoint_types::node::dedup_by_id;
use meshpoint_types::{
    node_type, point, point_type, point_value, views, ActionSpec, ConditionSpec, NodeEdge,
    Notification, Point, Result,
};

// ---------------------------------------------------------------------------
// Rule processing
// ---------------------------------------------------------------------------

/// Evaluates one rule against a point batch and dispatches actions on
/// activation edges (and repeat-period re-fires).
///
/// `source_node_id` is the node the points were merged into; the
/// schedule sweeper passes an empty source with a synthetic `trigger`
/// point so sustain windows advance without external input.
pub fn process_rule_node(
    store: &StoreEngine,
    bus: &Bus,
    rule_node: &NodeEdge,
    source_node_id: &str,
    points: &[Point],
    now: DateTime<Utc>,
) -> Result<()> {
    let mut conditions = dedup_by_id(store.descendants(
        &rule_node.id,
        node_type::CONDITION,
        false,
        false,
    )?);
    if conditions.is_empty() {
        return Ok(());
    }
    // fixed evaluation order for deterministic replay
    conditions.sort_by(|a, b| a.id.cmp(&b.id));

    let mut all_active = true;
    for cond in &conditions {
        let active = evaluate_condition(store, cond, points, now)?;
        all_active = all_active && active;
    }

    // reread for freshness — the caller's view may predate this batch
    let rule_fresh = store.node(&rule_node.id)?;
    let was_active = point::find_value(&rule_fresh.points, point_type::ACTIVE) != 0.0;
    let changed = all_active != was_active;

    if changed {
        write_point(
            store,
            &rule_node.id,
            Point::new_value(now, point_type::ACTIVE, if all_active { 1.0 } else { 0.0 }),
        )?;
        tracing::debug!(
            rule = %rule_node.id,
            active = all_active,
            source = %source_node_id,
            "rule activation edge"
        );
    }

    let actions = dedup_by_id(store.descendants(&rule_node.id, node_type::ACTION, false, false)?);
    let actions_inactive = dedup_by_id(store.descendants(
        &rule_node.id,
        node_type::ACTION_INACTIVE,
        false,
        false,
    )?);

    if all_active {
        run_actions(store, bus, rule_node, &actions, source_node_id, now, changed)?;
        if changed {
            reset_actions(store, &actions_inactive, now)?;
        }
    } else {
        run_actions(
            store,
            bus,
            rule_node,
            &actions_inactive,
            source_node_id,
            now,
            changed,
        )?;
        if changed {
            reset_actions(store, &actions, now)?;
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Condition evaluation
// ---------------------------------------------------------------------------

/// Evaluates one condition and persists its state points.
///
/// Never fails on a malformed condition — that evaluates inactive and
/// leaves an `error` point on the condition node so the remaining
/// conditions still run.
fn evaluate_condition(
    store: &StoreEngine,
    cond: &NodeEdge,
    points: &[Point],
    now: DateTime<Utc>,
) -> Result<bool> {
    let spec = ConditionSpec::from_node(&cond.to_node());

    // the sample the predicate is judged against, if one is available
    // this evaluation
    let sample = match condition_sample(store, &spec, points)? {
        SampleSource::Sample(p) => Some(p),
        SampleSource::NoNewSample => None,
        SampleSource::Malformed(reason) => {
            write_point(
                store,
                &spec.id,
                Point::new_text(now, point_type::ERROR, &reason),
            )?;
            return transition(store, &spec, Some(false), now);
        }
    };

    let satisfied = match sample {
        Some(p) => match predicate(&spec, &p) {
            Ok(s) => Some(s),
            Err(reason) => {
                write_point(
                    store,
                    &spec.id,
                    Point::new_text(now, point_type::ERROR, &reason),
                )?;
                return transition(store, &spec, Some(false), now);
            }
        },
        None => None,
    };

    transition(store, &spec, satisfied, now)
}

/// Where a condition's sample comes from.
enum SampleSource {
    Sample(Point),
    NoNewSample,
    Malformed(String),
}

/// Picks the sample for this evaluation.
///
/// A condition qualified with a `nodeID` reads that node's stored
/// point; an unqualified condition matches against the incoming batch
/// (which the store already merged). A `trigger` batch carries no
/// matching sample — the predicate state is left as-is and only the
/// sustain window advances.
fn condition_sample(
    store: &StoreEngine,
    spec: &ConditionSpec,
    points: &[Point],
) -> Result<SampleSource> {
    let point_typ = if spec.point_type.is_empty() {
        point_type::VALUE
    } else {
        &spec.point_type
    };

    if !spec.node_id.is_empty() {
        let node = match store.node(&spec.node_id) {
            Ok(n) => n,
            Err(_) => {
                return Ok(SampleSource::Malformed(format!(
                    "condition source node {} not found",
                    spec.node_id
                )))
            }
        };
        return Ok(match point::find(&node.points, point_typ, &spec.point_key) {
            Some(p) => SampleSource::Sample(p.clone()),
            None => SampleSource::NoNewSample,
        });
    }

    // unqualified: any node in the propagation path
    Ok(
        match points
            .iter()
            .find(|p| p.typ == point_typ && p.key == spec.point_key)
        {
            Some(p) => SampleSource::Sample(p.clone()),
            None => SampleSource::NoNewSample,
        },
    )
}

/// Applies the predicate operator to a sample.
fn predicate(spec: &ConditionSpec, sample: &Point) -> std::result::Result<bool, String> {
    match spec.value_type.as_str() {
        point_value::NUMBER => match spec.operator.as_str() {
            point_value::GREATER_THAN => Ok(sample.value > spec.value_number),
            point_value::LESS_THAN => Ok(sample.value < spec.value_number),
            point_value::EQUAL => Ok(sample.value == spec.value_number),
            point_value::NOT_EQUAL => Ok(sample.value != spec.value_number),
            op => Err(format!("unknown number operator: {op}")),
        },
        point_value::TEXT => match spec.operator.as_str() {
            point_value::EQUAL => Ok(sample.text == spec.value_text),
            point_value::NOT_EQUAL => Ok(sample.text != spec.value_text),
            point_value::CONTAINS => Ok(sample.text.contains(&spec.value_text)),
            op => Err(format!("unknown text operator: {op}")),
        },
        point_value::ON_OFF => match spec.operator.as_str() {
            point_value::ON => Ok(sample.value != 0.0),
            point_value::OFF => Ok(sample.value == 0.0),
            op => Err(format!("unknown onOff operator: {op}")),
        },
        vt => Err(format!("unknown condition value type: {vt}")),
    }
}

/// Advances a condition's sustain state and persists changes.
///
/// - predicate satisfied → `activeStart` set on the first satisfied
///   evaluation; active once it has held for `minActive`.
/// - predicate failed → inactive immediately, `activeStart` cleared.
/// - no new sample → the sustain window advances against the stored
///   `activeStart`.
fn transition(
    store: &StoreEngine,
    spec: &ConditionSpec,
    satisfied: Option<bool>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let min_active = Duration::milliseconds((spec.min_active_secs * 1000.0) as i64);

    let active = match satisfied {
        Some(true) => {
            let start = spec.active_start.unwrap_or(now);
            if spec.active_start.is_none() {
                write_point(
                    store,
                    &spec.id,
                    Point::new_value(
                        now,
                        point_type::ACTIVE_START,
                        views::millis_value(Some(start)),
                    ),
                )?;
            }
            now.signed_duration_since(start) >= min_active
        }
        Some(false) => {
            if spec.active_start.is_some() {
                write_point(
                    store,
                    &spec.id,
                    Point::new_value(now, point_type::ACTIVE_START, 0.0),
                )?;
            }
            false
        }
        None => match spec.active_start {
            Some(start) => now.signed_duration_since(start) >= min_active,
            None => false,
        },
    };

    if active != spec.active {
        write_point(
            store,
            &spec.id,
            Point::new_value(now, point_type::ACTIVE, if active { 1.0 } else { 0.0 }),
        )?;
    }

    Ok(active)
}

// ---------------------------------------------------------------------------
// Action dispatch
// ---------------------------------------------------------------------------

/// Dispatches a set of actions.
///
/// `on_edge` marks an activation change. Eligibility:
/// - on an edge: fire, unless a repeat period is set and has not
///   elapsed since `lastSent`,
/// - between edges: only repeating actions that already fired this
///   window re-fire once their period elapses, so reminders keep
///   going through a long activation window.
///
/// `lastSent` only advances after a successful publish — a failed
/// dispatch is logged and retried on the next eligible trigger.
fn run_actions(
    store: &StoreEngine,
    bus: &Bus,
    rule_node: &NodeEdge,
    actions: &[NodeEdge],
    source_node_id: &str,
    now: DateTime<Utc>,
    on_edge: bool,
) -> Result<()> {
    for action in actions {
        let spec = ActionSpec::from_node(&action.to_node());

        let eligible = match spec.last_sent {
            None => on_edge,
            Some(last) if spec.repeat_period_secs > 0.0 => {
                let repeat = Duration::milliseconds((spec.repeat_period_secs * 1000.0) as i64);
                now.signed_duration_since(last) >= repeat
            }
            Some(_) => on_edge,
        };
        if !eligible {
            continue;
        }

        let sent = dispatch_action(bus, rule_node, &spec, source_node_id, now);
        match sent {
            Ok(()) => {
                write_point(
                    store,
                    &spec.id,
                    Point::new_value(
                        now,
                        point_type::LAST_SENT,
                        views::millis_value(Some(now)),
                    ),
                )?;
            }
            Err(e) => {
                tracing::error!(action = %spec.id, %e, "action dispatch failed");
            }
        }
    }
    Ok(())
}

/// Publishes one action's effect.
///
/// Targets `none`/empty — and actions typed `notification` — publish
/// a notification on the rule's `not` subject instead of setting a
/// point.
fn dispatch_action(
    bus: &Bus,
    rule_node: &NodeEdge,
    spec: &ActionSpec,
    source_node_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let is_notification = spec.node_id.is_empty()
        || spec.node_id == point_value::NONE
        || spec.point_type == point_value::NOTIFICATION;

    if is_notification {
        let rule_desc = rule_node.desc();
        let body = if spec.value_text.is_empty() {
            format!("rule '{}' fired (source node {})", rule_desc, source_node_id)
        } else {
            spec.value_text.clone()
        };
        let not = Notification {
            id: uuid::Uuid::new_v4().to_string(),
            parent: rule_node.parent.clone(),
            subject: rule_desc,
            message: body,
        };
        return bus.publish(&subject::node_not(&rule_node.id), encode_notification(&not));
    }

    let typ = if spec.point_type.is_empty() {
        point_type::VALUE.to_string()
    } else {
        spec.point_type.clone()
    };
    let point = Point {
        time: now,
        typ,
        key: spec.point_key.clone(),
        value: spec.value_number,
        text: if spec.value_type == point_value::TEXT {
            spec.value_text.clone()
        } else {
            String::new()
        },
        tombstone: 0,
    };

    bus.publish(&subject::node_points(&spec.node_id), encode_points(&[point]))
}

/// Zeroes `lastSent` on a set of actions so they are armed for the
/// next opposite activation edge.
fn reset_actions(store: &StoreEngine, actions: &[NodeEdge], now: DateTime<Utc>) -> Result<()> {
    for action in actions {
        let spec = ActionSpec::from_node(&action.to_node());
        if spec.last_sent.is_some() {
            write_point(
                store,
                &spec.id,
                Point::new_value(now, point_type::LAST_SENT, 0.0),
            )?;
        }
    }
    Ok(())
}

fn write_point(store: &StoreEngine, node_id: &str, point: Point) -> Result<()> {
    store.merge_points(node_id, &[point])
}
