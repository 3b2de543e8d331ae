//! Typed views projected from a node's points.
//!
//! Nodes are plain records; when a subsystem needs structured fields
//! (a user's email, a condition's operator) it projects the point set
//! into one of these views on demand. Projections are cheap and never
//! fail on *missing* points — absent slots read as zero/empty, and it
//! is up to the consumer to decide what is required.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::node::Node;
use crate::point::{self, point_type, Point};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Projection of a `user` node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Node id.
    pub id: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Phone number; empty when the user has none.
    pub phone: String,
    /// Email address; empty when the user has none.
    pub email: String,
    /// Login password.
    pub pass: String,
}

impl User {
    /// Projects a node's points into a `User`.
    pub fn from_node(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            first_name: point::find_text(&node.points, point_type::FIRST_NAME),
            last_name: point::find_text(&node.points, point_type::LAST_NAME),
            phone: point::find_text(&node.points, point_type::PHONE),
            email: point::find_text(&node.points, point_type::EMAIL),
            pass: point::find_text(&node.points, point_type::PASS),
        }
    }
}

// ---------------------------------------------------------------------------
// MsgService
// ---------------------------------------------------------------------------

/// Projection of a `msgService` node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MsgService {
    /// Node id.
    pub id: String,
    /// Channel: `twilio` or `smtp`.
    pub service: String,
    /// Account SID.
    pub sid: String,
    /// Account auth token.
    pub auth_token: String,
    /// Sender phone number or email address.
    pub from: String,
}

impl MsgService {
    /// Projects a node's points into a `MsgService`.
    pub fn from_node(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            service: point::find_text(&node.points, point_type::SERVICE),
            sid: point::find_text(&node.points, point_type::SID),
            auth_token: point::find_text(&node.points, point_type::AUTH_TOKEN),
            from: point::find_text(&node.points, point_type::FROM),
        }
    }
}

// ---------------------------------------------------------------------------
// ConditionSpec
// ---------------------------------------------------------------------------

/// Projection of a `condition` node: the predicate plus its
/// persistent evaluation state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    /// Condition node id.
    pub id: String,
    /// Source qualifier; empty = any node in the propagation path.
    pub node_id: String,
    /// Point type to match, e.g. `value`.
    pub point_type: String,
    /// Point key to match; empty = scalar.
    pub point_key: String,
    /// Interpretation of the threshold: `number`, `text`, or `onOff`.
    pub value_type: String,
    /// Comparison operator, see [`crate::point_value`].
    pub operator: String,
    /// Numeric threshold.
    pub value_number: f64,
    /// Text threshold.
    pub value_text: String,
    /// Seconds the predicate must hold continuously before the
    /// condition is considered met.
    pub min_active_secs: f64,
    /// Persistent output: condition currently active.
    pub active: bool,
    /// Persistent output: first satisfied evaluation, `None` when the
    /// predicate is currently failing.
    pub active_start: Option<DateTime<Utc>>,
}

impl ConditionSpec {
    /// Projects a condition node's points.
    pub fn from_node(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            node_id: point::find_text(&node.points, point_type::NODE_ID),
            point_type: point::find_text(&node.points, point_type::POINT_TYPE),
            point_key: point::find_text(&node.points, point_type::POINT_KEY),
            value_type: point::find_text(&node.points, point_type::VALUE_TYPE),
            operator: point::find_text(&node.points, point_type::OPERATOR),
            value_number: point::find_value(&node.points, point_type::VALUE_NUMBER),
            value_text: point::find_text(&node.points, point_type::VALUE_TEXT),
            min_active_secs: point::find_value(&node.points, point_type::MIN_ACTIVE),
            active: point::find_value(&node.points, point_type::ACTIVE) != 0.0,
            active_start: millis_opt(point::find_value(
                &node.points,
                point_type::ACTIVE_START,
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionSpec
// ---------------------------------------------------------------------------

/// Projection of an `action` / `actionInactive` node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Action node id.
    pub id: String,
    /// Target node id; empty or `none` selects the notification variant.
    pub node_id: String,
    /// Point type to set on the target.
    pub point_type: String,
    /// Point key to set on the target.
    pub point_key: String,
    /// Interpretation of the value: `number`, `text`, or `onOff`.
    pub value_type: String,
    /// Numeric value to set.
    pub value_number: f64,
    /// Text value to set, or the notification body.
    pub value_text: String,
    /// Seconds between repeated fires; 0 = single-shot per activation.
    pub repeat_period_secs: f64,
    /// Persistent rate-limit state: last successful fire.
    pub last_sent: Option<DateTime<Utc>>,
}

impl ActionSpec {
    /// Projects an action node's points.
    pub fn from_node(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            node_id: point::find_text(&node.points, point_type::NODE_ID),
            point_type: point::find_text(&node.points, point_type::POINT_TYPE),
            point_key: point::find_text(&node.points, point_type::POINT_KEY),
            value_type: point::find_text(&node.points, point_type::VALUE_TYPE),
            value_number: point::find_value(&node.points, point_type::VALUE_NUMBER),
            value_text: point::find_text(&node.points, point_type::VALUE_TEXT),
            repeat_period_secs: point::find_value(&node.points, point_type::REPEAT_PERIOD),
            last_sent: millis_opt(point::find_value(&node.points, point_type::LAST_SENT)),
        }
    }
}

// ---------------------------------------------------------------------------
// SwUpdateState
// ---------------------------------------------------------------------------

/// Software update progress published to a device node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SwUpdateState {
    /// An update is in flight.
    pub running: bool,
    /// Error text of the last attempt; empty on success.
    pub error: String,
    /// Completion percentage of the in-flight update.
    pub percent_done: f64,
}

impl SwUpdateState {
    /// Renders the state as points for a `node.<id>.points` write.
    pub fn to_points(&self, now: DateTime<Utc>) -> Vec<Point> {
        vec![
            Point::new_value(
                now,
                point_type::SW_UPDATE_RUNNING,
                if self.running { 1.0 } else { 0.0 },
            ),
            Point::new_text(now, point_type::SW_UPDATE_ERROR, &self.error),
            Point::new_value(now, point_type::SW_UPDATE_PERC_COMPLETE, self.percent_done),
        ]
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Converts an epoch-milliseconds point value into a timestamp;
/// 0 means unset.
fn millis_opt(millis: f64) -> Option<DateTime<Utc>> {
    if millis == 0.0 {
        return None;
    }
    Utc.timestamp_millis_opt(millis as i64).single()
}

/// Renders a timestamp as an epoch-milliseconds point value;
/// `None` renders as 0 (unset).
pub fn millis_value(time: Option<DateTime<Utc>>) -> f64 {
    time.map(|t| t.timestamp_millis() as f64).unwrap_or(0.0)
}
