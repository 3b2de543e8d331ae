//! The [`Point`] primitive: a timestamped, tag-indexed telemetry sample.
//!
//! Points are immutable by convention — a slot identified by
//! `(type, key)` is only ever *replaced* by a strictly newer point
//! (last-writer-wins on `time`). A point with a non-zero `tombstone`
//! marks the slot as logically deleted without destroying history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Point type constants
// ---------------------------------------------------------------------------

/// Well-known point `type` tags.
///
/// The type is the semantic channel of a point. Clients may introduce
/// their own tags; the constants here are the ones the core dispatches
/// on.
pub mod point_type {
    /// Primary sampled value of a node.
    pub const VALUE: &str = "value";
    /// Human-readable node description.
    pub const DESCRIPTION: &str = "description";
    /// Logical deletion marker (non-zero value deletes).
    pub const TOMBSTONE: &str = "tombstone";
    /// Declares the type of a node co-created by a point write.
    pub const NODE_TYPE: &str = "nodeType";
    /// Synthetic point injected by the schedule sweeper.
    pub const TRIGGER: &str = "trigger";

    /// User email address.
    pub const EMAIL: &str = "email";
    /// User password.
    pub const PASS: &str = "pass";
    /// User phone number.
    pub const PHONE: &str = "phone";
    /// User first name.
    pub const FIRST_NAME: &str = "firstName";
    /// User last name.
    pub const LAST_NAME: &str = "lastName";
    /// Auth token issued on a successful login.
    pub const TOKEN: &str = "token";

    /// Condition/action qualifier: target or source node id.
    pub const NODE_ID: &str = "nodeID";
    /// Condition/action qualifier: point type to match or set.
    pub const POINT_TYPE: &str = "pointType";
    /// Condition/action qualifier: point key to match or set.
    pub const POINT_KEY: &str = "pointKey";
    /// Condition/action value interpretation (`number`, `text`, `onOff`).
    pub const VALUE_TYPE: &str = "valueType";
    /// Condition comparison operator.
    pub const OPERATOR: &str = "operator";
    /// Condition numeric threshold.
    pub const VALUE_NUMBER: &str = "valueNumber";
    /// Condition/action text value.
    pub const VALUE_TEXT: &str = "valueText";
    /// Seconds a condition predicate must hold before going active.
    pub const MIN_ACTIVE: &str = "minActive";
    /// Seconds between repeated fires of an action (0 = single-shot).
    pub const REPEAT_PERIOD: &str = "repeatPeriod";

    /// Persistent condition/rule activation state (0/1).
    pub const ACTIVE: &str = "active";
    /// Epoch milliseconds of the first satisfied evaluation (0 = unset).
    pub const ACTIVE_START: &str = "activeStart";
    /// Epoch milliseconds an action last fired (0 = never/reset).
    pub const LAST_SENT: &str = "lastSent";
    /// Evaluation error text on a malformed condition.
    pub const ERROR: &str = "error";

    /// Message service channel (`twilio`, `smtp`).
    pub const SERVICE: &str = "service";
    /// Message service account SID.
    pub const SID: &str = "sid";
    /// Message service auth token.
    pub const AUTH_TOKEN: &str = "authToken";
    /// Message service sender address.
    pub const FROM: &str = "from";

    /// Software update in progress (0/1).
    pub const SW_UPDATE_RUNNING: &str = "swUpdateRunning";
    /// Software update error text.
    pub const SW_UPDATE_ERROR: &str = "swUpdateError";
    /// Software update completion percentage.
    pub const SW_UPDATE_PERC_COMPLETE: &str = "swUpdatePercComplete";

    /// Mean handler cycle time for node point writes (ms).
    pub const METRIC_CYCLE_NODE_POINT: &str = "metricCycleNodePoint";
    /// Mean handler cycle time for edge point writes (ms).
    pub const METRIC_CYCLE_NODE_EDGE_POINT: &str = "metricCycleNodeEdgePoint";
    /// Mean handler cycle time for node reads (ms).
    pub const METRIC_CYCLE_NODE: &str = "metricCycleNode";
    /// Mean handler cycle time for children queries (ms).
    pub const METRIC_CYCLE_NODE_CHILDREN: &str = "metricCycleNodeChildren";
    /// Buffered node point messages awaiting the handler.
    pub const METRIC_PENDING_NODE_POINT: &str = "metricPendingNodePoint";
    /// Buffered edge point messages awaiting the handler.
    pub const METRIC_PENDING_NODE_EDGE_POINT: &str = "metricPendingNodeEdgePoint";
}

/// Well-known point *values* (stored in the `text` field of qualifier
/// points).
pub mod point_value {
    /// Numeric condition/action value.
    pub const NUMBER: &str = "number";
    /// Text condition/action value.
    pub const TEXT: &str = "text";
    /// Boolean condition/action value.
    pub const ON_OFF: &str = "onOff";

    /// Numeric greater-than operator.
    pub const GREATER_THAN: &str = ">";
    /// Numeric less-than operator.
    pub const LESS_THAN: &str = "<";
    /// Equality operator (number or text).
    pub const EQUAL: &str = "=";
    /// Inequality operator (number or text).
    pub const NOT_EQUAL: &str = "!=";
    /// Text containment operator.
    pub const CONTAINS: &str = "contains";
    /// On/off operator: predicate holds while the sample is on.
    pub const ON: &str = "on";
    /// On/off operator: predicate holds while the sample is off.
    pub const OFF: &str = "off";

    /// Action variant that emits a notification instead of a point.
    pub const NOTIFICATION: &str = "notification";
    /// SMS message service.
    pub const TWILIO: &str = "twilio";
    /// Email message service.
    pub const SMTP: &str = "smtp";
    /// Sentinel for "no target node".
    pub const NONE: &str = "none";
}

// ---------------------------------------------------------------------------
// Point
// ---------------------------------------------------------------------------

/// A telemetry sample.
///
/// `(type, key)` addresses a slot within a node (or within a
/// parent→child edge); `time` orders competing writes to the same
/// slot. Ordering ties between *different* slots are broken by
/// `(type, key)` lexicographic comparison, so sorted point lists are
/// deterministic.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Absolute sample time.
    pub time: DateTime<Utc>,
    /// Semantic channel tag, e.g. `value` or `description`.
    #[serde(rename = "type")]
    pub typ: String,
    /// Index within the type; empty = scalar.
    pub key: String,
    /// Numeric payload.
    pub value: f64,
    /// Textual payload; empty unless the type is textual.
    pub text: String,
    /// Non-zero marks logical deletion of this `(type, key)` slot.
    pub tombstone: u32,
}

impl Point {
    /// Creates a numeric point with an empty key.
    pub fn new_value(time: DateTime<Utc>, typ: &str, value: f64) -> Self {
        Self {
            time,
            typ: typ.to_string(),
            key: String::new(),
            value,
            text: String::new(),
            tombstone: 0,
        }
    }

    /// Creates a text point with an empty key.
    pub fn new_text(time: DateTime<Utc>, typ: &str, text: &str) -> Self {
        Self {
            time,
            typ: typ.to_string(),
            key: String::new(),
            value: 0.0,
            text: text.to_string(),
            tombstone: 0,
        }
    }

    /// Creates a tombstone point for this point's slot.
    pub fn new_tombstone(time: DateTime<Utc>, set: bool) -> Self {
        Self {
            time,
            typ: point_type::TOMBSTONE.to_string(),
            key: String::new(),
            value: if set { 1.0 } else { 0.0 },
            text: String::new(),
            tombstone: 0,
        }
    }

    /// True when the point logically deletes its slot.
    pub fn is_tombstone(&self) -> bool {
        self.tombstone != 0
    }

    /// Interprets the numeric payload as a boolean.
    pub fn as_bool(&self) -> bool {
        self.value != 0.0
    }

    /// Total order used for deterministic point lists: time first,
    /// ties broken by `(type, key)` lexicographic.
    pub fn cmp_order(&self, other: &Self) -> std::cmp::Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.typ.cmp(&other.typ))
            .then_with(|| self.key.cmp(&other.key))
    }
}

// ---------------------------------------------------------------------------
// Point list helpers
// ---------------------------------------------------------------------------

/// Finds the point addressing `(typ, key)` in a slice.
pub fn find<'a>(points: &'a [Point], typ: &str, key: &str) -> Option<&'a Point> {
    points.iter().find(|p| p.typ == typ && p.key == key)
}

/// Text of the `(typ, "")` point, or empty when absent.
pub fn find_text(points: &[Point], typ: &str) -> String {
    find(points, typ, "").map(|p| p.text.clone()).unwrap_or_default()
}

/// Value of the `(typ, "")` point, or 0 when absent.
pub fn find_value(points: &[Point], typ: &str) -> f64 {
    find(points, typ, "").map(|p| p.value).unwrap_or(0.0)
}

/// Sorts points by `(time, type, key)` for deterministic output.
pub fn sort(points: &mut [Point]) {
    points.sort_by(|a, b| a.cmp_order(b));
}
