//! Node and edge records.
//!
//! A [`Node`] is a plain record: a UUID string id, a `type`
//! discriminator, and a set of points keyed by `(type, key)`.
//! Behavior (rule, condition, action, message service, database sink)
//! is dispatched by matching on the type and projecting the points
//! into a typed view on demand — there is no inheritance.
//!
//! Parent→child relations are [`Edge`]s with their own point sets.
//! [`NodeEdge`] is a node viewed through one parent edge, which is
//! the unit the bus read operations return.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::point::{self, point_type, Point};

// ---------------------------------------------------------------------------
// Node type constants
// ---------------------------------------------------------------------------

/// Sentinel parent id of the singular root node.
pub const ROOT_PARENT: &str = "root";

/// Well-known node `type` discriminators.
pub mod node_type {
    /// A physical or logical device producing points.
    pub const DEVICE: &str = "device";
    /// An organizational grouping of nodes and users.
    pub const GROUP: &str = "group";
    /// A person who can log in and receive notifications.
    pub const USER: &str = "user";
    /// A rule composed of conditions and actions.
    pub const RULE: &str = "rule";
    /// A predicate child of a rule.
    pub const CONDITION: &str = "condition";
    /// An effect fired when its rule goes active.
    pub const ACTION: &str = "action";
    /// An effect fired when its rule goes inactive.
    pub const ACTION_INACTIVE: &str = "actionInactive";
    /// An outbound notification service (twilio, smtp).
    pub const MSG_SERVICE: &str = "msgService";
    /// A time-series sink nodes forward points to.
    pub const DB: &str = "db";
    /// A free-standing variable set by rules or users.
    pub const VARIABLE: &str = "variable";
    /// A synthetic signal source.
    pub const SIGNAL_GENERATOR: &str = "signalGenerator";
    /// A modbus bus controller.
    pub const MODBUS: &str = "modbus";
    /// A single modbus register mapping.
    pub const MODBUS_IO: &str = "modbusIo";
    /// A serial-attached MCU.
    pub const SERIAL_DEV: &str = "serialDev";
    /// A one-wire bus controller.
    pub const ONE_WIRE: &str = "oneWire";
    /// A single one-wire sensor.
    pub const ONE_WIRE_IO: &str = "oneWireIO";
    /// An upstream replication target.
    pub const UPSTREAM: &str = "upstream";
    /// Synthetic node carrying an auth token in login replies.
    pub const JWT: &str = "jwt";
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// An identified record with a type and a set of points.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// UUID string.
    pub id: String,
    /// Type discriminator, see [`node_type`].
    #[serde(rename = "type")]
    pub typ: String,
    /// Latest point per `(type, key)` slot.
    pub points: Vec<Point>,
}

impl Node {
    /// Human-readable description, or empty when none is set.
    pub fn desc(&self) -> String {
        point::find_text(&self.points, point_type::DESCRIPTION)
    }

    /// Views this node through the given parent edge.
    pub fn to_node_edge(&self, parent: &str, edge_points: Vec<Point>) -> NodeEdge {
        NodeEdge {
            id: self.id.clone(),
            typ: self.typ.clone(),
            parent: parent.to_string(),
            points: self.points.clone(),
            edge_points,
        }
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// A directed parent→child relation with its own point set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Parent node id (`"root"` sentinel above the root node).
    pub up: String,
    /// Child node id.
    pub down: String,
    /// Latest edge point per `(type, key)` slot.
    pub points: Vec<Point>,
}

impl Edge {
    /// True when the latest tombstone edge point deletes the relation.
    pub fn is_tombstone(&self) -> bool {
        point::find(&self.points, point_type::TOMBSTONE, "")
            .map(|p| p.value != 0.0)
            .unwrap_or(false)
    }

    /// Time of the latest tombstone edge point, used to pick the most
    /// recent parent during orphan repair.
    pub fn tombstone_time(&self) -> Option<DateTime<Utc>> {
        point::find(&self.points, point_type::TOMBSTONE, "").map(|p| p.time)
    }
}

// ---------------------------------------------------------------------------
// NodeEdge
// ---------------------------------------------------------------------------

/// A node viewed through one parent edge.
///
/// This is what read operations return and what travels on the wire:
/// node identity and points plus the parent id and the edge point set
/// for that particular relation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeEdge {
    /// UUID string of the node.
    pub id: String,
    /// Node type discriminator.
    #[serde(rename = "type")]
    pub typ: String,
    /// Parent node id this view is scoped to (may be empty).
    pub parent: String,
    /// Node points.
    pub points: Vec<Point>,
    /// Edge points of the `parent`→`id` relation.
    pub edge_points: Vec<Point>,
}

impl NodeEdge {
    /// True when the parent edge is tombstoned.
    pub fn is_tombstone(&self) -> bool {
        point::find(&self.edge_points, point_type::TOMBSTONE, "")
            .map(|p| p.value != 0.0)
            .unwrap_or(false)
    }

    /// Drops the edge view, keeping the node record.
    pub fn to_node(&self) -> Node {
        Node {
            id: self.id.clone(),
            typ: self.typ.clone(),
            points: self.points.clone(),
        }
    }

    /// Human-readable description, or empty when none is set.
    pub fn desc(&self) -> String {
        point::find_text(&self.points, point_type::DESCRIPTION)
    }

    /// Integrity hash over identity and sorted points.
    ///
    /// Used by sync peers to compare subtrees cheaply. Stable across
    /// point insertion order.
    pub fn calc_hash(&self) -> Vec<u8> {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.typ.as_bytes());
        hasher.update(self.parent.as_bytes());

        let mut points = self.points.clone();
        point::sort(&mut points);
        let mut edge_points = self.edge_points.clone();
        point::sort(&mut edge_points);

        for p in points.iter().chain(edge_points.iter()) {
            hasher.update(p.time.timestamp_nanos_opt().unwrap_or(0).to_be_bytes());
            hasher.update(p.typ.as_bytes());
            hasher.update(p.key.as_bytes());
            hasher.update(p.value.to_bits().to_be_bytes());
            hasher.update(p.text.as_bytes());
            hasher.update(p.tombstone.to_be_bytes());
        }

        hasher.finalize().to_vec()
    }
}

/// Removes duplicate node views, keeping the first occurrence of each id.
pub fn dedup_by_id(nodes: Vec<NodeEdge>) -> Vec<NodeEdge> {
    let mut seen = std::collections::HashSet::new();
    nodes
        .into_iter()
        .filter(|n| seen.insert(n.id.clone()))
        .collect()
}
