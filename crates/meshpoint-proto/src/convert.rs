//! Conversions between domain types and wire structs, plus the
//! subject-aware decode helpers the store service handlers use.

use chrono::{DateTime, TimeZone, Utc};
use prost::Message as _;

use meshpoint_types::{MeshpointError, Message, NodeEdge, Notification, Point, Result};

use crate::wire;

// ---------------------------------------------------------------------------
// Point conversions
// ---------------------------------------------------------------------------

fn time_to_nanos(time: DateTime<Utc>) -> i64 {
    time.timestamp_nanos_opt().unwrap_or(0)
}

fn nanos_to_time(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}

impl From<&Point> for wire::Point {
    fn from(p: &Point) -> Self {
        Self {
            time: time_to_nanos(p.time),
            typ: p.typ.clone(),
            key: p.key.clone(),
            value: p.value,
            text: p.text.clone(),
            tombstone: p.tombstone,
        }
    }
}

impl From<&wire::Point> for Point {
    fn from(p: &wire::Point) -> Self {
        Self {
            time: nanos_to_time(p.time),
            typ: p.typ.clone(),
            key: p.key.clone(),
            value: p.value,
            text: p.text.clone(),
            tombstone: p.tombstone,
        }
    }
}

// ---------------------------------------------------------------------------
// Node conversions
// ---------------------------------------------------------------------------

impl From<&NodeEdge> for wire::Node {
    fn from(n: &NodeEdge) -> Self {
        Self {
            id: n.id.clone(),
            typ: n.typ.clone(),
            points: n.points.iter().map(Into::into).collect(),
            hash: n.calc_hash(),
            tombstone: n.is_tombstone(),
            parent: n.parent.clone(),
            edge_points: n.edge_points.iter().map(Into::into).collect(),
        }
    }
}

impl From<&wire::Node> for NodeEdge {
    fn from(n: &wire::Node) -> Self {
        Self {
            id: n.id.clone(),
            typ: n.typ.clone(),
            parent: n.parent.clone(),
            points: n.points.iter().map(Into::into).collect(),
            edge_points: n.edge_points.iter().map(Into::into).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Notification / Message conversions
// ---------------------------------------------------------------------------

impl From<&Notification> for wire::Notification {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id.clone(),
            parent: n.parent.clone(),
            subject: n.subject.clone(),
            message: n.message.clone(),
        }
    }
}

impl From<&wire::Notification> for Notification {
    fn from(n: &wire::Notification) -> Self {
        Self {
            id: n.id.clone(),
            parent: n.parent.clone(),
            subject: n.subject.clone(),
            message: n.message.clone(),
        }
    }
}

impl From<&Message> for wire::Message {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id.clone(),
            user_id: m.user_id.clone(),
            parent_id: m.parent_id.clone(),
            notification_id: m.notification_id.clone(),
            email: m.email.clone(),
            phone: m.phone.clone(),
            subject: m.subject.clone(),
            message: m.message.clone(),
        }
    }
}

impl From<&wire::Message> for Message {
    fn from(m: &wire::Message) -> Self {
        Self {
            id: m.id.clone(),
            user_id: m.user_id.clone(),
            parent_id: m.parent_id.clone(),
            notification_id: m.notification_id.clone(),
            email: m.email.clone(),
            phone: m.phone.clone(),
            subject: m.subject.clone(),
            message: m.message.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Encode / decode helpers
// ---------------------------------------------------------------------------

fn decode_err(what: &str, e: prost::DecodeError) -> MeshpointError {
    MeshpointError::Decode {
        reason: format!("{what}: {e}"),
    }
}

/// Encodes a point batch for a `points` subject.
pub fn encode_points(points: &[Point]) -> Vec<u8> {
    wire::Points {
        points: points.iter().map(Into::into).collect(),
    }
    .encode_to_vec()
}

/// Decodes a point batch payload.
pub fn decode_points(payload: &[u8]) -> Result<Vec<Point>> {
    let wire = wire::Points::decode(payload).map_err(|e| decode_err("points payload", e))?;
    Ok(wire.points.iter().map(Into::into).collect())
}

/// Decodes a `node.<id>.points` message into `(node_id, points)`.
pub fn decode_node_points_msg(subject: &str, payload: &[u8]) -> Result<(String, Vec<Point>)> {
    let chunks: Vec<&str> = subject.split('.').collect();
    if chunks.len() != 3 || chunks[0] != "node" || chunks[2] != "points" {
        return Err(MeshpointError::Decode {
            reason: format!("bad node points subject: {subject}"),
        });
    }
    Ok((chunks[1].to_string(), decode_points(payload)?))
}

/// Decodes a `node.<parent>.<child>.points` message into
/// `(parent_id, child_id, points)`.
pub fn decode_edge_points_msg(
    subject: &str,
    payload: &[u8],
) -> Result<(String, String, Vec<Point>)> {
    let chunks: Vec<&str> = subject.split('.').collect();
    if chunks.len() != 4 || chunks[0] != "node" || chunks[3] != "points" {
        return Err(MeshpointError::Decode {
            reason: format!("bad edge points subject: {subject}"),
        });
    }
    Ok((
        chunks[1].to_string(),
        chunks[2].to_string(),
        decode_points(payload)?,
    ))
}

/// Encodes a read reply: node views plus an optional error string.
pub fn encode_nodes_reply(nodes: &[NodeEdge], error: &str) -> Vec<u8> {
    wire::NodesRequest {
        nodes: nodes.iter().map(Into::into).collect(),
        error: error.to_string(),
    }
    .encode_to_vec()
}

/// Decodes a read reply into `(nodes, error)`.
pub fn decode_nodes_reply(payload: &[u8]) -> Result<(Vec<NodeEdge>, String)> {
    let wire =
        wire::NodesRequest::decode(payload).map_err(|e| decode_err("nodes reply", e))?;
    Ok((wire.nodes.iter().map(Into::into).collect(), wire.error))
}

/// Encodes children query parameters.
pub fn encode_request(typ: &str, include_del: bool) -> Vec<u8> {
    wire::Request {
        typ: typ.to_string(),
        include_del,
    }
    .encode_to_vec()
}

/// Decodes children query parameters; an empty payload decodes to the
/// defaults (all types, no tombstoned entries).
pub fn decode_request(payload: &[u8]) -> Result<(String, bool)> {
    let wire = wire::Request::decode(payload).map_err(|e| decode_err("children request", e))?;
    Ok((wire.typ, wire.include_del))
}

/// Encodes a notification payload.
pub fn encode_notification(not: &Notification) -> Vec<u8> {
    wire::Notification::from(not).encode_to_vec()
}

/// Decodes a notification payload.
pub fn decode_notification(payload: &[u8]) -> Result<Notification> {
    let wire =
        wire::Notification::decode(payload).map_err(|e| decode_err("notification", e))?;
    Ok(Notification::from(&wire))
}

/// Encodes a message payload.
pub fn encode_message(msg: &Message) -> Vec<u8> {
    wire::Message::from(msg).encode_to_vec()
}

/// Decodes a message payload.
pub fn decode_message(payload: &[u8]) -> Result<Message> {
    let wire = wire::Message::decode(payload).map_err(|e| decode_err("message", e))?;
    Ok(Message::from(&wire))
}
