//! Subject grammar and the core subject taxonomy.
//!
//! Subjects are `.`-separated segment strings. A subscription pattern
//! may use `*` to match exactly one segment; pattern and subject must
//! have the same segment count to match. There is no multi-segment
//! wildcard — every core subject has a fixed shape.

/// Login subject; payload is a point batch carrying email and pass.
pub const AUTH_USER: &str = "auth.user";

/// Pattern matching all node point writes.
pub const NODE_POINTS_PATTERN: &str = "node.*.points";
/// Pattern matching all edge point writes.
pub const EDGE_POINTS_PATTERN: &str = "node.*.*.points";
/// Pattern matching single-node reads.
pub const NODE_PATTERN: &str = "node.*";
/// Pattern matching children queries.
pub const NODE_CHILDREN_PATTERN: &str = "node.*.children";
/// Pattern matching notification triggers.
pub const NODE_NOT_PATTERN: &str = "node.*.not";
/// Pattern matching rendered message deliveries.
pub const NODE_MSG_PATTERN: &str = "node.*.msg";

/// `node.<id>.points` — write points to a node.
pub fn node_points(id: &str) -> String {
    format!("node.{id}.points")
}

/// `node.<parent>.<child>.points` — write edge points.
pub fn edge_points(parent: &str, child: &str) -> String {
    format!("node.{parent}.{child}.points")
}

/// `node.<id>` — read a single node.
pub fn node(id: &str) -> String {
    format!("node.{id}")
}

/// `node.<id>.children` — list descendants.
pub fn node_children(id: &str) -> String {
    format!("node.{id}.children")
}

/// `node.<id>.not` — trigger a user-directed notification.
pub fn node_not(id: &str) -> String {
    format!("node.{id}.not")
}

/// `node.<id>.msg` — deliver a rendered message.
pub fn node_msg(id: &str) -> String {
    format!("node.{id}.msg")
}

/// True when `pattern` matches `subject`.
pub fn matches(pattern: &str, subject: &str) -> bool {
    let mut pat = pattern.split('.');
    let mut sub = subject.split('.');

    loop {
        match (pat.next(), sub.next()) {
            (None, None) => return true,
            (Some(p), Some(s)) => {
                if p != "*" && p != s {
                    return false;
                }
            }
            _ => return false,
        }
    }
}
