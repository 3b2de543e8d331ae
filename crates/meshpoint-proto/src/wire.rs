//! prost message structs.
//!
//! Field tags are fixed and must never be reused for a different
//! meaning — devices in the field decode these. Timestamps travel as
//! nanoseconds since the Unix epoch (int64).

/// A telemetry sample.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Point {
    /// Nanoseconds since the Unix epoch.
    #[prost(int64, tag = "1")]
    pub time: i64,
    /// Semantic channel tag.
    #[prost(string, tag = "2")]
    pub typ: ::prost::alloc::string::String,
    /// Index within the type; empty = scalar.
    #[prost(string, tag = "3")]
    pub key: ::prost::alloc::string::String,
    /// Numeric payload.
    #[prost(double, tag = "4")]
    pub value: f64,
    /// Textual payload.
    #[prost(string, tag = "5")]
    pub text: ::prost::alloc::string::String,
    /// Non-zero marks logical deletion of the slot.
    #[prost(uint32, tag = "6")]
    pub tombstone: u32,
}

/// Payload of `node.<id>.points` and `node.<parent>.<child>.points`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Points {
    /// Points to merge.
    #[prost(message, repeated, tag = "1")]
    pub points: ::prost::alloc::vec::Vec<Point>,
}

/// A node viewed through one parent edge.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Node {
    /// Node UUID.
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    /// Node type discriminator.
    #[prost(string, tag = "2")]
    pub typ: ::prost::alloc::string::String,
    /// Node points.
    #[prost(message, repeated, tag = "3")]
    pub points: ::prost::alloc::vec::Vec<Point>,
    /// Integrity hash over identity and sorted points.
    #[prost(bytes = "vec", tag = "4")]
    pub hash: ::prost::alloc::vec::Vec<u8>,
    /// True when the parent edge is tombstoned.
    #[prost(bool, tag = "5")]
    pub tombstone: bool,
    /// Parent node id of this view.
    #[prost(string, tag = "6")]
    pub parent: ::prost::alloc::string::String,
    /// Edge points of the parent relation.
    #[prost(message, repeated, tag = "7")]
    pub edge_points: ::prost::alloc::vec::Vec<Point>,
}

/// Reply to node reads and children queries.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NodesRequest {
    /// Matching node views.
    #[prost(message, repeated, tag = "1")]
    pub nodes: ::prost::alloc::vec::Vec<Node>,
    /// Human-readable error; empty on success.
    #[prost(string, tag = "2")]
    pub error: ::prost::alloc::string::String,
}

/// Parameters of a `node.<id>.children` query.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Request {
    /// Node type filter; empty = all types.
    #[prost(string, tag = "1")]
    pub typ: ::prost::alloc::string::String,
    /// Include tombstoned entries.
    #[prost(bool, tag = "2")]
    pub include_del: bool,
}

/// Payload of `node.<id>.not`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Notification {
    /// Unique id of this notification instance.
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    /// Parent the notification arrived via.
    #[prost(string, tag = "2")]
    pub parent: ::prost::alloc::string::String,
    /// Subject line.
    #[prost(string, tag = "3")]
    pub subject: ::prost::alloc::string::String,
    /// Body text.
    #[prost(string, tag = "4")]
    pub message: ::prost::alloc::string::String,
}

/// Payload of `node.<id>.msg`.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    /// Fresh UUID per message instance.
    #[prost(string, tag = "1")]
    pub id: ::prost::alloc::string::String,
    /// Target user node id.
    #[prost(string, tag = "2")]
    pub user_id: ::prost::alloc::string::String,
    /// Parent edge the user was discovered through.
    #[prost(string, tag = "3")]
    pub parent_id: ::prost::alloc::string::String,
    /// Node the originating notification was published on.
    #[prost(string, tag = "4")]
    pub notification_id: ::prost::alloc::string::String,
    /// Target email.
    #[prost(string, tag = "5")]
    pub email: ::prost::alloc::string::String,
    /// Target phone.
    #[prost(string, tag = "6")]
    pub phone: ::prost::alloc::string::String,
    /// Subject line.
    #[prost(string, tag = "7")]
    pub subject: ::prost::alloc::string::String,
    /// Body text.
    #[prost(string, tag = "8")]
    pub message: ::prost::alloc::string::String,
}
