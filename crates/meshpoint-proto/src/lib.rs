//! Wire encoding for Meshpoint bus payloads.
//!
//! Every payload crossing the bus is a length-delimited protobuf
//! message. The schema is hand-derived with `prost` rather than
//! generated from a `.proto` file — the message set is small and
//! fixed, and keeping the structs in plain Rust keeps field tags
//! reviewable next to the conversions.
//!
//! Domain types live in `meshpoint-types`; this crate owns the
//! mapping between them and the wire structs in [`wire`].

pub mod convert;
pub mod wire;

pub use convert::{
    decode_edge_points_msg, decode_message, decode_node_points_msg, decode_nodes_reply,
    decode_notification, decode_points, decode_request, encode_message, encode_nodes_reply,
    encode_notification, encode_points, encode_request,
};
