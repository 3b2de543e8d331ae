//! Core shared types for the Meshpoint fleet runtime.
//!
//! This crate defines all fundamental types used across the workspace.
//! No other crate should define shared types — everything lives here:
//! the [`Point`] and [`Edge`](node::Edge) primitives, the node record
//! and its per-edge view [`NodeEdge`], the typed projections a node's
//! points can be read through, notification and message records, the
//! workspace error enum, and the runtime configuration.

pub mod config;
pub mod node;
pub mod notify;
pub mod point;
pub mod views;

use thiserror::Error;

pub use node::{node_type, Edge, Node, NodeEdge};
pub use notify::{Message, Notification};
pub use point::{point_type, point_value, Point};
pub use views::{ActionSpec, ConditionSpec, MsgService, SwUpdateState, User};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Workspace-wide error type.
///
/// Every variant carries a human-readable `reason`. The bus error-reply
/// convention (empty reply = ACK, non-empty reply = error text) renders
/// these with `Display`.
#[derive(Debug, Error)]
pub enum MeshpointError {
    /// A payload or subject could not be decoded. Never mutates state.
    #[error("decode error: {reason}")]
    Decode {
        /// Human-readable description of the decode failure.
        reason: String,
    },

    /// A referenced node or edge does not exist.
    #[error("not found: {reason}")]
    NotFound {
        /// What was looked up.
        reason: String,
    },

    /// A proposed edge would close a cycle in the node tree.
    #[error("cycle: {reason}")]
    Cycle {
        /// The offending parent/child pair.
        reason: String,
    },

    /// The underlying key-value store failed.
    #[error("storage error: {reason}")]
    Storage {
        /// Human-readable description of the storage failure.
        reason: String,
    },

    /// A downstream publish or gateway call failed.
    #[error("dispatch error: {reason}")]
    Dispatch {
        /// Human-readable description of the dispatch failure.
        reason: String,
    },

    /// Credentials did not match a user node.
    #[error("auth error: {reason}")]
    Auth {
        /// Internal description; never sent to the requester.
        reason: String,
    },

    /// A bus request exceeded its deadline. Callers may retry.
    #[error("timeout: {reason}")]
    Timeout {
        /// The subject that timed out.
        reason: String,
    },

    /// A configuration value is invalid or missing.
    #[error("config error: {reason}")]
    Config {
        /// Human-readable description of the configuration problem.
        reason: String,
    },

    /// The bus is closed or a subscription is gone.
    #[error("bus error: {reason}")]
    Bus {
        /// Human-readable description of the bus failure.
        reason: String,
    },
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, MeshpointError>;
