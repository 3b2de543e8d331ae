//! Notification and message records.
//!
//! A [`Notification`] is the *intent* to tell somebody something — it
//! is published on `node.<id>.not` and fans out across the tree to
//! discover target users. Each discovered user produces a rendered
//! [`Message`] published on `node.<userID>.msg`, which in turn fans
//! out to discover the message service that can deliver it.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// A user-directed notification before fan-out.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Unique id of this notification instance.
    pub id: String,
    /// Parent the notification arrived via; restricts the first level
    /// of the upward walk to avoid duplicates.
    pub parent: String,
    /// Short subject line.
    pub subject: String,
    /// Body text.
    pub message: String,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A rendered per-user message awaiting outbound delivery.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Fresh UUID per message instance.
    pub id: String,
    /// Target user node id.
    pub user_id: String,
    /// Parent edge the user was discovered through.
    pub parent_id: String,
    /// Node id the originating notification was published on.
    pub notification_id: String,
    /// Target email; empty when the user has none.
    pub email: String,
    /// Target phone; empty when the user has none.
    pub phone: String,
    /// Subject line.
    pub subject: String,
    /// Body text.
    pub message: String,
}
