//! In-process subject-addressed pub/sub broker.
//!
//! The bus is the ONLY integration seam of the core: every store
//! mutation, read, notification, and login travels through it as a
//! subject-addressed message. It provides:
//!
//! - [`Bus::publish`] — fire-and-forget, non-blocking.
//! - [`Bus::request`] — request/reply with a deadline; a unique
//!   `_inbox.<uuid>` reply subject is created under the hood.
//! - [`Bus::subscribe`] — wildcard pattern subscription returning an
//!   unbounded message stream.
//!
//! Ordering: messages published on one subject by one publisher reach
//! each subscriber in publication order. No cross-subject ordering.
//!
//! Closing the bus ends every subscriber stream, which is how the
//! runtime unblocks all handler tasks on shutdown.

pub mod subject;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use tokio::sync::mpsc;

use meshpoint_types::{MeshpointError, Result};

// ---------------------------------------------------------------------------
// BusMsg
// ---------------------------------------------------------------------------

/// A message delivered to a subscriber.
#[derive(Clone, Debug)]
pub struct BusMsg {
    /// Concrete subject the message was published on.
    pub subject: String,
    /// Reply subject when the publisher expects a response.
    pub reply: Option<String>,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
}

// ---------------------------------------------------------------------------
// Bus internals
// ---------------------------------------------------------------------------

struct SubEntry {
    id: u64,
    pattern: String,
    tx: mpsc::UnboundedSender<BusMsg>,
    /// Messages sent but not yet received; surfaced as queue depth.
    depth: Arc<AtomicU64>,
}

struct BusInner {
    subs: RwLock<Vec<SubEntry>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// Handle to the broker. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    /// Creates a new, empty broker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subs: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Publishes a message, fire-and-forget.
    ///
    /// Non-blocking: delivery queues on each matching subscriber's
    /// channel. Subscribers that have gone away are pruned here.
    pub fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        self.publish_msg(BusMsg {
            subject: subject.to_string(),
            reply: None,
            payload,
        })
    }

    fn publish_msg(&self, msg: BusMsg) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(MeshpointError::Bus {
                reason: format!("publish on closed bus: {}", msg.subject),
            });
        }

        let subs = self
            .inner
            .subs
            .read()
            .map_err(|_| MeshpointError::Bus {
                reason: "subscriber table poisoned".into(),
            })?;

        let mut dead = false;
        for entry in subs.iter() {
            if !subject::matches(&entry.pattern, &msg.subject) {
                continue;
            }
            if entry.tx.send(msg.clone()).is_ok() {
                entry.depth.fetch_add(1, Ordering::Relaxed);
            } else {
                dead = true;
            }
        }
        drop(subs);

        if dead {
            if let Ok(mut subs) = self.inner.subs.write() {
                subs.retain(|e| !e.tx.is_closed());
            }
        }

        Ok(())
    }

    /// Publishes `payload` on `subject` and awaits one reply on a
    /// private inbox subject.
    ///
    /// Returns [`MeshpointError::Timeout`] when no reply arrives
    /// within `timeout`.
    pub async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let inbox = format!("_inbox.{}", uuid::Uuid::new_v4());
        let mut sub = self.subscribe(&inbox)?;

        self.publish_msg(BusMsg {
            subject: subject.to_string(),
            reply: Some(inbox),
            payload,
        })?;

        match tokio::time::timeout(timeout, sub.recv()).await {
            Ok(Some(msg)) => Ok(msg.payload),
            Ok(None) => Err(MeshpointError::Bus {
                reason: format!("bus closed awaiting reply on {subject}"),
            }),
            Err(_) => Err(MeshpointError::Timeout {
                reason: format!("request on {subject} after {timeout:?}"),
            }),
        }
    }

    /// Subscribes to a subject pattern (`*` matches one segment).
    pub fn subscribe(&self, pattern: &str) -> Result<Subscription> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(MeshpointError::Bus {
                reason: format!("subscribe on closed bus: {pattern}"),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicU64::new(0));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subs = self
            .inner
            .subs
            .write()
            .map_err(|_| MeshpointError::Bus {
                reason: "subscriber table poisoned".into(),
            })?;
        subs.push(SubEntry {
            id,
            pattern: pattern.to_string(),
            tx,
            depth: depth.clone(),
        });

        Ok(Subscription {
            rx,
            depth,
            id,
            bus: Arc::downgrade(&self.inner),
        })
    }

    /// Replies to `msg` when the publisher asked for one; no-op
    /// otherwise. Empty payload = ACK, non-empty = error text.
    pub fn respond(&self, msg: &BusMsg, payload: Vec<u8>) {
        if let Some(reply) = &msg.reply {
            if let Err(e) = self.publish(reply, payload) {
                tracing::warn!(subject = %msg.subject, %e, "failed to publish reply");
            }
        }
    }

    /// Closes the bus: all subscriber streams end, further publishes
    /// and subscribes fail.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        if let Ok(mut subs) = self.inner.subs.write() {
            subs.clear();
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<BusMsg>,
    depth: Arc<AtomicU64>,
    id: u64,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Receives the next message; `None` when the bus is closed.
    pub async fn recv(&mut self) -> Option<BusMsg> {
        let msg = self.rx.recv().await;
        if msg.is_some() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
        }
        msg
    }

    /// Messages queued behind this subscription right now.
    pub fn depth(&self) -> u64 {
        self.depth.load(Ordering::Relaxed)
    }

    /// Shared handle to the depth counter, for observers that outlive
    /// the move of the subscription into its handler task.
    pub fn depth_handle(&self) -> Arc<AtomicU64> {
        self.depth.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.bus.upgrade() {
            if let Ok(mut subs) = inner.subs.write() {
                subs.retain(|e| e.id != self.id);
            }
        }
    }
}
