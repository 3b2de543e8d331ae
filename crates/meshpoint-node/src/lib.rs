//! The Meshpoint store service.
//!
//! [`StoreService`] owns the persistent store and is the *only*
//! writer to it. It subscribes to every core bus subject, funnels all
//! mutations through one lock so the store sees a linear history, and
//! drives the parts that react to change:
//!
//! - **Upstream propagation** — every point write walks root-ward,
//!   re-evaluating ancestor rules and feeding time-series sinks.
//! - **Rule engine** — condition evaluation with sustain timing,
//!   edge-triggered action dispatch with repeat-period rate limiting.
//! - **Notification fan-out** — tree walks that discover target users
//!   and the message services able to reach them.
//! - **Schedule sweeper** — a periodic pass injecting synthetic
//!   trigger points so time-windowed conditions advance on their own.
//!
//! The service is an injected dependency, never module-level state:
//! tests instantiate several isolated instances side by side.

mod auth;
mod metrics;
mod notify;
mod propagate;
pub mod rules;
mod schedule;
mod service;
mod updates;

pub use auth::{TokenIssuer, UuidTokener};
pub use notify::{LogGateway, MsgGateway};
pub use propagate::{LogSink, PointSink};
pub use service::{ServiceHandle, StoreService};
