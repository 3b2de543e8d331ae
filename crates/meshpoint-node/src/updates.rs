//! Software-update state tracking.
//!
//! The actual file transfer is a device-transport concern; the core
//! tracks which devices have an update in flight and publishes
//! progress as points so the rest of the system (UI, rules) can see
//! it. The in-flight map has its own lock so update bookkeeping never
//! contends with the point write path.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use meshpoint_bus::subject;
use meshpoint_proto::encode_points;
use meshpoint_types::{MeshpointError, Result, SwUpdateState};

use crate::service::StoreService;

/// In-flight software updates, keyed by device node id.
#[derive(Default)]
pub(crate) struct UpdateTracker {
    in_flight: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl UpdateTracker {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, DateTime<Utc>>>> {
        self.in_flight.lock().map_err(|_| MeshpointError::Dispatch {
            reason: "update tracker lock poisoned".into(),
        })
    }
}

impl StoreService {
    /// Marks an update as started on a device and publishes the
    /// running state. Rejects a second start for the same device.
    pub fn start_update(&self, node_id: &str) -> Result<()> {
        {
            let mut updates = self.updates().lock()?;
            if updates.contains_key(node_id) {
                return Err(MeshpointError::Dispatch {
                    reason: format!("update already in progress for {node_id}"),
                });
            }
            updates.insert(node_id.to_string(), Utc::now());
        }

        let publish = self.publish_update_state(
            node_id,
            &SwUpdateState {
                running: true,
                ..SwUpdateState::default()
            },
        );
        if publish.is_err() {
            // arm for retry rather than wedging the device
            if let Ok(mut updates) = self.updates().lock() {
                updates.remove(node_id);
            }
        }
        publish
    }

    /// Publishes progress for an in-flight update.
    pub fn update_progress(&self, node_id: &str, percent_done: f64) -> Result<()> {
        if !self.updates().lock()?.contains_key(node_id) {
            return Err(MeshpointError::NotFound {
                reason: format!("no update in progress for {node_id}"),
            });
        }
        self.publish_update_state(
            node_id,
            &SwUpdateState {
                running: true,
                percent_done,
                ..SwUpdateState::default()
            },
        )
    }

    /// Marks an update as finished (successfully or not) and
    /// publishes the final state.
    pub fn finish_update(&self, node_id: &str, error: Option<&str>) -> Result<()> {
        self.updates().lock()?.remove(node_id);

        let state = match error {
            Some(e) => SwUpdateState {
                running: false,
                error: e.to_string(),
                percent_done: 0.0,
            },
            None => SwUpdateState {
                running: false,
                error: String::new(),
                percent_done: 100.0,
            },
        };
        self.publish_update_state(node_id, &state)
    }

    fn publish_update_state(&self, node_id: &str, state: &SwUpdateState) -> Result<()> {
        let points = state.to_points(Utc::now());
        self.bus()
            .publish(&subject::node_points(node_id), encode_points(&points))
    }
}
