use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters for debugging a streaming session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStats {
    pub buffers_submitted: u64,
    pub buffers_completed: u64,
    /// Prepares or submissions the device rejected and that were dropped.
    pub buffers_dropped: u64,
    pub samples_transferred: u64,
    /// Wakeups where the expected slot had not completed.
    pub out_of_order_events: u64,
    pub started_at: Option<DateTime<Utc>>,
}

impl StreamStats {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
