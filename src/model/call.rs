use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallStatus {
    Start,
    Ended,
    Failed,
}

/// Body posted to `/call/createCall` and `/call/updateCall` (spec §3 Call,
/// §4.B). Field set and casing match `original_source`'s `CallParams`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallParams {
    pub from: String,
    pub to: String,
    pub status: CallStatus,
    pub direction: Direction,
    pub user_id: i64,
    pub workspace_id: i64,
    pub channel_id: String,
}

/// The platform-side record for one call leg (spec §3 Call).
#[derive(Debug, Clone)]
pub struct Call {
    pub call_id: i64,
    pub started: DateTime<Utc>,
    pub ended: Option<DateTime<Utc>>,
    pub channel_id: String,
    pub params: CallParams,
}

impl Call {
    pub fn new(call_id: i64, channel_id: impl Into<String>, params: CallParams, started: DateTime<Utc>) -> Self {
        Self {
            call_id,
            started,
            ended: None,
            channel_id: channel_id.into(),
            params,
        }
    }

    /// Sets `ended`, enforcing the invariant that it is set only once and
    /// only after `started`.
    pub fn mark_ended(&mut self, ended: DateTime<Utc>) {
        if self.ended.is_none() && ended >= self.started {
            self.ended = Some(ended);
        }
    }
}
