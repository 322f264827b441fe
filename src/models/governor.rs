use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CooldownState {
    pub last_interaction_at: Option<DateTime<Utc>>,
}

/// Daily active window. An unset start counts as already reached; an unset
/// stop means no window has been opened yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeWindow {
    pub window_start_at: Option<DateTime<Utc>>,
    pub window_stop_at: Option<DateTime<Utc>>,
}
