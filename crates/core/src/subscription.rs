use serde::{Deserialize, Serialize};

/// An EventSub subscription as reported by the upstream API.
///
/// Upstream is the only source of truth; nothing here is persisted locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub event_type: String,
    pub callback_url: String,
    pub broadcaster_id: String,
    pub status: String,
}

impl Subscription {
    /// Whether the subscription already delivers to `callback_url`.
    pub fn delivers_to(&self, callback_url: &str) -> bool {
        self.callback_url == callback_url
    }

    /// Whether the subscription delivers `event_type` for `broadcaster_id`.
    pub fn covers(&self, event_type: &str, broadcaster_id: &str) -> bool {
        self.event_type == event_type && self.broadcaster_id == broadcaster_id
    }
}

/// A broadcaster whose `stream.online` events the service relays.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchedBroadcaster {
    pub broadcaster_id: String,
}

impl WatchedBroadcaster {
    pub fn new(broadcaster_id: impl Into<String>) -> Self {
        Self {
            broadcaster_id: broadcaster_id.into(),
        }
    }
}
