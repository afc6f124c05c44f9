use std::fmt;

use serde::Deserialize;

use crate::signature;

pub const HEADER_MESSAGE_ID: &str = "Twitch-Eventsub-Message-Id";
pub const HEADER_TIMESTAMP: &str = "Twitch-Eventsub-Message-Timestamp";
pub const HEADER_SIGNATURE: &str = "Twitch-Eventsub-Message-Signature";
pub const HEADER_MESSAGE_TYPE: &str = "Twitch-Eventsub-Message-Type";

/// Discriminator carried by the message-type header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    Verification,
    Notification,
    Revocation,
    Unknown(String),
}

impl MessageType {
    pub fn from_header(value: &str) -> Self {
        match value {
            "webhook_callback_verification" => Self::Verification,
            "notification" => Self::Notification,
            "revocation" => Self::Revocation,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Verification => "verification",
            Self::Notification => "notification",
            Self::Revocation => "revocation",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// One inbound delivery, borrowed from the HTTP request for the duration of
/// its handling.
#[derive(Debug, Clone)]
pub struct WebhookEnvelope<'a> {
    pub message_type: MessageType,
    pub message_id: &'a str,
    pub timestamp: &'a str,
    pub signature: &'a str,
    pub raw_body: &'a [u8],
}

impl<'a> WebhookEnvelope<'a> {
    pub fn new(
        message_type: &'a str,
        message_id: &'a str,
        timestamp: &'a str,
        signature: &'a str,
        raw_body: &'a [u8],
    ) -> Self {
        Self {
            message_type: MessageType::from_header(message_type),
            message_id,
            timestamp,
            signature,
            raw_body,
        }
    }

    /// Returns `true` when the delivery was signed with `secret`.
    pub fn is_authentic(&self, secret: &[u8]) -> bool {
        signature::verify(
            self.message_id,
            self.timestamp,
            self.raw_body,
            self.signature,
            secret,
        )
    }
}

/// EventSub subscription types this service knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    StreamOnline,
    StreamOffline,
    Other(String),
}

impl EventType {
    pub const STREAM_ONLINE: &'static str = "stream.online";
    pub const STREAM_OFFLINE: &'static str = "stream.offline";

    pub fn parse(value: &str) -> Self {
        match value {
            Self::STREAM_ONLINE => Self::StreamOnline,
            Self::STREAM_OFFLINE => Self::StreamOffline,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::StreamOnline => Self::STREAM_ONLINE,
            Self::StreamOffline => Self::STREAM_OFFLINE,
            Self::Other(value) => value,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a `webhook_callback_verification` delivery.
#[derive(Debug, Clone, Deserialize)]
pub struct VerificationPayload {
    pub challenge: String,
}

/// Body of a `notification` delivery.
///
/// Only `subscription.type` is mandatory; event fields default to empty so
/// that notifications for other subscription types still parse.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationPayload {
    pub subscription: NotificationSubscription,
    #[serde(default)]
    pub event: StreamEvent,
}

impl NotificationPayload {
    pub fn event_type(&self) -> EventType {
        EventType::parse(&self.subscription.kind)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationSubscription {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub broadcaster_user_id: String,
    #[serde(default)]
    pub broadcaster_user_name: String,
    #[serde(default)]
    pub started_at: String,
}

/// Body of a `revocation` delivery.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RevocationPayload {
    #[serde(default)]
    pub subscription: RevokedSubscription,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RevokedSubscription {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub status: String,
}
