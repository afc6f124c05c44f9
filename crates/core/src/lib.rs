//! Domain types shared by the webhook ingress, the reconciler and the notifier.

pub mod envelope;
pub mod message;
pub mod notification;
pub mod signature;
pub mod stream;
pub mod subscription;

pub use envelope::{
    EventType, MessageType, NotificationPayload, RevocationPayload, VerificationPayload,
    WebhookEnvelope,
};
pub use message::{EmbedAuthor, EmbedField, EmbedFooter, EmbedMedia, RichMessage};
pub use notification::stream_online_message;
pub use stream::StreamSnapshot;
pub use subscription::{Subscription, WatchedBroadcaster};
