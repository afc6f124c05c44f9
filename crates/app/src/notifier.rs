use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use thiserror::Error;
use tracing::{error, info, warn};

use live_notifier_core::{stream_online_message, StreamSnapshot};
use live_notifier_discord::{MessageSender, SendError};
use live_notifier_twitch::{HelixClient, HelixError, TokenError, TokenProvider};

/// Resolves a broadcaster to its current live stream.
#[derive(Clone)]
pub struct StreamInfoFetcher {
    helix: HelixClient,
    tokens: TokenProvider,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to obtain access token: {0}")]
    Token(#[from] TokenError),
    #[error("stream lookup failed: {0}")]
    Helix(#[from] HelixError),
}

impl StreamInfoFetcher {
    pub fn new(helix: HelixClient, tokens: TokenProvider) -> Self {
        Self { helix, tokens }
    }

    /// Returns `Ok(None)` when the broadcaster is not live.
    ///
    /// A 401 from upstream drops the cached token and retries once with a
    /// freshly exchanged one.
    pub async fn fetch(&self, broadcaster_id: &str) -> Result<Option<StreamSnapshot>, FetchError> {
        let token = self.tokens.token().await?;
        let stream = match self.helix.get_stream(token.secret(), broadcaster_id).await {
            Err(err) if err.is_unauthorized() => {
                warn!(stage = "notify", %broadcaster_id, "stream lookup unauthorized; refreshing token");
                self.tokens.invalidate().await;
                let token = self.tokens.token().await?;
                self.helix.get_stream(token.secret(), broadcaster_id).await?
            }
            other => other?,
        };

        Ok(stream.map(StreamSnapshot::from))
    }
}

/// Turns a stream snapshot into a rich message and posts it.
#[derive(Clone)]
pub struct NotificationDispatcher {
    sender: Arc<dyn MessageSender>,
    default_channel: String,
    clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

#[derive(Debug, Error)]
#[error("delivery to channel {channel_id} failed: {source}")]
pub struct DeliveryError {
    pub channel_id: String,
    #[source]
    pub source: SendError,
}

impl NotificationDispatcher {
    pub fn new(sender: Arc<dyn MessageSender>, default_channel: impl Into<String>) -> Self {
        Self {
            sender,
            default_channel: default_channel.into(),
            clock: Arc::new(Utc::now),
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.clock = clock;
        self
    }

    /// Sends the live notification for `snapshot`, falling back to the
    /// configured channel when `target_channel` is `None`.
    pub async fn dispatch(
        &self,
        snapshot: &StreamSnapshot,
        target_channel: Option<&str>,
    ) -> Result<(), DeliveryError> {
        let channel_id = target_channel.unwrap_or(self.default_channel.as_str());
        let message = stream_online_message(snapshot, (self.clock)());

        self.sender
            .send_rich_message(channel_id, &message)
            .await
            .map_err(|source| DeliveryError {
                channel_id: channel_id.to_string(),
                source,
            })
    }
}

/// Result of handling one `stream.online` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    Offline,
    FetchFailed,
    SendFailed,
}

impl NotifyOutcome {
    fn metric_label(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Offline => "offline",
            Self::FetchFailed => "fetch_failed",
            Self::SendFailed => "send_failed",
        }
    }
}

/// Fetch-then-dispatch pipeline run for each `stream.online` notification.
#[derive(Clone)]
pub struct LiveNotifier {
    fetcher: StreamInfoFetcher,
    dispatcher: NotificationDispatcher,
}

impl LiveNotifier {
    pub fn new(fetcher: StreamInfoFetcher, dispatcher: NotificationDispatcher) -> Self {
        Self {
            fetcher,
            dispatcher,
        }
    }

    /// Never fails; every failure is logged and counted.
    pub async fn notify_stream_online(&self, broadcaster_id: &str) -> NotifyOutcome {
        let outcome = self.run(broadcaster_id).await;
        counter!("notification_dispatch_total", "result" => outcome.metric_label()).increment(1);
        outcome
    }

    async fn run(&self, broadcaster_id: &str) -> NotifyOutcome {
        let snapshot = match self.fetcher.fetch(broadcaster_id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                info!(stage = "notify", %broadcaster_id, "broadcaster not live; skipping notification");
                return NotifyOutcome::Offline;
            }
            Err(err) => {
                error!(stage = "notify", %broadcaster_id, error = %err, "failed to fetch stream info");
                return NotifyOutcome::FetchFailed;
            }
        };

        match self.dispatcher.dispatch(&snapshot, None).await {
            Ok(()) => {
                info!(
                    stage = "notify",
                    %broadcaster_id,
                    user_name = %snapshot.user_name,
                    "live notification sent"
                );
                NotifyOutcome::Sent
            }
            Err(err) => {
                error!(stage = "notify", %broadcaster_id, error = %err, "failed to deliver live notification");
                NotifyOutcome::SendFailed
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use httpmock::prelude::*;
    use live_notifier_core::RichMessage;
    use live_notifier_twitch::{AccessToken, TwitchOAuthClient};
    use reqwest::StatusCode;
    use serde_json::json;
    use std::sync::Mutex;
    use url::Url;

    /// Sender that records every message instead of delivering it.
    #[derive(Default)]
    pub(crate) struct RecordingSender {
        sent: Mutex<Vec<(String, RichMessage)>>,
        fail_with: Option<StatusCode>,
    }

    impl RecordingSender {
        pub(crate) fn failing(status: StatusCode) -> Self {
            Self {
                sent: Mutex::default(),
                fail_with: Some(status),
            }
        }

        pub(crate) fn sent(&self) -> Vec<(String, RichMessage)> {
            self.sent.lock().expect("sender poisoned").clone()
        }
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        async fn send_rich_message(
            &self,
            channel_id: &str,
            message: &RichMessage,
        ) -> Result<(), SendError> {
            self.sent
                .lock()
                .expect("sender poisoned")
                .push((channel_id.to_string(), message.clone()));
            match self.fail_with {
                Some(status) => Err(SendError::Status {
                    status,
                    body: "rejected".into(),
                }),
                None => Ok(()),
            }
        }
    }

    pub(crate) fn twitch_clients(server: &MockServer) -> (HelixClient, TokenProvider) {
        let http = reqwest::Client::builder().build().expect("client");
        let oauth = TwitchOAuthClient::new(
            "client-id",
            "client-secret",
            Url::parse(&server.url("/oauth2/")).expect("url"),
            http.clone(),
        );
        let helix = HelixClient::new(
            "client-id",
            Url::parse(&server.url("/helix/")).expect("url"),
            http,
        );
        (helix, TokenProvider::new(oauth))
    }

    pub(crate) async fn mock_oauth(server: &MockServer) -> httpmock::Mock<'_> {
        server
            .mock_async(|when, then| {
                when.method(POST).path("/oauth2/token");
                then.status(200).json_body(json!({
                    "access_token": "app-token",
                    "expires_in": 3600,
                    "token_type": "bearer"
                }));
            })
            .await
    }

    pub(crate) fn live_stream_body() -> serde_json::Value {
        json!({
            "data": [{
                "id": "1",
                "user_id": "1337",
                "user_login": "cool_user",
                "user_name": "Cool_User",
                "game_id": "509658",
                "game_name": "Just Chatting",
                "title": "Hello chat",
                "viewer_count": 42,
                "started_at": "2024-01-01T10:00:00Z",
                "thumbnail_url": "https://static-cdn.jtvnw.net/previews-ttv/live_user_cool_user-{width}x{height}.jpg"
            }]
        })
    }

    fn snapshot() -> StreamSnapshot {
        StreamSnapshot {
            broadcaster_id: "1337".into(),
            user_login: "cool_user".into(),
            user_name: "Cool_User".into(),
            title: "Hello chat".into(),
            game_id: "509658".into(),
            game_name: "Just Chatting".into(),
            viewer_count: 42,
            started_at: "2024-01-01T10:00:00Z".parse().expect("timestamp"),
            thumbnail_url: "https://example.com/{width}x{height}.jpg".into(),
        }
    }

    #[tokio::test]
    async fn fetch_returns_none_for_offline_broadcaster() {
        let server = MockServer::start_async().await;
        mock_oauth(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/helix/streams")
                    .query_param("user_id", "1337")
                    .header("Authorization", "Bearer app-token")
                    .header("Client-Id", "client-id");
                then.status(200).json_body(json!({ "data": [] }));
            })
            .await;

        let (helix, tokens) = twitch_clients(&server);
        let fetched = StreamInfoFetcher::new(helix, tokens)
            .fetch("1337")
            .await
            .expect("fetch");
        assert!(fetched.is_none());
    }

    #[tokio::test]
    async fn fetch_refreshes_token_after_unauthorized() {
        let server = MockServer::start_async().await;
        let oauth = mock_oauth(&server).await;
        let rejected = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/helix/streams")
                    .header("Authorization", "Bearer stale-token");
                then.status(401).body("invalid oauth token");
            })
            .await;
        let accepted = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/helix/streams")
                    .header("Authorization", "Bearer app-token");
                then.status(200).json_body(live_stream_body());
            })
            .await;

        let (helix, tokens) = twitch_clients(&server);
        let far_future: DateTime<Utc> = "2099-01-01T00:00:00Z".parse().expect("timestamp");
        let tokens = tokens.with_token(AccessToken::new("stale-token", far_future));
        let fetched = StreamInfoFetcher::new(helix, tokens)
            .fetch("1337")
            .await
            .expect("fetch")
            .expect("live");

        assert_eq!(fetched.user_name, "Cool_User");
        rejected.assert_hits_async(1).await;
        accepted.assert_hits_async(1).await;
        oauth.assert_hits_async(1).await;
    }

    #[tokio::test]
    async fn fetch_surfaces_upstream_status() {
        let server = MockServer::start_async().await;
        mock_oauth(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/helix/streams");
                then.status(503).body("unavailable");
            })
            .await;

        let (helix, tokens) = twitch_clients(&server);
        let err = StreamInfoFetcher::new(helix, tokens)
            .fetch("1337")
            .await
            .expect_err("should fail");
        assert!(matches!(
            err,
            FetchError::Helix(ref inner) if inner.status() == Some(StatusCode::SERVICE_UNAVAILABLE)
        ));
    }

    #[tokio::test]
    async fn dispatch_uses_default_channel() {
        let sender = Arc::new(RecordingSender::default());
        let now: DateTime<Utc> = "2024-01-01T10:05:00Z".parse().expect("now");
        let dispatcher = NotificationDispatcher::new(sender.clone(), "default-channel")
            .with_clock(Arc::new(move || now));

        dispatcher.dispatch(&snapshot(), None).await.expect("dispatch");
        dispatcher
            .dispatch(&snapshot(), Some("override"))
            .await
            .expect("dispatch");

        let sent = sender.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "default-channel");
        assert_eq!(sent[1].0, "override");
        assert_eq!(sent[0].1.title.as_deref(), Some("🔴 Cool_User is live!"));
        assert_eq!(
            sent[0].1.thumbnail.as_ref().map(|media| media.url.as_str()),
            Some("https://static-cdn.jtvnw.net/ttv-boxart/509658-144x192.jpg")
        );
    }

    #[tokio::test]
    async fn dispatch_wraps_send_failure() {
        let sender = Arc::new(RecordingSender::failing(StatusCode::FORBIDDEN));
        let dispatcher = NotificationDispatcher::new(sender, "default-channel");

        let err = dispatcher
            .dispatch(&snapshot(), None)
            .await
            .expect_err("should fail");
        assert_eq!(err.channel_id, "default-channel");
        assert!(matches!(err.source, SendError::Status { status, .. } if status == StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn notifier_skips_dispatch_when_offline() {
        crate::telemetry::init_metrics().expect("metrics");
        let server = MockServer::start_async().await;
        mock_oauth(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/helix/streams");
                then.status(200).json_body(json!({ "data": [] }));
            })
            .await;

        let (helix, tokens) = twitch_clients(&server);
        let sender = Arc::new(RecordingSender::default());
        let notifier = LiveNotifier::new(
            StreamInfoFetcher::new(helix, tokens),
            NotificationDispatcher::new(sender.clone(), "default-channel"),
        );

        assert_eq!(notifier.notify_stream_online("1337").await, NotifyOutcome::Offline);
        assert!(sender.sent().is_empty());
    }

    #[tokio::test]
    async fn notifier_reports_send_failure() {
        crate::telemetry::init_metrics().expect("metrics");
        let server = MockServer::start_async().await;
        mock_oauth(&server).await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/helix/streams");
                then.status(200).json_body(live_stream_body());
            })
            .await;

        let (helix, tokens) = twitch_clients(&server);
        let sender = Arc::new(RecordingSender::failing(StatusCode::INTERNAL_SERVER_ERROR));
        let notifier = LiveNotifier::new(
            StreamInfoFetcher::new(helix, tokens),
            NotificationDispatcher::new(sender.clone(), "default-channel"),
        );

        assert_eq!(
            notifier.notify_stream_online("1337").await,
            NotifyOutcome::SendFailed
        );
        assert_eq!(sender.sent().len(), 1);
    }
}
