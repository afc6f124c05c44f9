use chrono::{DateTime, Utc};
use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use live_notifier_core::{StreamSnapshot, Subscription};

const EVENTSUB_PATH: &str = "eventsub/subscriptions";
const STREAMS_PATH: &str = "streams";
const MAX_LIST_PAGES: usize = 50;

/// Client for the Helix endpoints behind EventSub management and stream lookups.
#[derive(Clone)]
pub struct HelixClient {
    http: Client,
    base_url: Url,
    client_id: String,
}

impl HelixClient {
    /// Creates a new Helix client with the provided configuration.
    pub fn new(client_id: impl Into<String>, base_url: Url, http: Client) -> Self {
        Self {
            http,
            base_url,
            client_id: client_id.into(),
        }
    }

    /// Fetches one page of EventSub subscriptions.
    pub async fn list_eventsub_subscriptions(
        &self,
        access_token: &str,
        params: &ListSubscriptionsParams<'_>,
    ) -> Result<SubscriptionPage, HelixError> {
        let url = self.base_url.join(EVENTSUB_PATH)?;
        let response = self
            .authorized_request(Method::GET, url, access_token)
            .query(&params.query_pairs())
            .send()
            .await?;

        parse_json::<SubscriptionListResponse>(response)
            .await
            .map(SubscriptionPage::from)
    }

    /// Lists every subscription matching `filter`, following the pagination
    /// cursor until upstream stops returning one.
    pub async fn list_all_eventsub_subscriptions(
        &self,
        access_token: &str,
        filter: SubscriptionFilter<'_>,
    ) -> Result<Vec<Subscription>, HelixError> {
        let mut subscriptions = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let page = self
                .list_eventsub_subscriptions(
                    access_token,
                    &ListSubscriptionsParams {
                        filter,
                        after: cursor.as_deref(),
                    },
                )
                .await?;

            subscriptions.extend(page.data);
            match page.cursor {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        Ok(subscriptions)
    }

    /// Creates a webhook subscription and returns the (pending) result.
    pub async fn create_eventsub_subscription(
        &self,
        access_token: &str,
        request: &CreateSubscriptionRequest<'_>,
    ) -> Result<Subscription, HelixError> {
        let url = self.base_url.join(EVENTSUB_PATH)?;
        let body = CreateSubscriptionBody {
            kind: request.event_type,
            version: request.version,
            condition: Condition {
                broadcaster_user_id: request.broadcaster_id,
            },
            transport: WebhookTransport {
                method: "webhook",
                callback: request.callback,
                secret: request.secret,
            },
        };

        let response = self
            .authorized_request(Method::POST, url, access_token)
            .json(&body)
            .send()
            .await?;

        let created = parse_json::<SubscriptionListResponse>(response).await?;
        created
            .data
            .into_iter()
            .next()
            .map(Subscription::from)
            .ok_or(HelixError::EmptyResponse)
    }

    /// Deletes a subscription by id.
    pub async fn delete_eventsub_subscription(
        &self,
        access_token: &str,
        subscription_id: &str,
    ) -> Result<(), HelixError> {
        let mut url = self.base_url.join(EVENTSUB_PATH)?;
        url.query_pairs_mut().append_pair("id", subscription_id);

        let response = self
            .authorized_request(Method::DELETE, url, access_token)
            .send()
            .await?;

        ensure_success(response).await
    }

    /// Looks up the live stream of `user_id`; `None` means the user is offline.
    pub async fn get_stream(
        &self,
        access_token: &str,
        user_id: &str,
    ) -> Result<Option<HelixStream>, HelixError> {
        let mut url = self.base_url.join(STREAMS_PATH)?;
        url.query_pairs_mut().append_pair("user_id", user_id);

        let response = self
            .authorized_request(Method::GET, url, access_token)
            .send()
            .await?;

        let streams = parse_json::<StreamListResponse>(response).await?;
        Ok(streams.data.into_iter().next())
    }

    fn authorized_request(
        &self,
        method: Method,
        url: Url,
        access_token: &str,
    ) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("Client-Id", &self.client_id)
            .header("Authorization", format!("Bearer {access_token}"))
    }
}

/// Query filter for listing subscriptions. Helix accepts at most one per request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionFilter<'a> {
    #[default]
    All,
    Type(&'a str),
    UserId(&'a str),
    Status(&'a str),
}

#[derive(Debug, Default)]
pub struct ListSubscriptionsParams<'a> {
    pub filter: SubscriptionFilter<'a>,
    pub after: Option<&'a str>,
}

impl<'a> ListSubscriptionsParams<'a> {
    fn query_pairs(&self) -> Vec<(&'static str, &'a str)> {
        let mut pairs = Vec::with_capacity(2);
        match self.filter {
            SubscriptionFilter::All => {}
            SubscriptionFilter::Type(event_type) => pairs.push(("type", event_type)),
            SubscriptionFilter::UserId(user_id) => pairs.push(("user_id", user_id)),
            SubscriptionFilter::Status(status) => pairs.push(("status", status)),
        }
        if let Some(after) = self.after {
            pairs.push(("after", after));
        }
        pairs
    }
}

/// Parameters for creating a webhook subscription.
pub struct CreateSubscriptionRequest<'a> {
    pub event_type: &'a str,
    pub version: &'a str,
    pub broadcaster_id: &'a str,
    pub callback: &'a str,
    pub secret: &'a str,
}

#[derive(Serialize)]
struct CreateSubscriptionBody<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    version: &'a str,
    condition: Condition<'a>,
    transport: WebhookTransport<'a>,
}

#[derive(Serialize)]
struct Condition<'a> {
    broadcaster_user_id: &'a str,
}

#[derive(Serialize)]
struct WebhookTransport<'a> {
    method: &'a str,
    callback: &'a str,
    secret: &'a str,
}

/// Page of subscription results.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionPage {
    pub data: Vec<Subscription>,
    pub total: u64,
    pub cursor: Option<String>,
}

impl From<SubscriptionListResponse> for SubscriptionPage {
    fn from(value: SubscriptionListResponse) -> Self {
        Self {
            data: value.data.into_iter().map(Subscription::from).collect(),
            total: value.total,
            cursor: value.pagination.and_then(|p| p.cursor),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SubscriptionListResponse {
    data: Vec<HelixSubscription>,
    #[serde(default)]
    total: u64,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Deserialize)]
struct Pagination {
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct HelixSubscription {
    id: String,
    #[serde(default)]
    status: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    condition: HelixCondition,
    #[serde(default)]
    transport: HelixTransport,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct HelixCondition {
    #[serde(default)]
    broadcaster_user_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct HelixTransport {
    #[serde(default)]
    callback: String,
}

impl From<HelixSubscription> for Subscription {
    fn from(value: HelixSubscription) -> Self {
        Self {
            id: value.id,
            event_type: value.kind,
            callback_url: value.transport.callback,
            broadcaster_id: value.condition.broadcaster_user_id,
            status: value.status,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StreamListResponse {
    data: Vec<HelixStream>,
}

/// Representation of a single live stream.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HelixStream {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub user_login: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub game_id: String,
    #[serde(default)]
    pub game_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub viewer_count: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub thumbnail_url: String,
}

impl From<HelixStream> for StreamSnapshot {
    fn from(value: HelixStream) -> Self {
        Self {
            broadcaster_id: value.user_id,
            user_login: value.user_login,
            user_name: value.user_name,
            title: value.title,
            game_id: value.game_id,
            game_name: value.game_name,
            viewer_count: value.viewer_count,
            started_at: value.started_at,
            thumbnail_url: value.thumbnail_url,
        }
    }
}

/// Errors produced by the Helix client.
#[derive(Debug, Error)]
pub enum HelixError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("upstream returned an empty data array")]
    EmptyResponse,
}

impl HelixError {
    /// Upstream HTTP status, when the failure came from a response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.status() == Some(StatusCode::TOO_MANY_REQUESTS)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED)
    }
}

async fn ensure_success(response: Response) -> Result<(), HelixError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(HelixError::Status { status, body });
    }
    Ok(())
}

async fn parse_json<T>(response: Response) -> Result<T, HelixError>
where
    T: DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(HelixError::Status { status, body });
    }

    Ok(response.json().await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(base_url: &Url) -> HelixClient {
        HelixClient::new(
            "client-id",
            base_url.clone(),
            Client::builder().build().expect("client"),
        )
    }

    fn subscription_json(id: &str, callback: &str) -> serde_json::Value {
        json!({
            "id": id,
            "status": "enabled",
            "type": "stream.online",
            "version": "1",
            "condition": { "broadcaster_user_id": "1337" },
            "created_at": "2024-01-01T00:00:00Z",
            "transport": { "method": "webhook", "callback": callback },
            "cost": 1
        })
    }

    #[test]
    fn list_params_carry_one_filter() {
        let params = ListSubscriptionsParams {
            filter: SubscriptionFilter::UserId("1337"),
            after: Some("cursor-1"),
        };
        assert_eq!(
            params.query_pairs(),
            vec![("user_id", "1337"), ("after", "cursor-1")]
        );

        let by_type = ListSubscriptionsParams {
            filter: SubscriptionFilter::Type("stream.online"),
            after: None,
        };
        assert_eq!(by_type.query_pairs(), vec![("type", "stream.online")]);
        assert!(ListSubscriptionsParams::default().query_pairs().is_empty());
    }

    #[tokio::test]
    async fn list_subscriptions_sends_single_filter() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/helix/")).expect("url");
        let client = client(&base);

        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/helix/eventsub/subscriptions")
                    .query_param("user_id", "1337")
                    .header("Authorization", "Bearer token")
                    .header("Client-Id", "client-id");
                then.status(200).json_body(json!({
                    "data": [subscription_json("sub-1", "https://old.example.com/webhook")],
                    "total": 1,
                    "total_cost": 1,
                    "max_total_cost": 10000,
                    "pagination": {}
                }));
            })
            .await;

        let page = client
            .list_eventsub_subscriptions(
                "token",
                &ListSubscriptionsParams {
                    filter: SubscriptionFilter::UserId("1337"),
                    after: None,
                },
            )
            .await
            .expect("list subscriptions");
        mock.assert_async().await;

        assert_eq!(page.total, 1);
        assert!(page.cursor.is_none());
        assert_eq!(
            page.data,
            vec![Subscription {
                id: "sub-1".into(),
                event_type: "stream.online".into(),
                callback_url: "https://old.example.com/webhook".into(),
                broadcaster_id: "1337".into(),
                status: "enabled".into(),
            }]
        );
    }

    #[tokio::test]
    async fn list_all_follows_cursor() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/helix/")).expect("url");
        let client = client(&base);

        // Registered first so it claims the follow-up request.
        let second = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/helix/eventsub/subscriptions")
                    .query_param("after", "cursor-1");
                then.status(200).json_body(json!({
                    "data": [subscription_json("sub-2", "https://b.example.com/webhook")],
                    "total": 2,
                    "pagination": {}
                }));
            })
            .await;
        let first = server
            .mock_async(|when, then| {
                when.method(GET).path("/helix/eventsub/subscriptions");
                then.status(200).json_body(json!({
                    "data": [subscription_json("sub-1", "https://a.example.com/webhook")],
                    "total": 2,
                    "pagination": { "cursor": "cursor-1" }
                }));
            })
            .await;

        let all = client
            .list_all_eventsub_subscriptions("token", SubscriptionFilter::UserId("1337"))
            .await
            .expect("list all");
        first.assert_async().await;
        second.assert_async().await;

        let ids: Vec<&str> = all.iter().map(|sub| sub.id.as_str()).collect();
        assert_eq!(ids, vec!["sub-1", "sub-2"]);
    }

    #[tokio::test]
    async fn create_subscription_sends_webhook_transport() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/helix/")).expect("url");
        let client = client(&base);

        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/helix/eventsub/subscriptions")
                    .header("Authorization", "Bearer token")
                    .json_body(json!({
                        "type": "stream.online",
                        "version": "1",
                        "condition": { "broadcaster_user_id": "1337" },
                        "transport": {
                            "method": "webhook",
                            "callback": "https://new.example.com/webhook",
                            "secret": "0123456789abcdef"
                        }
                    }));
                then.status(202).json_body(json!({
                    "data": [subscription_json("sub-new", "https://new.example.com/webhook")],
                    "total": 1,
                    "total_cost": 1,
                    "max_total_cost": 10000
                }));
            })
            .await;

        let created = client
            .create_eventsub_subscription(
                "token",
                &CreateSubscriptionRequest {
                    event_type: "stream.online",
                    version: "1",
                    broadcaster_id: "1337",
                    callback: "https://new.example.com/webhook",
                    secret: "0123456789abcdef",
                },
            )
            .await
            .expect("create subscription");
        mock.assert_async().await;
        assert_eq!(created.id, "sub-new");
    }

    #[tokio::test]
    async fn delete_subscription_targets_id() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/helix/")).expect("url");
        let client = client(&base);

        let mock = server
            .mock_async(|when, then| {
                when.method(DELETE)
                    .path("/helix/eventsub/subscriptions")
                    .query_param("id", "sub-1");
                then.status(204);
            })
            .await;

        client
            .delete_eventsub_subscription("token", "sub-1")
            .await
            .expect("delete subscription");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn get_stream_returns_none_when_offline() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/helix/")).expect("url");
        let client = client(&base);

        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/helix/streams")
                    .query_param("user_id", "1337");
                then.status(200)
                    .json_body(json!({ "data": [], "pagination": {} }));
            })
            .await;

        let stream = client.get_stream("token", "1337").await.expect("streams");
        assert!(stream.is_none());
    }

    #[tokio::test]
    async fn get_stream_parses_live_stream() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/helix/")).expect("url");
        let client = client(&base);

        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/helix/streams")
                    .query_param("user_id", "1337");
                then.status(200).json_body(json!({
                    "data": [{
                        "id": "40952121085",
                        "user_id": "1337",
                        "user_login": "cool_user",
                        "user_name": "Cool_User",
                        "game_id": "509658",
                        "game_name": "Just Chatting",
                        "type": "live",
                        "title": "Hello",
                        "tags": [],
                        "viewer_count": 78365,
                        "started_at": "2024-01-01T10:00:00Z",
                        "language": "en",
                        "thumbnail_url": "https://static-cdn.jtvnw.net/previews-ttv/live_user_cool_user-{width}x{height}.jpg",
                        "is_mature": false
                    }],
                    "pagination": {}
                }));
            })
            .await;

        let stream = client
            .get_stream("token", "1337")
            .await
            .expect("streams")
            .expect("live stream");
        let snapshot = StreamSnapshot::from(stream);
        assert_eq!(snapshot.user_name, "Cool_User");
        assert_eq!(snapshot.viewer_count, 78365);
        assert_eq!(snapshot.started_at.to_rfc3339(), "2024-01-01T10:00:00+00:00");
    }

    #[tokio::test]
    async fn error_status_exposes_rate_limit() {
        let server = MockServer::start_async().await;
        let base = Url::parse(&server.url("/helix/")).expect("url");
        let client = client(&base);

        server
            .mock_async(|when, then| {
                when.method(GET).path("/helix/eventsub/subscriptions");
                then.status(429).body("too many requests");
            })
            .await;

        let err = client
            .list_eventsub_subscriptions("token", &ListSubscriptionsParams::default())
            .await
            .expect_err("should error");
        assert!(err.is_rate_limited());
        match err {
            HelixError::Status { status, body } => {
                assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
                assert_eq!(body, "too many requests");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
