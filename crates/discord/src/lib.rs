//! Outbound delivery of rich messages to Discord channels.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use live_notifier_core::RichMessage;

/// Messaging collaborator able to post a rich message into a channel.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_rich_message(
        &self,
        channel_id: &str,
        message: &RichMessage,
    ) -> Result<(), SendError>;
}

/// Bot-authenticated client for the Discord REST API.
#[derive(Clone)]
pub struct DiscordClient {
    http: Client,
    base_url: Url,
    bot_token: String,
}

impl DiscordClient {
    pub fn new(bot_token: impl Into<String>, base_url: Url, http: Client) -> Self {
        Self {
            http,
            base_url,
            bot_token: bot_token.into(),
        }
    }
}

#[async_trait]
impl MessageSender for DiscordClient {
    async fn send_rich_message(
        &self,
        channel_id: &str,
        message: &RichMessage,
    ) -> Result<(), SendError> {
        if channel_id.trim().is_empty() {
            return Err(SendError::MissingChannel);
        }

        let url = self
            .base_url
            .join(&format!("channels/{channel_id}/messages"))?;
        let response = self
            .http
            .post(url)
            .header("Authorization", format!("Bot {}", self.bot_token))
            .json(&CreateMessage {
                embeds: [message],
            })
            .send()
            .await?;

        ensure_success(response).await
    }
}

#[derive(Serialize)]
struct CreateMessage<'a> {
    embeds: [&'a RichMessage; 1],
}

/// Errors produced while delivering a message.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("no target channel configured")]
    MissingChannel,
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
}

async fn ensure_success(response: Response) -> Result<(), SendError> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<unavailable>"));
        return Err(SendError::Status { status, body });
    }
    Ok(())
}
