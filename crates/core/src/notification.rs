use chrono::{DateTime, SecondsFormat, Utc};

use crate::message::{EmbedAuthor, EmbedField, EmbedFooter, EmbedMedia, RichMessage};
use crate::stream::StreamSnapshot;

pub const TWITCH_PURPLE: u32 = 0x9146FF;
pub const PREVIEW_WIDTH: u32 = 440;
pub const PREVIEW_HEIGHT: u32 = 248;
const FOOTER_TEXT: &str = "Live on Twitch";
const TWITCH_ICON: &str = "https://static.twitchcdn.net/assets/favicon-32-e29e246c157142c94346.png";
const EMPTY_FIELD: &str = "—";

/// Builds the "stream went live" message for `stream`.
///
/// `now` only feeds the preview cache-buster; the rest of the message is a
/// pure function of the snapshot.
pub fn stream_online_message(stream: &StreamSnapshot, now: DateTime<Utc>) -> RichMessage {
    let channel_url = stream.channel_url();

    RichMessage {
        title: Some(format!("🔴 {} is live!", stream.user_name)),
        description: None,
        url: Some(channel_url.clone()),
        color: Some(TWITCH_PURPLE),
        author: Some(EmbedAuthor {
            name: stream.user_name.clone(),
            url: Some(channel_url),
            icon_url: Some(
                stream
                    .profile_image_url()
                    .unwrap_or_else(|| TWITCH_ICON.into()),
            ),
        }),
        thumbnail: stream.box_art_url().map(|url| EmbedMedia {
            url,
            width: None,
            height: None,
        }),
        image: Some(EmbedMedia {
            url: stream.preview_url(PREVIEW_WIDTH, PREVIEW_HEIGHT, now.timestamp()),
            width: Some(PREVIEW_WIDTH),
            height: Some(PREVIEW_HEIGHT),
        }),
        fields: vec![
            EmbedField {
                name: "Title".into(),
                value: non_empty(&stream.title),
                inline: false,
            },
            EmbedField {
                name: "Game".into(),
                value: non_empty(&stream.game_name),
                inline: true,
            },
            EmbedField {
                name: "Viewers".into(),
                value: stream.viewer_count.to_string(),
                inline: true,
            },
        ],
        timestamp: Some(stream.started_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        footer: Some(EmbedFooter {
            text: FOOTER_TEXT.into(),
            icon_url: Some(TWITCH_ICON.into()),
        }),
    }
}

fn non_empty(value: &str) -> String {
    if value.trim().is_empty() {
        EMPTY_FIELD.to_string()
    } else {
        value.to_string()
    }
}
