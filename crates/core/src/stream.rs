use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const CHANNEL_BASE_URL: &str = "https://twitch.tv";
const BOX_ART_BASE_URL: &str = "https://static-cdn.jtvnw.net/ttv-boxart";
const PROFILE_IMAGE_BASE_URL: &str = "https://static-cdn.jtvnw.net/jtv_user_pictures";

/// Live-stream metadata fetched at notification time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSnapshot {
    pub broadcaster_id: String,
    pub user_login: String,
    pub user_name: String,
    pub title: String,
    pub game_id: String,
    pub game_name: String,
    pub viewer_count: u64,
    pub started_at: DateTime<Utc>,
    pub thumbnail_url: String,
}

impl StreamSnapshot {
    /// Canonical channel link.
    pub fn channel_url(&self) -> String {
        let login = if self.user_login.is_empty() {
            self.user_name.to_lowercase()
        } else {
            self.user_login.clone()
        };
        format!("{CHANNEL_BASE_URL}/{login}")
    }

    /// Preview image with the size placeholders filled in.
    ///
    /// The upstream CDN caches previews aggressively, so `cache_buster` is
    /// appended as a query parameter to get a fresh frame.
    pub fn preview_url(&self, width: u32, height: u32, cache_buster: i64) -> String {
        let base = self
            .thumbnail_url
            .replace("{width}", &width.to_string())
            .replace("{height}", &height.to_string());
        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{base}{separator}t={cache_buster}")
    }

    /// Box art for the current category, if any.
    pub fn box_art_url(&self) -> Option<String> {
        if self.game_id.is_empty() {
            return None;
        }
        Some(format!("{BOX_ART_BASE_URL}/{}-144x192.jpg", self.game_id))
    }

    /// 70x70 profile picture of the broadcaster.
    pub fn profile_image_url(&self) -> Option<String> {
        if self.broadcaster_id.is_empty() {
            return None;
        }
        Some(format!(
            "{PROFILE_IMAGE_BASE_URL}/{}-profile_image-70x70.png",
            self.broadcaster_id
        ))
    }
}
