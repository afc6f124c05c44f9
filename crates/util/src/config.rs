use std::{env, fmt, net::SocketAddr, time::Duration};

use url::Url;

use super::{resolve_bind_address, BindAddressError};

const DEFAULT_TWITCH_OAUTH_BASE: &str = "https://id.twitch.tv/oauth2/";
const DEFAULT_TWITCH_HELIX_BASE: &str = "https://api.twitch.tv/helix/";
const DEFAULT_DISCORD_API_BASE: &str = "https://discord.com/api/v10/";
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;
const WEBHOOK_PATH: &str = "/webhook";

/// Application runtime environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_str(value: &str) -> Result<Self, ConfigError> {
        match value {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }

    /// Returns the canonical name used for logging/metrics labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Test => "test",
        }
    }
}

/// Credentials and endpoints for the Twitch side of the service.
#[derive(Clone)]
pub struct TwitchSettings {
    pub client_id: String,
    pub client_secret: String,
    pub webhook_secret: String,
    pub oauth_base_url: Url,
    pub helix_base_url: Url,
}

impl fmt::Debug for TwitchSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TwitchSettings")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("webhook_secret", &"<redacted>")
            .field("oauth_base_url", &self.oauth_base_url.as_str())
            .field("helix_base_url", &self.helix_base_url.as_str())
            .finish()
    }
}

/// Credentials and defaults for outbound Discord notifications.
#[derive(Clone)]
pub struct DiscordSettings {
    pub bot_token: String,
    pub notify_channel_id: String,
    pub api_base_url: Url,
}

impl fmt::Debug for DiscordSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordSettings")
            .field("bot_token", &"<redacted>")
            .field("notify_channel_id", &self.notify_channel_id)
            .field("api_base_url", &self.api_base_url.as_str())
            .finish()
    }
}

/// Runtime configuration resolved from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub environment: Environment,
    pub twitch: TwitchSettings,
    pub discord: DiscordSettings,
    pub broadcaster_ids: Vec<String>,
    pub callback_base_url: String,
    pub reconcile_interval: Option<Duration>,
    pub shutdown_grace: Duration,
}

impl AppConfig {
    /// Constructs the configuration by reading and validating environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`AppConfig::from_env`] but reads values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let env_value = get("APP_ENV").unwrap_or_else(|| "development".to_string());
        let environment = Environment::from_str(&env_value)?;
        let bind_addr = resolve_bind_address(&lookup).map_err(|err| match err {
            BindAddressError::Address(err) => ConfigError::BindAddress(err),
            BindAddressError::Port(err) => ConfigError::InvalidPort(err),
        })?;

        let mut missing = Vec::new();
        let mut required = |key: &'static str| {
            let value = get(key);
            if value.is_none() {
                missing.push(key);
            }
            value.unwrap_or_default()
        };

        let client_id = required("TWITCH_CLIENT_ID");
        let client_secret = required("TWITCH_CLIENT_SECRET");
        let webhook_secret = required("TWITCH_WEBHOOK_SECRET");
        let callback_base_url = required("CALLBACK_URL");
        let broadcaster_raw = required("TWITCH_BROADCASTER_IDS");
        let bot_token = required("DISCORD_BOT_TOKEN");
        let notify_channel_id = required("NOTIFY_CHANNEL_ID");

        let broadcaster_ids = parse_broadcaster_ids(&broadcaster_raw);
        if broadcaster_ids.is_empty() && !missing.contains(&"TWITCH_BROADCASTER_IDS") {
            missing.push("TWITCH_BROADCASTER_IDS");
        }

        if !missing.is_empty() {
            return Err(ConfigError::Missing(missing));
        }

        if !(10..=100).contains(&webhook_secret.len()) || !webhook_secret.is_ascii() {
            return Err(ConfigError::InvalidWebhookSecret);
        }

        Url::parse(&callback_base_url).map_err(|source| ConfigError::InvalidUrl {
            var: "CALLBACK_URL",
            source,
        })?;
        let callback_base_url = callback_base_url.trim_end_matches('/').to_string();

        let twitch = TwitchSettings {
            client_id,
            client_secret,
            webhook_secret,
            oauth_base_url: base_url(
                get("TWITCH_OAUTH_BASE_URL"),
                "TWITCH_OAUTH_BASE_URL",
                DEFAULT_TWITCH_OAUTH_BASE,
            )?,
            helix_base_url: base_url(
                get("TWITCH_HELIX_BASE_URL"),
                "TWITCH_HELIX_BASE_URL",
                DEFAULT_TWITCH_HELIX_BASE,
            )?,
        };

        let discord = DiscordSettings {
            bot_token,
            notify_channel_id,
            api_base_url: base_url(
                get("DISCORD_API_BASE_URL"),
                "DISCORD_API_BASE_URL",
                DEFAULT_DISCORD_API_BASE,
            )?,
        };

        let reconcile_interval = match get("RECONCILE_INTERVAL_SECS") {
            Some(raw) => match parse_secs(&raw, "RECONCILE_INTERVAL_SECS")? {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            None => None,
        };

        let shutdown_grace = match get("SHUTDOWN_GRACE_SECS") {
            Some(raw) => Duration::from_secs(parse_secs(&raw, "SHUTDOWN_GRACE_SECS")?),
            None => Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
        };

        Ok(Self {
            bind_addr,
            environment,
            twitch,
            discord,
            broadcaster_ids,
            callback_base_url,
            reconcile_interval,
            shutdown_grace,
        })
    }

    /// Public callback URL the upstream platform should deliver webhooks to.
    pub fn callback_url(&self) -> String {
        format!("{}{}", self.callback_base_url, WEBHOOK_PATH)
    }
}

fn parse_broadcaster_ids(raw: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for id in raw.split(',').map(str::trim).filter(|id| !id.is_empty()) {
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

fn base_url(
    value: Option<String>,
    var: &'static str,
    default: &str,
) -> Result<Url, ConfigError> {
    let mut raw = value.unwrap_or_else(|| default.to_string());
    if !raw.ends_with('/') {
        raw.push('/');
    }
    Url::parse(&raw).map_err(|source| ConfigError::InvalidUrl { var, source })
}

fn parse_secs(raw: &str, var: &'static str) -> Result<u64, ConfigError> {
    raw.parse()
        .map_err(|source| ConfigError::InvalidNumber { var, source })
}

/// Errors that can occur during configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Missing(Vec<&'static str>),
    InvalidEnvironment(String),
    BindAddress(std::net::AddrParseError),
    InvalidPort(std::num::ParseIntError),
    InvalidUrl {
        var: &'static str,
        source: url::ParseError,
    },
    InvalidNumber {
        var: &'static str,
        source: std::num::ParseIntError,
    },
    InvalidWebhookSecret,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing(vars) => write!(
                f,
                "missing required environment variables: {}",
                vars.join(", ")
            ),
            Self::InvalidEnvironment(value) => write!(
                f,
                "APP_ENV must be one of 'development', 'production', or 'test' (got {value})"
            ),
            Self::BindAddress(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::InvalidPort(err) => write!(f, "invalid PORT value: {err}"),
            Self::InvalidUrl { var, source } => write!(f, "invalid {var} value: {source}"),
            Self::InvalidNumber { var, source } => write!(f, "invalid {var} value: {source}"),
            Self::InvalidWebhookSecret => write!(
                f,
                "TWITCH_WEBHOOK_SECRET must be between 10 and 100 ASCII characters"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}
