pub mod config;

use std::{env, fmt, net::SocketAddr, num::ParseIntError};

pub use config::{AppConfig, ConfigError, DiscordSettings, Environment, TwitchSettings};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Loads environment variables from `.env` when available.
///
/// Missing files are ignored so the function is safe in production builds
/// where dotenv files are not deployed.
pub fn load_env_file() {
    let _ = dotenvy::dotenv();
}

/// Returns the address the HTTP server should bind to.
///
/// `APP_BIND_ADDR` takes precedence. Without it, a bare `PORT` binds every
/// interface on that port, and with neither set the server falls back to
/// [`DEFAULT_BIND_ADDR`].
pub fn server_bind_address() -> Result<SocketAddr, BindAddressError> {
    resolve_bind_address(|key| env::var(key).ok())
}

pub(crate) fn resolve_bind_address(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<SocketAddr, BindAddressError> {
    if let Some(addr) = lookup("APP_BIND_ADDR").filter(|value| !value.trim().is_empty()) {
        return addr.trim().parse().map_err(BindAddressError::Address);
    }

    if let Some(port) = lookup("PORT").filter(|value| !value.trim().is_empty()) {
        let port: u16 = port.trim().parse().map_err(BindAddressError::Port)?;
        return Ok(SocketAddr::from(([0, 0, 0, 0], port)));
    }

    DEFAULT_BIND_ADDR
        .parse()
        .map_err(BindAddressError::Address)
}

/// Errors produced while resolving the bind address.
#[derive(Debug)]
pub enum BindAddressError {
    Address(std::net::AddrParseError),
    Port(ParseIntError),
}

impl fmt::Display for BindAddressError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address(err) => write!(f, "invalid APP_BIND_ADDR value: {err}"),
            Self::Port(err) => write!(f, "invalid PORT value: {err}"),
        }
    }
}

impl std::error::Error for BindAddressError {}
