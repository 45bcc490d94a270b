//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroUsize, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{CliArgs, Command, LoggingOverrides, ServeArgs, ServeOverrides, WarmArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "tessera";
const ENV_PREFIX: &str = "TESSERA";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CACHE_MAX_ENTRIES: usize = 10_000;
const DEFAULT_WEBSOCKET_PATH: &str = "/_reactive/ws";
const DEFAULT_ACTION_PATH_PREFIX: &str = "/_reactive/actions";
const DEFAULT_MAX_PAYLOAD_BYTES: usize = 64 * 1024;
const DEFAULT_MAX_PENDING_COMPONENTS: usize = 64;
const DEFAULT_WARMER_BATCH_SIZE: usize = 8;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub reactive: ReactiveSettings,
    pub warmer: WarmerSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    /// `0` leaves the store unbounded.
    pub max_entries: usize,
    pub default_ttl: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ReactiveSettings {
    pub websocket_path: String,
    pub action_path_prefix: String,
    pub enable_http_fallback: bool,
    pub max_payload_bytes: usize,
    /// Cap on unresolved component ids reserved per session.
    pub max_pending_components: usize,
}

#[derive(Debug, Clone)]
pub struct WarmerSettings {
    pub batch_size: NonZeroUsize,
    pub warm_on_startup: bool,
    pub ttl: Option<Duration>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Warm(args)) => raw.apply_warm_overrides(args),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    reactive: RawReactiveSettings,
    warmer: RawWarmerSettings,
}

impl RawSettings {
    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_logging_overrides(&overrides.logging);
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(max) = overrides.cache_max_entries {
            self.cache.max_entries = Some(max);
        }
        if let Some(enabled) = overrides.enable_http_fallback {
            self.reactive.enable_http_fallback = Some(enabled);
        }
        if let Some(warm) = overrides.warm_on_startup {
            self.warmer.warm_on_startup = Some(warm);
        }
    }

    fn apply_warm_overrides(&mut self, args: &WarmArgs) {
        self.apply_logging_overrides(&args.logging);
        if let Some(batch_size) = args.batch_size {
            self.warmer.batch_size = Some(batch_size);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            reactive,
            warmer,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            cache: build_cache_settings(cache)?,
            reactive: build_reactive_settings(reactive)?,
            warmer: build_warmer_settings(warmer)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        max_entries: cache.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
        default_ttl: optional_ttl(cache.default_ttl_seconds, "cache.default_ttl_seconds")?,
    })
}

fn build_reactive_settings(reactive: RawReactiveSettings) -> Result<ReactiveSettings, LoadError> {
    let websocket_path = route_path(
        reactive.websocket_path,
        DEFAULT_WEBSOCKET_PATH,
        "reactive.websocket_path",
    )?;
    let action_path_prefix = route_path(
        reactive.action_path_prefix,
        DEFAULT_ACTION_PATH_PREFIX,
        "reactive.action_path_prefix",
    )?;
    if websocket_path == action_path_prefix {
        return Err(LoadError::invalid(
            "reactive.action_path_prefix",
            "must differ from reactive.websocket_path",
        ));
    }

    let max_payload_bytes = reactive
        .max_payload_bytes
        .unwrap_or(DEFAULT_MAX_PAYLOAD_BYTES);
    if max_payload_bytes == 0 {
        return Err(LoadError::invalid(
            "reactive.max_payload_bytes",
            "must be greater than zero",
        ));
    }

    let max_pending_components = reactive
        .max_pending_components
        .unwrap_or(DEFAULT_MAX_PENDING_COMPONENTS);
    if max_pending_components == 0 {
        return Err(LoadError::invalid(
            "reactive.max_pending_components",
            "must be greater than zero",
        ));
    }

    Ok(ReactiveSettings {
        websocket_path,
        action_path_prefix,
        enable_http_fallback: reactive.enable_http_fallback.unwrap_or(true),
        max_payload_bytes,
        max_pending_components,
    })
}

fn build_warmer_settings(warmer: RawWarmerSettings) -> Result<WarmerSettings, LoadError> {
    let batch_size = NonZeroUsize::new(warmer.batch_size.unwrap_or(DEFAULT_WARMER_BATCH_SIZE))
        .ok_or_else(|| LoadError::invalid("warmer.batch_size", "must be greater than zero"))?;

    Ok(WarmerSettings {
        batch_size,
        warm_on_startup: warmer.warm_on_startup.unwrap_or(true),
        ttl: optional_ttl(warmer.ttl_seconds, "warmer.ttl_seconds")?,
    })
}

fn route_path(
    value: Option<String>,
    default: &str,
    key: &'static str,
) -> Result<String, LoadError> {
    let path = value.unwrap_or_else(|| default.to_string());
    let path = path.trim();
    if !path.starts_with('/') {
        return Err(LoadError::invalid(key, "path must start with `/`"));
    }
    let trimmed = path.trim_end_matches('/');
    Ok(if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    })
}

/// `None` and `0` both mean "never expires".
fn optional_ttl(seconds: Option<u64>, key: &'static str) -> Result<Option<Duration>, LoadError> {
    match seconds {
        None | Some(0) => Ok(None),
        Some(seconds) if seconds > u64::from(u32::MAX) => {
            Err(LoadError::invalid(key, "ttl exceeds supported range"))
        }
        Some(seconds) => Ok(Some(Duration::from_secs(seconds))),
    }
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    max_entries: Option<usize>,
    default_ttl_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawReactiveSettings {
    websocket_path: Option<String>,
    action_path_prefix: Option<String>,
    enable_http_fallback: Option<bool>,
    max_payload_bytes: Option<usize>,
    max_pending_components: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWarmerSettings {
    batch_size: Option<usize>,
    warm_on_startup: Option<bool>,
    ttl_seconds: Option<u64>,
}

#[cfg(test)]
mod tests;
