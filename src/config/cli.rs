use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the Tessera binary.
#[derive(Debug, Parser)]
#[command(
    name = "tessera",
    version,
    about = "Component cache and reactive update server"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "TESSERA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP and WebSocket server.
    Serve(Box<ServeArgs>),
    /// Warm the demo component caches once, print statistics as JSON, and exit.
    Warm(WarmArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Enable or disable component caching.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,

    /// Override the cache capacity (0 disables the bound).
    #[arg(long = "cache-max-entries", value_name = "COUNT")]
    pub cache_max_entries: Option<usize>,

    /// Enable or disable the HTTP action endpoint.
    #[arg(
        long = "reactive-http-fallback",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub enable_http_fallback: Option<bool>,

    /// Warm registered components before accepting connections.
    #[arg(
        long = "warm-on-startup",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub warm_on_startup: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WarmArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Number of components warmed in parallel per batch.
    #[arg(long = "batch-size", value_name = "COUNT")]
    pub batch_size: Option<usize>,
}
