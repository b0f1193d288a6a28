use std::time::Duration;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "matinee-control",
    about = "Matinee control node: session factory and edge fleet registry"
)]
pub struct Cli {
    /// Port the REST API listens on.
    #[arg(long, env = "MATINEE_CONTROL_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Redis connection URI backing session records and host tokens.
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Session record TTL in seconds, refreshed on every accepted host write.
    #[arg(long, env = "SESSION_TTL", default_value_t = 86_400)]
    pub session_ttl_seconds: u64,

    /// How often the registry sweep looks for dead edge nodes.
    #[arg(long, env = "MATINEE_SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// An edge node silent for longer than this is evicted outright.
    #[arg(long, env = "MATINEE_EVICT_AFTER_SECS", default_value_t = 60)]
    pub evict_after_secs: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub session_ttl_seconds: u64,
    pub sweep_interval: Duration,
    pub evict_after: Duration,
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        Self {
            port: cli.port,
            redis_url: cli.redis_url,
            session_ttl_seconds: cli.session_ttl_seconds,
            sweep_interval: Duration::from_secs(cli.sweep_interval_secs),
            evict_after: Duration::from_secs(cli.evict_after_secs),
        }
    }
}
