//! Command line configuration of the server binary.

use crate::error::ConfigError;
use crate::game::PlaygroundConfig;
use clap::Parser;
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Multiplayer pool server", long_about = None)]
pub struct ServerConfig {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port of the game listener
    #[arg(short, long, default_value = "8081")]
    pub port: u16,

    /// Local port which shuts the server down when connected to
    #[arg(long, default_value = "8082")]
    pub shutdown_port: u16,

    /// Maximum number of pools
    #[arg(long, default_value = "10")]
    pub pool_limit: u16,

    /// Maximum number of connections per pool
    #[arg(long, default_value = "4")]
    pub conn_limit: u16,

    /// Interval between shared state broadcasts
    #[arg(long, default_value = "100")]
    pub broadcast_delay_ms: u64,

    /// Interval between playground updates
    #[arg(long, default_value = "150")]
    pub game_tick_ms: u64,

    /// Playground width
    #[arg(long = "pg-w", default_value_t = shared::DEFAULT_PLAYGROUND_WIDTH)]
    pub playground_width: u8,

    /// Playground height
    #[arg(long = "pg-h", default_value_t = shared::DEFAULT_PLAYGROUND_HEIGHT)]
    pub playground_height: u8,

    /// Time given to sessions to wind down after shutdown starts
    #[arg(long, default_value = "1000")]
    pub grace_ms: u64,

    /// Interval between stats log lines
    #[arg(long, default_value = "10")]
    pub stats_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
            shutdown_port: 8082,
            pool_limit: 10,
            conn_limit: 4,
            broadcast_delay_ms: 100,
            game_tick_ms: 150,
            playground_width: shared::DEFAULT_PLAYGROUND_WIDTH,
            playground_height: shared::DEFAULT_PLAYGROUND_HEIGHT,
            grace_ms: 1000,
            stats_interval_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_limit == 0 {
            return Err(ConfigError::InvalidPoolLimit);
        }
        if self.conn_limit == 0 {
            return Err(ConfigError::InvalidConnLimit);
        }
        if self.playground_width == 0 || self.playground_height == 0 {
            return Err(ConfigError::InvalidPlayground {
                width: self.playground_width,
                height: self.playground_height,
            });
        }
        if self.broadcast_delay_ms == 0 {
            return Err(ConfigError::ZeroDuration("broadcast delay"));
        }
        if self.game_tick_ms == 0 {
            return Err(ConfigError::ZeroDuration("game tick"));
        }
        if self.stats_interval_secs == 0 {
            return Err(ConfigError::ZeroDuration("stats interval"));
        }

        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The shutdown listener is only ever bound on loopback.
    pub fn shutdown_addr(&self) -> String {
        format!("127.0.0.1:{}", self.shutdown_port)
    }

    pub fn broadcast_delay(&self) -> Duration {
        Duration::from_millis(self.broadcast_delay_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }

    pub fn playground(&self) -> PlaygroundConfig {
        PlaygroundConfig {
            width: self.playground_width,
            height: self.playground_height,
            tick: Duration::from_millis(self.game_tick_ms),
            ..PlaygroundConfig::default()
        }
    }
}
