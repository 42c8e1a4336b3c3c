//! Configuration management for Bottin
//!
//! This module defines the main `Config` struct and its sub-structs. It uses
//! the `figment` crate to layer built-in defaults, a `bottin.toml` file,
//! `BOTTIN_` environment variables and command-line arguments.

use crate::cli::Cli;
use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Configuration file read when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "bottin.toml";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The logging level for the application.
    pub log_level: String,
    /// Root hints file; the embedded IANA hints are used when unset.
    pub root_hints_path: Option<PathBuf>,
    /// Configuration for iterative resolution.
    pub resolver: ResolverConfig,
    /// Configuration for the record cache.
    pub cache: CacheConfig,
}

/// Configuration for iterative resolution.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ResolverConfig {
    /// Timeout for a single UDP query attempt, in milliseconds.
    pub timeout_ms: u64,
    /// Timeout for a whole exchange with one nameserver, TCP retry included.
    pub exchange_timeout_ms: u64,
    /// Expected round-trip time. An exchange is not started when less than
    /// this remains before the caller's deadline.
    pub typical_response_time_ms: u64,
    /// Maximum recursion depth, referral hops included.
    pub max_recursion: usize,
    /// Nameserver names considered per zone cut.
    pub max_nameservers: usize,
    /// Addresses considered per nameserver name.
    pub max_ips: usize,
    /// Port nameservers are queried on.
    pub nameserver_port: u16,
    /// Repeat truncated UDP answers over TCP.
    pub tcp_retry: bool,
    /// Serve repeated queries from the general cache.
    pub cache_read_through: bool,
}

impl ResolverConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn exchange_timeout(&self) -> Duration {
        Duration::from_millis(self.exchange_timeout_ms)
    }

    pub fn typical_response_time(&self) -> Duration {
        Duration::from_millis(self.typical_response_time_ms)
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            exchange_timeout_ms: 5000,
            typical_response_time_ms: 100,
            max_recursion: 10,
            max_nameservers: 2,
            max_ips: 2,
            nameserver_port: 53,
            tcp_retry: true,
            cache_read_through: true,
        }
    }
}

/// Configuration for the record cache.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CacheConfig {
    /// Interval between sweeps of expired records.
    pub sweep_interval_seconds: u64,
    /// File the cache is restored from at startup and dumped to on exit.
    pub persist_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            sweep_interval_seconds: 60,
            persist_path: None,
        }
    }
}

impl Config {
    /// Loads the configuration by layering defaults, the TOML file named by
    /// `cli.config` (or `bottin.toml`), environment variables and `cli`.
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            // e.g. BOTTIN_RESOLVER__MAX_RECURSION=12
            .merge(Env::prefixed("BOTTIN_").split("__"))
            .merge(cli.clone())
            .extract()?;
        Ok(config)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            root_hints_path: None,
            resolver: ResolverConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}
