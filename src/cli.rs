//! Command-Line Interface (CLI) argument parsing.
//!
//! This module defines the command-line arguments for the `bottin` binary
//! using the `clap` crate. Options that mirror configuration keys are merged
//! over the `bottin.toml` file and environment variables.

use clap::Parser;
use figment::{
    value::{Dict, Map, Value},
    Error, Metadata, Profile, Provider,
};
use std::path::PathBuf;

/// An iterative DNS resolver that walks the delegation chain from the root.
#[derive(Parser, Debug, Default, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Domain name to resolve.
    pub name: String,

    /// Record type mnemonic (A, AAAA, NS, TXT, ...).
    #[arg(default_value = "A")]
    pub qtype: String,

    /// Path to the TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Root hints file in zone-file format.
    #[arg(long, value_name = "FILE")]
    pub root_hints: Option<PathBuf>,

    /// File the record cache is restored from and dumped to.
    #[arg(long, value_name = "FILE")]
    pub cache_file: Option<PathBuf>,

    /// Timeout for a single UDP query attempt in milliseconds.
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Maximum recursion depth.
    #[arg(long, value_name = "DEPTH")]
    pub max_recursion: Option<usize>,

    /// The logging level (e.g. "debug").
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Print every resolution step to stderr.
    #[arg(long)]
    pub trace: bool,
}

impl Provider for Cli {
    fn metadata(&self) -> Metadata {
        Metadata::named("Command-Line Arguments")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, Error> {
        let mut dict = Dict::new();

        if let Some(level) = &self.log_level {
            dict.insert("log_level".into(), Value::from(level.clone()));
        }

        if let Some(path) = &self.root_hints {
            dict.insert(
                "root_hints_path".into(),
                Value::from(path.display().to_string()),
            );
        }

        let mut resolver = Dict::new();
        if let Some(timeout) = self.timeout_ms {
            resolver.insert("timeout_ms".into(), Value::from(timeout));
        }
        if let Some(depth) = self.max_recursion {
            resolver.insert("max_recursion".into(), Value::from(depth as u64));
        }
        if !resolver.is_empty() {
            dict.insert("resolver".into(), Value::from(resolver));
        }

        if let Some(path) = &self.cache_file {
            let mut cache = Dict::new();
            cache.insert(
                "persist_path".into(),
                Value::from(path.display().to_string()),
            );
            dict.insert("cache".into(), Value::from(cache));
        }

        let mut map = Map::new();
        map.insert(Profile::Default, dict);
        Ok(map)
    }
}
