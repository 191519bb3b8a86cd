//! callprof CLI Module
//! Command-line interface for profiling runs and the sample store

pub mod formatter;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use super::config::BackendPreference;
use super::profiling::Metric;

#[derive(Parser, Debug)]
#[command(name = "callprof")]
#[command(author = "callprof Team")]
#[command(version)]
#[command(about = "Function-call profiler with a local sample store", long_about = None)]
pub struct Cli {
    /// Project directory holding callprof.config.json (defaults to current directory)
    #[arg(short, long, global = true)]
    pub project: Option<PathBuf>,

    /// Storage root, overriding the config
    #[arg(short, long, global = true)]
    pub data: Option<PathBuf>,

    /// Storage backend, overriding the config
    #[arg(short, long, global = true)]
    pub backend: Option<BackendPreference>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the available backends and the open store
    Info,

    /// Profile a synthetic workload and store the function reports
    Record {
        /// Method names to profile
        #[arg(required = true)]
        methods: Vec<String>,

        /// Calls per method
        #[arg(short, long, default_value = "5")]
        calls: u32,

        /// Simulated work per call, in milliseconds
        #[arg(short, long, default_value = "2")]
        work_ms: u64,
    },

    /// List stored samples for a method
    Report {
        method: String,
    },

    /// Chart stored samples for a method
    Plot {
        method: String,

        #[arg(short, long, default_value = "calls")]
        metric: Metric,
    },

    /// Delete every stored sample
    Clear,

    /// Raw store access
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum StoreAction {
    /// Insert or replace a record given as field=value pairs
    Put {
        #[arg(required = true)]
        fields: Vec<String>,
    },

    /// Fetch one record by key
    Get { key: String },

    /// Remove one record by key
    Remove { key: String },

    /// List every record in key order
    List,
}

impl Cli {
    pub fn get_project_dir(&self) -> PathBuf {
        self.project
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}
