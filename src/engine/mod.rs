// callprof Engine - Core module structure
pub mod chart;
pub mod cli;
pub mod config;
pub mod contract;
pub mod document;
pub mod error;
pub mod logging;
pub mod negotiator;
pub mod profiling;
pub mod record;
pub mod relational;
pub mod schema;
pub mod selector;
pub mod view;

pub use config::{Config, StoreConfig};
pub use contract::{CursorAction, IterationOptions, StoreContract};
pub use error::StoreError;
pub use record::{Key, Record, Scalar};
pub use selector::{select_backend, Environment, Storage};
