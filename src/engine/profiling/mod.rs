//! Function-call profiling
//!
//! [`CallProfiler`] keeps per-call durations for registered function names and
//! summarizes them as a [`FunctionReport`]. Reports are persisted as
//! [`ProfileRow`] records by the [`controller`].

pub mod controller;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::record::{Record, Scalar};

pub use controller::ProfilingController;

#[derive(Error, Debug, PartialEq)]
pub enum ProfilerError {
    #[error("Function not registered: {0}")]
    NotRegistered(String),
    #[error("Profiler state unavailable")]
    Poisoned,
}

/// Timing summary for one function, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FunctionReport {
    pub avg: f64,
    pub calls: u64,
    pub max: f64,
    pub min: f64,
}

pub trait Profiler: Send + Sync {
    /// Start collecting calls for `name`. Registering twice keeps the samples.
    fn register_function(&self, name: &str, scope: &str) -> Result<(), ProfilerError>;

    fn unregister_function(&self, name: &str);

    fn get_function_report(&self, name: &str) -> Result<FunctionReport, ProfilerError>;
}

#[derive(Debug, Default)]
struct Samples {
    scope: String,
    durations: Vec<Duration>,
}

/// In-process profiler fed by [`CallProfiler::record`] or [`CallProfiler::time`]
#[derive(Debug, Default)]
pub struct CallProfiler {
    functions: Mutex<HashMap<String, Samples>>,
}

impl CallProfiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.functions
            .lock()
            .map(|f| f.contains_key(name))
            .unwrap_or(false)
    }

    pub fn scope(&self, name: &str) -> Option<String> {
        self.functions.lock().ok()?.get(name).map(|s| s.scope.clone())
    }

    /// Add one call. Calls to unregistered names are dropped.
    pub fn record(&self, name: &str, duration: Duration) {
        if let Ok(mut functions) = self.functions.lock() {
            if let Some(samples) = functions.get_mut(name) {
                samples.durations.push(duration);
            }
        }
    }

    /// Run `f` and record how long it took
    pub fn time<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        self.record(name, start.elapsed());
        result
    }
}

impl Profiler for CallProfiler {
    fn register_function(&self, name: &str, scope: &str) -> Result<(), ProfilerError> {
        let mut functions = self.functions.lock().map_err(|_| ProfilerError::Poisoned)?;
        functions.entry(name.to_string()).or_insert_with(|| Samples {
            scope: scope.to_string(),
            durations: Vec::new(),
        });
        Ok(())
    }

    fn unregister_function(&self, name: &str) {
        if let Ok(mut functions) = self.functions.lock() {
            functions.remove(name);
        }
    }

    fn get_function_report(&self, name: &str) -> Result<FunctionReport, ProfilerError> {
        let functions = self.functions.lock().map_err(|_| ProfilerError::Poisoned)?;
        let samples = functions
            .get(name)
            .ok_or_else(|| ProfilerError::NotRegistered(name.to_string()))?;

        let millis: Vec<f64> = samples.durations.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        if millis.is_empty() {
            return Ok(FunctionReport::default());
        }

        let total: f64 = millis.iter().sum();
        Ok(FunctionReport {
            avg: total / millis.len() as f64,
            calls: millis.len() as u64,
            max: millis.iter().copied().fold(f64::MIN, f64::max),
            min: millis.iter().copied().fold(f64::MAX, f64::min),
        })
    }
}

/// Which report column a chart plots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Calls,
    Avg,
    Min,
    Max,
}

impl Metric {
    pub const ALL: [Metric; 4] = [Metric::Calls, Metric::Avg, Metric::Min, Metric::Max];

    pub fn value(&self, row: &ProfileRow) -> f64 {
        match self {
            Metric::Calls => row.calls as f64,
            Metric::Avg => row.avg,
            Metric::Min => row.min,
            Metric::Max => row.max,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Calls => write!(f, "calls"),
            Metric::Avg => write!(f, "avg"),
            Metric::Min => write!(f, "min"),
            Metric::Max => write!(f, "max"),
        }
    }
}

/// One stored function report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: i64,
    pub name: String,
    pub avg: f64,
    pub calls: u64,
    pub max: f64,
    pub min: f64,
}

impl ProfileRow {
    /// Record to store for a report; the key is assigned on insert
    pub fn record(name: &str, report: &FunctionReport) -> Record {
        Record::new()
            .with("name", name)
            .with("avg", report.avg)
            .with("calls", i64::try_from(report.calls).unwrap_or(i64::MAX))
            .with("max", report.max)
            .with("min", report.min)
    }

    pub fn from_record(record: &Record) -> Option<Self> {
        let number = |field: &str| record.get(field).and_then(Scalar::as_f64);
        let id = match record.get("id")? {
            Scalar::Integer(i) => *i,
            Scalar::Real(f) => *f as i64,
            _ => return None,
        };
        Some(Self {
            id,
            name: record.get("name")?.as_str()?.to_string(),
            avg: number("avg").unwrap_or(0.0),
            calls: number("calls").unwrap_or(0.0) as u64,
            max: number("max").unwrap_or(0.0),
            min: number("min").unwrap_or(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_summary() {
        let profiler = CallProfiler::new();
        profiler.register_function("render", "View").unwrap();
        profiler.record("render", Duration::from_millis(2));
        profiler.record("render", Duration::from_millis(4));
        profiler.record("ignored", Duration::from_millis(9));

        let report = profiler.get_function_report("render").unwrap();
        assert_eq!(report.calls, 2);
        assert!((report.avg - 3.0).abs() < 1e-9);
        assert!((report.min - 2.0).abs() < 1e-9);
        assert!((report.max - 4.0).abs() < 1e-9);

        assert_eq!(
            profiler.get_function_report("ignored"),
            Err(ProfilerError::NotRegistered("ignored".to_string()))
        );
    }

    #[test]
    fn test_register_twice_keeps_samples() {
        let profiler = CallProfiler::new();
        profiler.register_function("layout", "View").unwrap();
        let value = profiler.time("layout", || 41 + 1);
        profiler.register_function("layout", "Other").unwrap();

        assert_eq!(value, 42);
        assert_eq!(profiler.get_function_report("layout").unwrap().calls, 1);
        assert_eq!(profiler.scope("layout").as_deref(), Some("View"));

        profiler.unregister_function("layout");
        assert!(!profiler.is_registered("layout"));
    }

    #[test]
    fn test_profile_row_from_record() {
        let report = FunctionReport {
            avg: 1.5,
            calls: 3,
            max: 2.0,
            min: 1.0,
        };
        let record = ProfileRow::record("render", &report).with("id", 7);
        let row = ProfileRow::from_record(&record).unwrap();
        assert_eq!(row.id, 7);
        assert_eq!(row.calls, 3);
        assert_eq!(Metric::Avg.value(&row), 1.5);

        assert!(ProfileRow::from_record(&Record::new().with("name", "x")).is_none());
    }

    #[test]
    fn test_profile_row_calls_saturate() {
        let report = FunctionReport {
            avg: 1.0,
            calls: u64::MAX,
            max: 1.0,
            min: 1.0,
        };
        let record = ProfileRow::record("render", &report);
        assert_eq!(record.get("calls"), Some(&Scalar::Integer(i64::MAX)));
    }
}
