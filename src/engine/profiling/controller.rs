//! Profiling controller
//!
//! Wires the profiler, the panel, the chart and the sample store together:
//! registers the profiled methods, stores every function report when a
//! profiling run ends and plots stored samples on request.

use std::sync::{Arc, Mutex};

use crate::engine::chart::Chart;
use crate::engine::contract::{IterationOptions, KeyRange, StoreContract};
use crate::engine::error::{Result, StoreError};
use crate::engine::logging::SharedLog;
use crate::engine::record::{Key, Record};
use crate::engine::relational::{TableSchema, WhereClause};
use crate::engine::selector::Storage;
use crate::engine::view::Panel;

use super::{FunctionReport, ProfileRow, Profiler};

const COMPONENT: &str = "profiling";
const NAME_INDEX: &str = "name";

pub struct ProfilingController<P: Profiler, V: Panel, C: Chart> {
    profiler: Arc<P>,
    panel: V,
    chart: C,
    /// `None` when no local store is available; profiling still runs
    storage: Option<Arc<Storage>>,
    table: String,
    profiles: Vec<String>,
    log: SharedLog,
}

impl<P: Profiler, V: Panel, C: Chart> ProfilingController<P, V, C> {
    pub fn new(
        profiler: Arc<P>,
        panel: V,
        chart: C,
        storage: Option<Arc<Storage>>,
        table: &str,
        log: SharedLog,
    ) -> Self {
        Self {
            profiler,
            panel,
            chart,
            storage,
            table: table.to_string(),
            profiles: Vec::new(),
            log,
        }
    }

    pub fn panel(&self) -> &V {
        &self.panel
    }

    pub fn panel_mut(&mut self) -> &mut V {
        &mut self.panel
    }

    pub fn profiles(&self) -> &[String] {
        &self.profiles
    }

    /// Show the methods, prepare the profile table and register every method
    pub async fn init(&mut self, profiles: &[String], scope: &str) -> Result<()> {
        self.profiles = profiles.to_vec();
        self.panel.init(&self.profiles);

        if let Some(storage) = &self.storage {
            if let Some(engine) = storage.as_relational() {
                engine
                    .create_table(TableSchema::new(
                        &self.table,
                        &[
                            "id INTEGER PRIMARY KEY",
                            "name VARCHAR(100)",
                            "avg REAL",
                            "calls INTEGER",
                            "max REAL",
                            "min REAL",
                        ],
                    ))
                    .await?;
                engine.set_table(&self.table);
            }
        }

        for name in &self.profiles {
            if let Err(e) = self.profiler.register_function(name, scope) {
                self.log
                    .warn(COMPONENT, &format!("cannot register function {} with profiler: {}", name, e));
            }
        }
        Ok(())
    }

    /// Collect the report of every profiled method, store them one after the
    /// other in method order and unregister the methods. Methods without a report are skipped.
    pub async fn on_profiling_end(&self) -> Result<Vec<(String, FunctionReport)>> {
        let mut reports = Vec::new();
        for name in &self.profiles {
            match self.profiler.get_function_report(name) {
                Ok(report) => {
                    reports.push((name.clone(), report));
                    self.profiler.unregister_function(name);
                }
                Err(_) => self.log.warn(COMPONENT, &format!("no function report for {}", name)),
            }
        }

        if let Some(storage) = &self.storage {
            for (name, report) in &reports {
                storage.put(ProfileRow::record(name, report)).await?;
            }
        }
        Ok(reports)
    }

    /// Stored rows for `method`, oldest first
    pub async fn rows_for(&self, method: &str) -> Result<Vec<ProfileRow>> {
        let Some(storage) = &self.storage else {
            return Ok(Vec::new());
        };

        let records = match storage.as_ref() {
            Storage::Relational(engine) => {
                engine
                    .set_table(&self.table)
                    .select(&[], WhereClause::new().eq("name", method))
                    .await?
            }
            Storage::Document(engine) => {
                let collected = Arc::new(Mutex::new(Vec::new()));
                let sink = collected.clone();
                let wanted = method.to_string();
                let indexed = engine.has_index(NAME_INDEX).await?;

                let mut options = IterationOptions::new();
                if indexed {
                    options = options.index(NAME_INDEX).key_range(KeyRange::only(Key::from(method)));
                }
                storage
                    .iterate(
                        move |record: Option<&Record>| {
                            if let Some(r) = record {
                                if r.get("name").and_then(|n| n.as_str()) == Some(wanted.as_str()) {
                                    if let Ok(mut rows) = sink.lock() {
                                        rows.push(r.clone());
                                    }
                                }
                            }
                        },
                        options,
                    )
                    .await?;

                let records = collected
                    .lock()
                    .map_err(|_| StoreError::Read("sample buffer poisoned".to_string()))?
                    .clone();
                records
            }
        };

        let mut rows: Vec<ProfileRow> = records.iter().filter_map(ProfileRow::from_record).collect();
        rows.sort_by_key(|r| r.id);
        Ok(rows)
    }

    /// Plot the selected method when the panel is visible
    pub async fn update(&self) -> Result<Option<String>> {
        if !self.panel.is_visible() || self.storage.is_none() {
            return Ok(None);
        }
        let Some(method) = self.panel.selected_method() else {
            return Ok(None);
        };

        let rows = self.rows_for(&method).await?;
        Ok(Some(self.chart.plot(&rows, self.panel.selected_metric())))
    }

    pub async fn toggle(&mut self) -> Result<Option<String>> {
        self.panel.toggle();
        self.update().await
    }

    /// Drop every stored sample, then refresh the plot
    pub async fn clear(&self) -> Result<Option<String>> {
        if let Some(storage) = &self.storage {
            if let Some(engine) = storage.as_relational() {
                engine.set_table(&self.table);
            }
            storage.clear().await?;
        }
        self.update().await
    }
}
