//! callprof CLI - Main entry point for CLI binary
//!
//! This binary provides the `callprof` tool for profiling runs and raw store access.

use anyhow::{anyhow, Context};
use callprof::engine::{
    chart::TextChart,
    cli::formatter::{format_millis, format_record, parse_field, CliFormatter},
    cli::{Cli, Commands, OutputFormat, StoreAction},
    config::Config,
    contract::StoreContract,
    logging::{tracing_sink, SharedLog},
    profiling::{CallProfiler, Metric, ProfilingController},
    record::{Key, Record},
    selector::{select_backend, Environment, Storage},
    view::TerminalPanel,
};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

type Controller = ProfilingController<CallProfiler, TerminalPanel, TextChart>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run_cli(cli).await {
        CliFormatter::error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run_cli(cli: Cli) -> anyhow::Result<()> {
    let project_dir = cli.get_project_dir();
    let json_output = cli.format == OutputFormat::Json;
    let config = load_config(&project_dir, &cli)?;
    let log = tracing_sink();

    let env = Environment::probe(&config.storage);
    let storage = Arc::new(select_backend(&env, config.storage.backend, log.clone())?);
    storage
        .open_db(config.store.clone())
        .await
        .with_context(|| format!("opening store {}.{}", config.store.name, config.store.store_name))?;

    let result = match cli.command {
        Commands::Info => cmd_info(&env, &storage, &config, json_output).await,
        Commands::Record { methods, calls, work_ms } => {
            cmd_record(&storage, &config, log, &methods, calls, work_ms, json_output).await
        }
        Commands::Report { method } => cmd_report(&storage, &config, log, &method, json_output).await,
        Commands::Plot { method, metric } => cmd_plot(&storage, &config, log, &method, metric, json_output).await,
        Commands::Clear => cmd_clear(&storage, &config, log, json_output).await,
        Commands::Store { action } => cmd_store(action, &storage, json_output).await,
    };

    storage.close();
    result
}

fn load_config(project_dir: &Path, cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load_or_default(project_dir)?;
    if let Some(data) = &cli.data {
        config.storage.root = data.clone();
    }
    if let Some(backend) = cli.backend {
        config.storage.backend = backend;
    }
    Ok(config)
}

fn build_controller(storage: &Arc<Storage>, config: &Config, log: SharedLog) -> (Arc<CallProfiler>, Controller) {
    let profiler = Arc::new(CallProfiler::new());
    let storage = config.profiling.enabled.then(|| storage.clone());
    let controller = ProfilingController::new(
        profiler.clone(),
        TerminalPanel::new(),
        TextChart::default(),
        storage,
        &config.profiling.table,
        log,
    );
    (profiler, controller)
}

async fn cmd_info(env: &Environment, storage: &Storage, config: &Config, json: bool) -> anyhow::Result<()> {
    let records = storage.get_all().await?.len();
    let version = storage.version().unwrap_or(0);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "environment": env,
                "backend": storage.kind(),
                "store": config.store.name,
                "object_store": config.store.store_name,
                "version": version,
                "records": records,
            }))?
        );
        return Ok(());
    }

    CliFormatter::header("callprof");
    CliFormatter::kv("Project", &config.project.name);
    CliFormatter::kv("Storage root", &env.root.display().to_string());
    CliFormatter::kv("Document API", if env.document { "available" } else { "unavailable" });
    CliFormatter::kv("Relational API", if env.relational { "available" } else { "unavailable" });
    CliFormatter::blank();
    CliFormatter::kv("Backend", &storage.kind().to_string());
    CliFormatter::kv("Store", &format!("{}.{}", config.store.name, config.store.store_name));
    CliFormatter::kv("Version", &version.to_string());
    CliFormatter::kv("Records", &records.to_string());
    Ok(())
}

async fn cmd_record(
    storage: &Arc<Storage>,
    config: &Config,
    log: SharedLog,
    methods: &[String],
    calls: u32,
    work_ms: u64,
    json: bool,
) -> anyhow::Result<()> {
    let (profiler, mut controller) = build_controller(storage, config, log);
    controller.init(methods, "cli").await?;

    for method in methods {
        for _ in 0..calls {
            let start = Instant::now();
            tokio::time::sleep(Duration::from_millis(work_ms)).await;
            profiler.record(method, start.elapsed());
        }
    }

    let reports = controller.on_profiling_end().await?;

    if json {
        let out: Vec<_> = reports
            .iter()
            .map(|(name, report)| serde_json::json!({ "name": name, "report": report }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    CliFormatter::header("Function reports");
    CliFormatter::table_header(&["name", "calls", "avg", "min", "max"]);
    for (name, report) in &reports {
        CliFormatter::table_row(&[
            name.as_str(),
            &report.calls.to_string(),
            &format_millis(report.avg),
            &format_millis(report.min),
            &format_millis(report.max),
        ]);
    }
    CliFormatter::blank();
    if config.profiling.enabled {
        CliFormatter::success(&format!("Stored {} report(s)", reports.len()));
    } else {
        CliFormatter::warning("Profiling storage disabled; reports were not stored");
    }
    Ok(())
}

async fn cmd_report(
    storage: &Arc<Storage>,
    config: &Config,
    log: SharedLog,
    method: &str,
    json: bool,
) -> anyhow::Result<()> {
    let (_, mut controller) = build_controller(storage, config, log);
    controller.init(&[method.to_string()], "cli").await?;
    let rows = controller.rows_for(method).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        CliFormatter::info(&format!("No samples stored for {}", method));
        return Ok(());
    }
    CliFormatter::header(&format!("Samples for {}", method));
    CliFormatter::profile_rows(&rows);
    Ok(())
}

async fn cmd_plot(
    storage: &Arc<Storage>,
    config: &Config,
    log: SharedLog,
    method: &str,
    metric: Metric,
    json: bool,
) -> anyhow::Result<()> {
    let (_, mut controller) = build_controller(storage, config, log);
    controller.init(&[method.to_string()], "cli").await?;
    controller.panel_mut().select_metric(metric);

    let plot = controller.toggle().await?.unwrap_or_default();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "method": method,
                "metric": metric,
                "plot": plot,
            }))?
        );
        return Ok(());
    }

    println!("{}", controller.panel().render());
    println!("{}", plot);
    Ok(())
}

async fn cmd_clear(storage: &Arc<Storage>, config: &Config, log: SharedLog, json: bool) -> anyhow::Result<()> {
    let (_, mut controller) = build_controller(storage, config, log);
    controller.init(&[], "cli").await?;
    controller.clear().await?;

    if json {
        println!("{}", serde_json::json!({ "cleared": true }));
    } else {
        CliFormatter::success("Cleared stored samples");
    }
    Ok(())
}

async fn cmd_store(action: StoreAction, storage: &Storage, json: bool) -> anyhow::Result<()> {
    match action {
        StoreAction::Put { fields } => {
            let mut record = Record::new();
            for pair in &fields {
                let (field, value) =
                    parse_field(pair).ok_or_else(|| anyhow!("expected field=value, got {}", pair))?;
                record.set(&field, value);
            }
            let key = storage.put(record).await?;
            if json {
                println!("{}", serde_json::json!({ "key": key }));
            } else {
                CliFormatter::success(&format!("Stored record {}", key));
            }
        }
        StoreAction::Get { key } => {
            let record = storage.get(parse_key(&key)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                match record {
                    Some(record) => CliFormatter::item(&format_record(&record)),
                    None => CliFormatter::info(&format!("No record with key {}", key)),
                }
            }
        }
        StoreAction::Remove { key } => {
            storage.remove(parse_key(&key)).await?;
            if json {
                println!("{}", serde_json::json!({ "removed": key }));
            } else {
                CliFormatter::success(&format!("Removed record {}", key));
            }
        }
        StoreAction::List => {
            let records = storage.get_all().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                CliFormatter::info("Store is empty");
            } else {
                for record in &records {
                    CliFormatter::item(&format_record(record));
                }
            }
        }
    }
    Ok(())
}

/// Integer keys first, then reals, otherwise text
fn parse_key(raw: &str) -> Key {
    if let Ok(i) = raw.parse::<i64>() {
        Key::Integer(i)
    } else if let Ok(f) = raw.parse::<f64>() {
        Key::Real(f)
    } else {
        Key::Text(raw.to_string())
    }
}
