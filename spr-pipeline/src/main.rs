//! spr-pipeline - operator CLI for the reconciliation pipeline
//!
//! **Usage:**
//! ```bash
//! spr-pipeline ingest --source CEPEA --file cepea-2025-01-07.json
//! spr-pipeline resolve --entity SOJA:MT --timestamp 2025-01-07
//! spr-pipeline canonical --entity SOJA:MT --from 2025-01-01 --to 2025-01-31
//! spr-pipeline priorities load --file priorities.toml
//! spr-pipeline runs stale
//! spr-pipeline telemetry checkpoint
//! spr-pipeline report --window-hours 24
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use spr_common::config::resolve_root_folder;
use spr_common::{time, uuid_utils, PipelineConfig};
use spr_pipeline::ingest::load_batch_file;
use spr_pipeline::models::{DataType, Granularity, RunFilter, RunStatus};
use spr_pipeline::Pipeline;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Multi-source observation reconciliation pipeline
#[derive(Parser, Debug)]
#[clap(name = "spr-pipeline", version)]
#[clap(about = "Stage, reconcile and inspect multi-source observations")]
struct Cli {
    /// Root folder holding the database (overrides SPR_ROOT and the config file)
    #[clap(long, global = true, value_name = "DIR")]
    root: Option<String>,

    /// Configuration file (defaults to the platform config location)
    #[clap(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[clap(long, global = true)]
    json: bool,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stage a batch file from one source as one ingestion run
    Ingest {
        #[clap(long)]
        source: String,
        /// JSON array of {data_type, entity_key, timestamp, payload}
        #[clap(long, value_name = "FILE")]
        file: PathBuf,
        #[clap(long)]
        granularity: Option<String>,
    },
    /// Resolve the canonical record for one key
    Resolve {
        #[clap(long)]
        entity: String,
        #[clap(long)]
        timestamp: String,
        #[clap(long)]
        granularity: Option<String>,
        /// Replay the resolution as of this time without writing
        #[clap(long, value_name = "TIME")]
        as_of: Option<String>,
    },
    /// Read canonical records for an entity
    Canonical {
        #[clap(long)]
        entity: String,
        #[clap(long, required_unless_present = "latest")]
        from: Option<String>,
        #[clap(long, required_unless_present = "latest")]
        to: Option<String>,
        #[clap(long)]
        granularity: Option<String>,
        /// Only the newest record
        #[clap(long)]
        latest: bool,
    },
    /// Source priority registry
    #[clap(subcommand)]
    Priorities(PriorityCommand),
    /// Ingestion run monitoring
    #[clap(subcommand)]
    Runs(RunCommand),
    /// Performance telemetry and storage maintenance
    #[clap(subcommand)]
    Telemetry(TelemetryCommand),
    /// Data status, run health and detected issues
    Report {
        #[clap(long, default_value = "24")]
        window_hours: u32,
    },
}

#[derive(Subcommand, Debug)]
enum PriorityCommand {
    /// Apply a priority file (defaults to the configured one)
    Load {
        #[clap(long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
    /// Priorities in force now
    List {
        #[clap(long)]
        data_type: Option<String>,
    },
    /// Record a new priority fact for one source
    Set {
        #[clap(long)]
        data_type: String,
        #[clap(long)]
        source: String,
        #[clap(long)]
        priority: i64,
        #[clap(long)]
        inactive: bool,
    },
    /// Every fact recorded for one source
    History {
        #[clap(long)]
        data_type: String,
        #[clap(long)]
        source: String,
    },
}

#[derive(Subcommand, Debug)]
enum RunCommand {
    List {
        #[clap(long)]
        source: Option<String>,
        #[clap(long)]
        status: Option<String>,
        #[clap(long, value_name = "TIME")]
        since: Option<String>,
        #[clap(long, value_name = "TIME")]
        until: Option<String>,
        #[clap(long, default_value = "20")]
        limit: u32,
    },
    Show {
        run_id: String,
    },
    /// Runs still `running` past the staleness window
    Stale {
        /// Window in seconds (defaults to the configured value)
        #[clap(long)]
        after_secs: Option<u64>,
    },
    Summary {
        #[clap(long, value_name = "TIME")]
        since: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum TelemetryCommand {
    Summary {
        #[clap(long, value_name = "TIME")]
        since: Option<String>,
    },
    List {
        #[clap(long)]
        source: Option<String>,
        #[clap(long, default_value = "20")]
        limit: u32,
    },
    /// Checkpoint the WAL when it is above the configured threshold
    Checkpoint {
        /// Checkpoint regardless of WAL size
        #[clap(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        "spr-pipeline v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::load_default_location()?,
    };
    let root = resolve_root_folder(cli.root.as_deref(), &config);
    let db_path = config.database_path(&root);
    info!("Database path: {}", db_path.display());

    let pipeline = Pipeline::open(&db_path, config)
        .await
        .with_context(|| format!("opening database {}", db_path.display()))?;

    match cli.command {
        Command::Ingest { source, file, granularity } => {
            pipeline.reload_priorities().await?;
            let records = load_batch_file(&file).await?;
            let granularity = parse_granularity(granularity.as_deref(), &pipeline)?;

            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, cancelling after the current record");
                    on_signal.cancel();
                }
            });

            let report = pipeline
                .ingester
                .ingest(&source, &records, Some(granularity), &cancel)
                .await?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "run {} {}: processed {}, inserted {}, duplicates {}, failed {}, canonical updates {}",
                    report.run_id,
                    report.status,
                    report.counts.processed,
                    report.counts.inserted,
                    report.counts.duplicates(),
                    report.counts.failed,
                    report.counts.updated
                );
                for failure in &report.failures {
                    let position = failure.index.map(|i| format!("#{}", i)).unwrap_or_else(|| "resolve".to_string());
                    println!("  {} {}: {}", position, failure.entity_key, failure.message);
                }
            }
        }

        Command::Resolve { entity, timestamp, granularity, as_of } => {
            let timestamp = time::parse_timestamp(&timestamp)?;
            let granularity = parse_granularity(granularity.as_deref(), &pipeline)?;

            match as_of {
                Some(at) => {
                    let at = time::parse_timestamp(&at)?;
                    let record = pipeline.resolver.resolve_as_of(&entity, timestamp, granularity, at).await?;
                    if cli.json {
                        print_json(&record)?;
                    } else {
                        match record {
                            Some(r) => println!("{} as of {}: {:?} from {} (priority {})", r.entity_key, at, r.values, r.winning_source, r.winning_priority),
                            None => println!("{} as of {}: no active data", entity, at),
                        }
                    }
                }
                None => {
                    pipeline.reload_priorities().await?;
                    let outcome = pipeline.resolver.resolve(&entity, timestamp, granularity).await?;
                    if cli.json {
                        print_json(&outcome.record)?;
                    } else {
                        match &outcome.record {
                            Some(r) => println!(
                                "{} {} {}: {} from {} (priority {})",
                                r.entity_key,
                                r.timestamp,
                                outcome.action.as_str(),
                                r.values.headline_value().map(|v| v.to_string()).unwrap_or_else(|| "-".to_string()),
                                r.winning_source,
                                r.winning_priority
                            ),
                            None => println!("{}: {}", entity, outcome.action.as_str()),
                        }
                    }
                }
            }
        }

        Command::Canonical { entity, from, to, granularity, latest } => {
            let granularity = parse_granularity(granularity.as_deref(), &pipeline)?;
            let records = if latest {
                pipeline
                    .resolver
                    .latest_canonical(&entity, granularity)
                    .await?
                    .into_iter()
                    .collect()
            } else {
                let from = time::parse_timestamp(from.as_deref().unwrap_or_default())?;
                let to = time::parse_timestamp(to.as_deref().unwrap_or_default())?;
                pipeline.resolver.get_canonical(&entity, from, to, granularity).await?
            };

            if cli.json {
                print_json(&records)?;
            } else if records.is_empty() {
                println!("no canonical records");
            } else {
                for r in records {
                    println!(
                        "{}  {}  {}  {} (priority {})",
                        time::to_storage(&r.timestamp),
                        r.entity_key,
                        r.values.headline_value().map(|v| v.to_string()).unwrap_or_else(|| "-".to_string()),
                        r.winning_source,
                        r.winning_priority
                    );
                }
            }
        }

        Command::Priorities(command) => run_priorities(&pipeline, command, cli.json).await?,
        Command::Runs(command) => run_runs(&pipeline, command, cli.json).await?,
        Command::Telemetry(command) => run_telemetry(&pipeline, command, cli.json).await?,
        Command::Report { window_hours } => run_report(&pipeline, window_hours, cli.json).await?,
    }

    Ok(())
}

async fn run_priorities(pipeline: &Pipeline, command: PriorityCommand, json: bool) -> Result<()> {
    match command {
        PriorityCommand::Load { file } => {
            let path = file
                .or_else(|| pipeline.config.priorities_path.clone())
                .context("no priority file given and none configured")?;
            let appended = pipeline.registry.load_file(&path).await?;
            println!("{} priority facts appended from {}", appended, path.display());
        }
        PriorityCommand::List { data_type } => {
            let data_type = data_type.map(|d| d.parse::<DataType>()).transpose()?;
            let facts = pipeline.registry.current(data_type).await?;
            if json {
                print_json(&facts)?;
            } else {
                for f in facts {
                    println!(
                        "{:<14} {:<16} {:>4}  {}  since {}",
                        f.data_type,
                        f.source,
                        f.priority,
                        if f.is_active { "active  " } else { "inactive" },
                        f.effective_from
                    );
                }
            }
        }
        PriorityCommand::Set { data_type, source, priority, inactive } => {
            let fact = pipeline
                .registry
                .set_priority(data_type.parse()?, &source, priority, !inactive, None)
                .await?;
            if json {
                print_json(&fact)?;
            } else {
                println!("{} {} -> {} (active: {}) from {}", fact.data_type, fact.source, fact.priority, fact.is_active, fact.effective_from);
            }
        }
        PriorityCommand::History { data_type, source } => {
            let facts = pipeline.registry.history(data_type.parse()?, &source).await?;
            if json {
                print_json(&facts)?;
            } else {
                for f in facts {
                    println!("{}  priority {}  active {}", f.effective_from, f.priority, f.is_active);
                }
            }
        }
    }
    Ok(())
}

async fn run_runs(pipeline: &Pipeline, command: RunCommand, json: bool) -> Result<()> {
    match command {
        RunCommand::List { source, status, since, until, limit } => {
            let filter = RunFilter {
                source,
                status: status.map(|s| s.parse::<RunStatus>()).transpose()?,
                started_after: since.as_deref().map(time::parse_timestamp).transpose()?,
                started_before: until.as_deref().map(time::parse_timestamp).transpose()?,
                limit: Some(limit),
            };
            let runs = pipeline.runs.list_runs(&filter).await?;
            if json {
                print_json(&runs)?;
            } else {
                for run in runs {
                    println!(
                        "{}  {:<12} {:<9}  {}  processed {} inserted {} updated {} failed {}",
                        run.id,
                        run.source,
                        run.status,
                        run.start_time,
                        run.counts.processed,
                        run.counts.inserted,
                        run.counts.updated,
                        run.counts.failed
                    );
                }
            }
        }
        RunCommand::Show { run_id } => {
            let run_id = uuid_utils::parse(&run_id)?;
            let run = pipeline
                .runs
                .get_run(run_id)
                .await?
                .with_context(|| format!("run {} not found", run_id))?;
            if json {
                print_json(&run)?;
            } else {
                println!("run       {}", run.id);
                println!("source    {}", run.source);
                println!("status    {}", run.status);
                println!("started   {}", run.start_time);
                if let Some(end) = run.end_time {
                    println!("ended     {}", end);
                }
                println!("elapsed   {} ms", run.elapsed_ms(time::now()));
                println!(
                    "records   processed {} inserted {} updated {} failed {}",
                    run.counts.processed, run.counts.inserted, run.counts.updated, run.counts.failed
                );
                if let Some(message) = run.error_message {
                    println!("error     {}", message);
                }
            }
        }
        RunCommand::Stale { after_secs } => {
            let secs = after_secs.unwrap_or(pipeline.config.stale_run_after_secs);
            let runs = pipeline.runs.stale_runs(chrono::Duration::seconds(secs as i64)).await?;
            if json {
                print_json(&runs)?;
            } else if runs.is_empty() {
                println!("no stale runs");
            } else {
                for run in runs {
                    println!("{}  {:<12} started {}", run.id, run.source, run.start_time);
                }
            }
        }
        RunCommand::Summary { since } => {
            let since = since.as_deref().map(time::parse_timestamp).transpose()?;
            let summaries = pipeline.runs.summary(since).await?;
            if json {
                print_json(&summaries)?;
            } else {
                for s in summaries {
                    println!(
                        "{:<12} runs {} failures {} running {} success {:.1}%  inserted {} updated {} failed {}  avg {:.0} ms max {} ms",
                        s.source,
                        s.runs,
                        s.failures,
                        s.still_running,
                        s.success_rate(),
                        s.records_inserted,
                        s.records_updated,
                        s.records_failed,
                        s.avg_duration_ms,
                        s.max_duration_ms
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_telemetry(pipeline: &Pipeline, command: TelemetryCommand, json: bool) -> Result<()> {
    match command {
        TelemetryCommand::Summary { since } => {
            let since = since.as_deref().map(time::parse_timestamp).transpose()?;
            let summaries = pipeline.telemetry.summary(since).await?;
            let footprint = pipeline.telemetry.storage_footprint().await?;
            if json {
                print_json(&serde_json::json!({ "sources": summaries, "storage": footprint }))?;
            } else {
                println!("storage: database {} bytes, wal {} bytes", footprint.database_bytes, footprint.wal_bytes);
                for s in summaries {
                    println!(
                        "{:<12} samples {} latency avg {:.0} ms max {} ms  throughput avg {:.1}/s  lock waits {}",
                        s.source, s.samples, s.avg_latency_ms, s.max_latency_ms, s.avg_throughput, s.total_lock_waits
                    );
                }
            }
        }
        TelemetryCommand::List { source, limit } => {
            let metrics = pipeline.telemetry.list(source.as_deref(), None, Some(limit)).await?;
            if json {
                print_json(&metrics)?;
            } else {
                for m in metrics {
                    println!(
                        "{}  {:<12} {} ms  {:.1}/s  db {} wal {}  waits {}",
                        m.timestamp,
                        m.sample.source,
                        m.sample.latency_ms,
                        m.sample.throughput_records_per_sec,
                        m.sample.storage_size,
                        m.sample.wal_size,
                        m.sample.lock_waits
                    );
                }
            }
        }
        TelemetryCommand::Checkpoint { force } => {
            let result = if force {
                Some(pipeline.telemetry.checkpoint().await?)
            } else {
                pipeline
                    .telemetry
                    .checkpoint_if_needed(pipeline.config.wal_checkpoint_threshold_bytes)
                    .await?
            };
            if json {
                print_json(&result)?;
            } else {
                match result {
                    Some(r) if r.busy => println!("checkpoint incomplete (busy): {} of {} frames", r.checkpointed_frames, r.log_frames),
                    Some(r) => println!("checkpointed {} frames", r.checkpointed_frames),
                    None => println!("WAL below threshold, nothing to do"),
                }
            }
        }
    }
    Ok(())
}

async fn run_report(pipeline: &Pipeline, window_hours: u32, json: bool) -> Result<()> {
    let report = pipeline
        .reporter
        .daily_report(time::now(), chrono::Duration::hours(window_hours as i64))
        .await?;
    if json {
        return print_json(&report);
    }

    println!("report {} (runs since {})", report.generated_at, report.window_start);
    println!(
        "totals: {} records, {} runs, {} failed, success {:.1}%",
        report.totals.records, report.totals.runs, report.totals.failures, report.totals.success_rate
    );
    println!("data:");
    for d in &report.data_status {
        println!(
            "  {:<12} {} records  {} entities  {} .. {} ({} days)",
            d.source,
            d.records,
            d.entities,
            time::to_storage(&d.first_observation),
            time::to_storage(&d.last_observation),
            d.coverage_days
        );
    }
    println!("runs:");
    for s in &report.runs {
        println!(
            "  {:<12} runs {} failures {} success {:.1}%  avg {:.0} ms",
            s.source,
            s.runs,
            s.failures,
            s.success_rate(),
            s.avg_duration_ms
        );
    }
    println!("performance:");
    for m in &report.performance {
        println!(
            "  {:<12} latency avg {:.0} ms  throughput avg {:.1}/s  lock waits {}",
            m.source, m.avg_latency_ms, m.avg_throughput, m.total_lock_waits
        );
    }
    if report.issues.is_empty() {
        println!("no issues");
    } else {
        println!("issues:");
        for issue in &report.issues {
            println!("  {:<12} {:?}: {}", issue.source, issue.kind, issue.message);
        }
    }
    Ok(())
}

fn parse_granularity(arg: Option<&str>, pipeline: &Pipeline) -> Result<Granularity> {
    Ok(match arg {
        Some(value) => value.parse()?,
        None => pipeline.default_granularity(),
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
