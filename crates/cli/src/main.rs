use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use coalesce_analyzer::{ExternalAnalyzer, HttpAnalyzer, NoopAnalyzer};
use coalesce_audit::{AuditOp, AuditStore, ReviewDecision, TaskPriority};
use coalesce_config::AppConfig;
use coalesce_engine::{DedupPipeline, DedupResult, PipelineError};

const EXIT_ANALYSIS_FAILURE: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_CANCELLED: u8 = 130;

#[derive(Debug, Parser)]
#[command(
    name = "coalesce",
    version,
    about = "Entity resolution and deduplication engine"
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, default_value = "coalesce.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Analyze record collections for duplicate pairs.
    Analyze {
        /// JSON file holding either an array of records or a map of
        /// collection name to record arrays.
        input: PathBuf,
        /// Collection name used when the input is a bare array.
        #[arg(long, default_value = "documents")]
        collection: String,
        /// Skip the external analyzer even when one is configured.
        #[arg(long)]
        no_external: bool,
        /// Emit the full result as JSON instead of a summary.
        #[arg(long)]
        json: bool,
    },
    /// Manage review tasks.
    Review {
        #[command(subcommand)]
        command: ReviewCommands,
    },
    /// Show audit history.
    History {
        #[arg(long)]
        collection: Option<String>,
        /// Filter by operation: merge, separate, review_completed, rollback.
        #[arg(long)]
        op: Option<String>,
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
    /// Append a rollback record for a previous operation.
    Rollback {
        audit_id: Uuid,
        #[arg(long, default_value = "operator request")]
        reason: String,
    },
    /// Store counters and quality summary.
    Stats {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
}

#[derive(Debug, Subcommand)]
enum ReviewCommands {
    /// List pending tasks, oldest first.
    List {
        #[arg(long)]
        reviewer: Option<String>,
        /// Filter by priority: high, medium, low.
        #[arg(long)]
        priority: Option<String>,
    },
    /// Assign a pending task to a reviewer.
    Assign { task_id: Uuid, reviewer: String },
    /// Complete an in-progress task with a decision.
    Complete {
        task_id: Uuid,
        reviewer: String,
        /// One of: merge, separate, defer, more_info.
        decision: String,
        #[arg(long, default_value_t = 80.0)]
        confidence: f64,
        #[arg(long)]
        notes: Option<String>,
    },
    /// Cancel a pending task.
    Cancel { task_id: Uuid },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load_from(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.telemetry.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli, config).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_ANALYSIS_FAILURE)
        }
    }
}

async fn run(cli: Cli, config: AppConfig) -> Result<ExitCode> {
    let store = Arc::new(AuditStore::open(&config.audit.db_path)?);

    match cli.command {
        Commands::Analyze {
            input,
            collection,
            no_external,
            json,
        } => analyze(&config, store, &input, &collection, no_external, json).await,
        Commands::Review { command } => review(store, command),
        Commands::History { collection, op, days } => {
            let op = match op {
                None => None,
                Some(raw) => match AuditOp::parse(&raw) {
                    Some(op) => Some(op),
                    None => bail!("unknown operation: {raw}"),
                },
            };
            let records = store.history(collection.as_deref(), op, days)?;
            println!("{} audit records in the last {days} days", records.len());
            for record in records {
                println!(
                    "{}  {:<17} {:<12} actor={} confidence={:.1} entities={}",
                    record.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    record.op.slug(),
                    record.collection,
                    record.actor,
                    record.confidence,
                    record.entity_ids.join(","),
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Rollback { audit_id, reason } => {
            if store.rollback(audit_id, &reason)? {
                println!("rolled back {audit_id}");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("audit record {audit_id} not found");
                Ok(ExitCode::from(EXIT_ANALYSIS_FAILURE))
            }
        }
        Commands::Stats { days } => {
            let stats = store.stats()?;
            let summary = store.quality_summary(days)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "store": stats,
                    "quality": summary,
                }))?
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn analyze(
    config: &AppConfig,
    store: Arc<AuditStore>,
    input: &PathBuf,
    collection: &str,
    no_external: bool,
    json: bool,
) -> Result<ExitCode> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("reading {}", input.display()))?;
    let parsed: serde_json::Value =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", input.display()))?;

    let collections: BTreeMap<String, Vec<serde_json::Value>> = match parsed {
        serde_json::Value::Array(records) => {
            BTreeMap::from([(collection.to_string(), records)])
        }
        serde_json::Value::Object(map) => {
            let mut collections = BTreeMap::new();
            for (name, value) in map {
                match value {
                    serde_json::Value::Array(records) => {
                        collections.insert(name, records);
                    }
                    _ => bail!("collection {name} is not an array of records"),
                }
            }
            collections
        }
        _ => bail!("input must be a record array or a map of collections"),
    };

    let analyzer: Arc<dyn ExternalAnalyzer> = match &config.analyzer.endpoint {
        Some(endpoint) => Arc::new(
            HttpAnalyzer::new(endpoint.clone(), config.dedup.max_external_rate_per_min)
                .with_timeout(Duration::from_secs(config.analyzer.timeout_secs())),
        ),
        None => Arc::new(NoopAnalyzer),
    };

    let pipeline = match DedupPipeline::new(config, store, analyzer) {
        Ok(pipeline) => pipeline,
        Err(PipelineError::Config(message)) => {
            eprintln!("configuration error: {message}");
            return Ok(ExitCode::from(EXIT_CONFIG_ERROR));
        }
        Err(err) => return Err(err.into()),
    };

    let cancel = pipeline.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling analysis");
            cancel.cancel();
        }
    });

    let results = pipeline.analyze_all(&collections, !no_external).await?;
    let cancelled = results.values().any(|r| r.cancelled);

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in results.values() {
            print_summary(result);
        }
    }

    if cancelled {
        eprintln!("analysis cancelled; results above are partial");
        return Ok(ExitCode::from(EXIT_CANCELLED));
    }
    Ok(ExitCode::SUCCESS)
}

fn print_summary(result: &DedupResult) {
    println!(
        "{}: {} records ({} skipped), {} candidate pairs in {} ms",
        result.collection,
        result.total_records,
        result.skipped_records,
        result.candidate_pairs,
        result.processing_ms,
    );
    println!(
        "  classified: auto-merge {}, review {}, low {}, rejected {}",
        result.auto_merge.len(),
        result.review.len(),
        result.low.len(),
        result.rejected.len(),
    );
    println!(
        "  actions: {} tasks created, {} merges executed, {} merges failed, {} pairs unprocessed",
        result.review_tasks_created, result.auto_merged, result.failed_merges, result.failed_pairs,
    );
    let dist = &result.confidence_distribution;
    println!(
        "  confidence: >=90 {} | 70-90 {} | 50-70 {} | <50 {}",
        dist.high, dist.medium, dist.low, dist.very_low,
    );
}

fn review(store: Arc<AuditStore>, command: ReviewCommands) -> Result<ExitCode> {
    match command {
        ReviewCommands::List { reviewer, priority } => {
            let priority = match priority {
                None => None,
                Some(raw) => match TaskPriority::parse(&raw) {
                    Some(priority) => Some(priority),
                    None => bail!("unknown priority: {raw}"),
                },
            };
            let tasks = store.list_pending(reviewer.as_deref(), priority)?;
            println!("{} pending tasks", tasks.len());
            for task in tasks {
                println!(
                    "{}  {:<8} {:<12} created {}  confidence {}",
                    task.task_id,
                    task.priority.slug(),
                    task.collection,
                    task.created_at.format("%Y-%m-%d %H:%M:%S"),
                    task.pair_payload
                        .get("confidence")
                        .and_then(serde_json::Value::as_f64)
                        .map(|c| format!("{c:.1}"))
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        ReviewCommands::Assign { task_id, reviewer } => {
            if store.assign(task_id, &reviewer)? {
                println!("assigned {task_id} to {reviewer}");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("task {task_id} is not available for assignment");
                Ok(ExitCode::from(EXIT_ANALYSIS_FAILURE))
            }
        }
        ReviewCommands::Complete {
            task_id,
            reviewer,
            decision,
            confidence,
            notes,
        } => {
            let Some(decision) = ReviewDecision::parse(&decision) else {
                bail!("unknown decision: {decision}");
            };
            if store.complete(task_id, &reviewer, decision, confidence, notes)? {
                println!("completed {task_id} with decision {}", decision.slug());
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("task {task_id} is not completable by {reviewer}");
                Ok(ExitCode::from(EXIT_ANALYSIS_FAILURE))
            }
        }
        ReviewCommands::Cancel { task_id } => {
            if store.cancel_task(task_id)? {
                println!("cancelled {task_id}");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("task {task_id} is not cancellable");
                Ok(ExitCode::from(EXIT_ANALYSIS_FAILURE))
            }
        }
    }
}
