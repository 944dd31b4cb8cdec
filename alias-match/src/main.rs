//! alias-match - chain alias resolution CLI
//!
//! Resolves rows of full chain names to registry aliases, records reviewer
//! confirmations, audits finished runs and curates the registry.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use alias_common::config::TomlConfig;
use alias_match::config::{load_match_config, resolve_proposal_api_key, MatchConfig};
use alias_match::db::{self, SqliteStore};
use alias_match::models::AliasRecord;
use alias_match::services::feedback::{analyze_patterns, suggest_improvements};
use alias_match::services::ingest::{read_confirmations, read_rows, write_rows, RowKind};
use alias_match::services::proposal_client::LlmClientSettings;
use alias_match::services::verification::{curate, persist_verified};
use alias_match::services::{
    build_backend, FeedbackEngine, FeedbackSettings, LlmProposalClient, MatchSession, Registry,
};
use alias_match::utils::PartitionNormalizer;
use alias_match::validators::{AuditReport, AuditThresholds, QualityAuditor};

/// Command-line arguments for alias-match
#[derive(Parser, Debug)]
#[command(name = "alias-match")]
#[command(about = "Resolve chain names to verified registry aliases")]
#[command(version)]
struct Args {
    /// TOML config file
    #[arg(short, long, global = true, env = "ALIAS_MATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding the database
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve a file of rows and audit the result
    Resolve {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        /// Session id recorded with later confirmations (random by default)
        #[arg(long)]
        session_id: Option<String>,
        /// Write the audit report here as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Append reviewer confirmations, then print session performance
    Feedback {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Audit an output file against its input
    Audit {
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Feedback statistics for one partition
    Stats {
        #[arg(short, long)]
        partition: String,
    },
    /// Registry maintenance
    Registry {
        #[command(subcommand)]
        command: RegistryCommand,
    },
    /// Persistent settings
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum RegistryCommand {
    /// Import alias records from a JSON array
    Import {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Verify candidate aliases and register the verified ones
    Curate {
        #[arg(short, long)]
        partition: String,
        /// JSON array of candidate alias strings
        #[arg(long)]
        candidates: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum SettingsCommand {
    /// Store the proposal API key in the database
    SetApiKey { key: String },
}

struct Runtime {
    toml: TomlConfig,
    config: MatchConfig,
    pool: SqlitePool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml = alias_common::config::load_toml_config_or_default(args.config.as_deref())
        .context("Failed to load TOML config")?;
    init_tracing(&toml)?;

    let config = load_match_config(args.config.as_deref()).context("Failed to load match config")?;

    let root_folder = alias_common::config::resolve_root_folder(args.root_folder.as_deref(), &toml);
    let db_path = alias_common::config::database_path(&root_folder);
    info!("Database: {}", db_path.display());

    let pool = alias_common::db::init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let ctx = Runtime { toml, config, pool };

    match args.command {
        Command::Resolve {
            input,
            output,
            session_id,
            report,
        } => resolve(&ctx, &input, &output, session_id, report.as_deref()).await,
        Command::Feedback { input } => feedback(&ctx, &input).await,
        Command::Audit { input, output } => audit(&ctx, &input, &output).await,
        Command::Stats { partition } => stats(&ctx, &partition).await,
        Command::Registry {
            command: RegistryCommand::Import { input },
        } => registry_import(&ctx, &input).await,
        Command::Registry {
            command: RegistryCommand::Curate { partition, candidates },
        } => registry_curate(&ctx, &partition, &candidates).await,
        Command::Settings {
            command: SettingsCommand::SetApiKey { key },
        } => {
            db::settings::set_proposal_api_key(&ctx.pool, key)
                .await
                .context("Failed to store API key")?;
            info!("Proposal API key stored in database");
            Ok(())
        }
    }
}

/// `RUST_LOG` wins; otherwise the TOML `[logging] level`
fn init_tracing(toml: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&toml.logging.level));

    match &toml.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(std::sync::Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn load_registry(ctx: &Runtime, store: &SqliteStore) -> Result<Registry> {
    Registry::load(store, PartitionNormalizer::new(&ctx.config.partition))
        .await
        .context("Failed to load registry")
}

fn fail_on_violations(report: &AuditReport) -> Result<()> {
    if report.passed {
        return Ok(());
    }
    for violation in &report.violations {
        warn!("{}", violation);
    }
    anyhow::bail!("Audit failed with {} violation(s)", report.violations.len())
}

async fn resolve(
    ctx: &Runtime,
    input: &Path,
    output: &Path,
    session_id: Option<String>,
    report_path: Option<&Path>,
) -> Result<()> {
    let rows = read_rows(input, RowKind::Input)
        .with_context(|| format!("Failed to read rows from {}", input.display()))?;

    let store = Arc::new(
        SqliteStore::from_settings(ctx.pool.clone())
            .await
            .context("Failed to read store settings")?,
    );
    let registry = load_registry(ctx, store.as_ref()).await?;
    let engine = FeedbackEngine::new(
        store,
        registry.normalizer().clone(),
        FeedbackSettings::from(&ctx.config.matching),
    );

    let api_key = resolve_proposal_api_key(&ctx.pool, &ctx.toml, &ctx.config).await?;
    let client = LlmProposalClient::new(LlmClientSettings::from_config(
        &ctx.config.proposal,
        api_key,
        Duration::from_secs(ctx.config.matching.proposal_timeout_secs),
    ))
    .context("Failed to build proposal client")?;

    // Ctrl+C stops new proposal groups; finished groups are still written
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, finishing in-flight groups");
            on_signal.cancel();
        }
    });

    let mut session = MatchSession::new(&registry, &engine, &client, &ctx.config).with_cancellation(cancel);
    if let Some(id) = session_id {
        session = session.with_session_id(id);
    }

    let outcome = session.run(rows).await.context("Resolution failed")?;

    write_rows(output, &outcome.entries)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    info!(
        session_id = %outcome.session_id,
        output = %output.display(),
        "Results written"
    );

    if let Some(path) = report_path {
        std::fs::write(path, serde_json::to_string_pretty(&outcome.audit)?)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
    }

    print_json(&outcome.reports)?;
    fail_on_violations(&outcome.audit)
}

async fn feedback(ctx: &Runtime, input: &Path) -> Result<()> {
    let drafts = read_confirmations(input)
        .with_context(|| format!("Failed to read confirmations from {}", input.display()))?;

    let store = Arc::new(SqliteStore::from_settings(ctx.pool.clone()).await?);
    let engine = FeedbackEngine::new(
        store,
        PartitionNormalizer::new(&ctx.config.partition),
        FeedbackSettings::from(&ctx.config.matching),
    );

    let written = engine.ingest(drafts).await.context("Feedback ingest failed")?;
    let snapshots = engine.evaluate(&written).await?;

    #[derive(Serialize)]
    struct FeedbackSummary<'a> {
        recorded: usize,
        snapshots: &'a [alias_match::services::feedback::PerformanceSnapshot],
        suggestions: Vec<String>,
    }

    print_json(&FeedbackSummary {
        recorded: written.len(),
        snapshots: &snapshots,
        suggestions: suggest_improvements(&written),
    })
}

async fn audit(ctx: &Runtime, input: &Path, output: &Path) -> Result<()> {
    let before = read_rows(input, RowKind::Input)
        .with_context(|| format!("Failed to read rows from {}", input.display()))?;
    let after = read_rows(output, RowKind::Output)
        .with_context(|| format!("Failed to read rows from {}", output.display()))?;

    let store = SqliteStore::new(ctx.pool.clone());
    let registry = load_registry(ctx, &store).await?;

    let report = QualityAuditor::with_thresholds(&registry, AuditThresholds::from(&ctx.config.audit))
        .audit(&before, &after);

    print_json(&report)?;
    fail_on_violations(&report)
}

async fn stats(ctx: &Runtime, partition: &str) -> Result<()> {
    let store = Arc::new(SqliteStore::new(ctx.pool.clone()));
    let engine = FeedbackEngine::new(
        store,
        PartitionNormalizer::new(&ctx.config.partition),
        FeedbackSettings::from(&ctx.config.matching),
    );

    let history = engine.history(partition).await?;

    #[derive(Serialize)]
    struct Stats {
        patterns: alias_match::services::feedback::PatternSummary,
        suggestions: Vec<String>,
    }

    print_json(&Stats {
        patterns: analyze_patterns(&history),
        suggestions: suggest_improvements(&history),
    })
}

async fn registry_import(ctx: &Runtime, input: &Path) -> Result<()> {
    let content = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let records: Vec<AliasRecord> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid alias records in {}", input.display()))?;

    let normalizer = PartitionNormalizer::new(&ctx.config.partition);
    let mut inserted = 0;
    let mut skipped = 0;
    for mut record in records {
        record.partition = normalizer.normalize(&record.partition);
        record.alias_text = record.alias_text.trim().to_string();
        if record.alias_text.is_empty() || record.partition.is_empty() {
            warn!(partition = %record.partition, "Skipping alias record with empty field");
            skipped += 1;
            continue;
        }
        if db::registry::insert_alias(&ctx.pool, &record).await? {
            inserted += 1;
        } else {
            skipped += 1;
        }
    }

    info!(inserted, skipped, "Registry import complete");
    Ok(())
}

async fn registry_curate(ctx: &Runtime, partition: &str, candidates: &Path) -> Result<()> {
    let content = std::fs::read_to_string(candidates)
        .with_context(|| format!("Failed to read {}", candidates.display()))?;
    let names: Vec<String> = serde_json::from_str(&content)
        .with_context(|| format!("Expected a JSON array of strings in {}", candidates.display()))?;

    let store = SqliteStore::new(ctx.pool.clone());
    let registry = load_registry(ctx, &store).await?;
    let partition = registry.normalize(partition);
    let backend = build_backend(&ctx.config, registry)?;

    let outcomes = curate(
        backend.as_ref(),
        &partition,
        names,
        ctx.config.matching.concurrency,
        Duration::from_secs(ctx.config.matching.verification_timeout_secs),
        &ctx.config.retry,
    )
    .await;

    let inserted = persist_verified(&ctx.pool, &outcomes, backend.name()).await?;
    info!(
        partition = %partition,
        candidates = outcomes.len(),
        verified = outcomes.iter().filter(|o| o.is_verified()).count(),
        inserted,
        "Curation complete"
    );

    print_json(&outcomes)
}
