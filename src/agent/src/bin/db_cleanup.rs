//! Command line tool for cleaning and verifying test databases
//!
//! # Usage
//!
//! ```bash
//! # Clean every backend with an endpoint in the config file
//! db-cleanup --config cleanup.yaml cleanup
//!
//! # Clean only Redis and Qdrant using the CI profile, then verify
//! db-cleanup --profile ci --databases key_value,vector_index cleanup --verify
//!
//! # Verify and export JSON + JUnit reports
//! db-cleanup verify --format json,junit --output target/cleanup-reports
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cleanup_agent::{
    init_logging, AgentConfig, CleanupOrchestrator, CleanupVerifier, ReportFormat,
    ReportGenerator, ReportOptions, VerificationReport,
};
use cleanup_database::memory::{
    MemoryDocumentDriver, MemoryKeyValueDriver, MemoryRelationalDriver, MemoryVectorDriver,
};
use cleanup_database::{
    CleanupStrategy, DocumentCleanupStrategy, DocumentDriver, KeyValueCleanupStrategy,
    KeyValueDriver, MongoDriver, PostgresDriver, QdrantDriver, RedisDriver,
    RelationalCleanupStrategy, RelationalDriver, VectorCleanupStrategy, VectorDriver,
};
use cleanup_shared::{BackendKind, CleanupResult, Profile};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Test database cleanup tool
#[derive(Parser)]
#[command(name = "db-cleanup")]
#[command(about = "Clean, reset and verify test databases")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, env = "DB_CLEANUP_CONFIG")]
    config: Option<PathBuf>,

    /// Environment profile (development, test, ci, performance)
    #[arg(short, long)]
    profile: Option<Profile>,

    /// Backends to target, comma separated
    #[arg(short, long, value_delimiter = ',')]
    databases: Vec<BackendKind>,

    /// Report formats, comma separated
    #[arg(short, long, value_delimiter = ',', default_value = "console")]
    format: Vec<ReportFormat>,

    /// Write reports into this directory instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Emit JSON log lines
    #[arg(long)]
    json_logs: bool,

    /// Use empty in-memory backends instead of real connections
    #[arg(long)]
    dry_run: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Remove test data from the selected backends
    Cleanup {
        /// Verify after cleaning
        #[arg(long)]
        verify: bool,
    },

    /// Return the selected backends to their baseline state
    Reset {
        /// Verify after resetting
        #[arg(long)]
        verify: bool,
    },

    /// Check that the selected backends are clean
    Verify,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = AgentConfig::load(cli.config.as_deref())
        .context("Failed to load cleanup configuration")?;
    if let Some(profile) = cli.profile {
        config.profile = profile;
    }
    if !cli.databases.is_empty() {
        config.databases = cli.databases.clone();
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    if !cli.dry_run {
        config.validate()?;
    }

    let cleanup_config = config.cleanup_config();
    init_logging(&config.logging, cleanup_config.options.log_level)?;

    let targets = if cli.dry_run && config.databases.is_empty() {
        BackendKind::ALL.to_vec()
    } else {
        config.target_backends()
    };
    if targets.is_empty() {
        bail!("No backends selected: configure endpoints or pass --databases");
    }

    info!(
        profile = %config.profile,
        backends = ?targets,
        dry_run = cli.dry_run,
        "Starting db-cleanup"
    );

    let mut orchestrator = CleanupOrchestrator::with_config(cleanup_config)?;
    for kind in &targets {
        let strategy = if cli.dry_run {
            memory_strategy(*kind, &config)
        } else {
            connect_strategy(*kind, &config)
                .await
                .with_context(|| format!("Failed to connect to {} backend", kind))?
        };
        orchestrator.register(strategy);
    }
    let orchestrator = Arc::new(orchestrator);

    let (results, verify) = match cli.command {
        Commands::Cleanup { verify } => (
            Some(orchestrator.execute_cleanup(Some(targets.as_slice()), None).await?),
            verify,
        ),
        Commands::Reset { verify } => (
            Some(orchestrator.execute_reset(Some(targets.as_slice()), None).await?),
            verify,
        ),
        Commands::Verify => (None, true),
    };

    let mut failed = false;
    if let Some(results) = &results {
        print_results(results);
        failed = results.iter().any(|r| !r.success);
    }

    if verify {
        let verifier = CleanupVerifier::new(orchestrator.clone())
            .with_thresholds(config.thresholds.clone());
        let report = verifier.verify(Some(targets.as_slice()), None).await?;
        emit_reports(&report, &cli.format, cli.output.as_ref()).await?;

        if !report.is_clean() {
            warn!(dirty = ?report.dirty_backends(), "Verification found issues");
            failed = true;
        }
    }

    if failed {
        error!("db-cleanup finished with failures");
        std::process::exit(1);
    }

    info!("db-cleanup finished");
    Ok(())
}

async fn connect_strategy(kind: BackendKind, config: &AgentConfig) -> Result<Arc<dyn CleanupStrategy>> {
    let endpoints = &config.endpoints;
    let url = endpoints
        .url(kind)
        .with_context(|| format!("No endpoint configured for {}", kind))?;
    let pool_size = config.profile.pool_size();
    let strategies = &config.strategies;

    let strategy: Arc<dyn CleanupStrategy> = match kind {
        BackendKind::Relational => {
            let driver = PostgresDriver::connect(url, pool_size)
                .await?
                .with_schema(endpoints.postgres_schema.clone());
            Arc::new(
                RelationalCleanupStrategy::new(Arc::new(driver) as Arc<dyn RelationalDriver>)
                    .with_config(strategies.relational.clone()),
            )
        }
        BackendKind::Document => {
            let driver = MongoDriver::connect(url, &endpoints.mongodb_database, pool_size).await?;
            Arc::new(
                DocumentCleanupStrategy::new(Arc::new(driver) as Arc<dyn DocumentDriver>)
                    .with_config(strategies.document.clone()),
            )
        }
        BackendKind::KeyValue => {
            let driver = RedisDriver::connect(url).await?;
            Arc::new(
                KeyValueCleanupStrategy::new(Arc::new(driver) as Arc<dyn KeyValueDriver>)
                    .with_config(strategies.key_value.clone()),
            )
        }
        BackendKind::VectorIndex => {
            let mut driver = QdrantDriver::new(url)?;
            if let Some(api_key) = &endpoints.qdrant_api_key {
                driver = driver.with_api_key(api_key.clone());
            }
            Arc::new(
                VectorCleanupStrategy::new(Arc::new(driver) as Arc<dyn VectorDriver>)
                    .with_config(strategies.vector.clone()),
            )
        }
    };
    Ok(strategy)
}

fn memory_strategy(kind: BackendKind, config: &AgentConfig) -> Arc<dyn CleanupStrategy> {
    let strategies = &config.strategies;
    match kind {
        BackendKind::Relational => Arc::new(
            RelationalCleanupStrategy::new(Arc::new(MemoryRelationalDriver::new()))
                .with_config(strategies.relational.clone()),
        ),
        BackendKind::Document => Arc::new(
            DocumentCleanupStrategy::new(Arc::new(MemoryDocumentDriver::new()))
                .with_config(strategies.document.clone()),
        ),
        BackendKind::KeyValue => Arc::new(
            KeyValueCleanupStrategy::new(Arc::new(MemoryKeyValueDriver::new()))
                .with_config(strategies.key_value.clone()),
        ),
        BackendKind::VectorIndex => Arc::new(
            VectorCleanupStrategy::new(Arc::new(MemoryVectorDriver::new()))
                .with_config(strategies.vector.clone()),
        ),
    }
}

fn print_results(results: &[CleanupResult]) {
    println!("\n🧹 Cleanup Results");
    println!("==================");
    for result in results {
        let status = if result.success { "✅" } else { "❌" };
        println!(
            "{} {:<13} removed {:>8} in {:>6}ms",
            status, result.database, result.records_removed, result.duration_ms
        );
        for failure in result.errors.iter().flatten() {
            match &failure.target {
                Some(target) => println!("   - [{}] {}: {}", failure.kind, target, failure.message),
                None => println!("   - [{}] {}", failure.kind, failure.message),
            }
        }
        for warning in result.warnings.iter().flatten() {
            println!("   ⚠️  {}", warning);
        }
    }
}

async fn emit_reports(
    report: &VerificationReport,
    formats: &[ReportFormat],
    output: Option<&PathBuf>,
) -> Result<()> {
    match output {
        Some(directory) => {
            let generator = ReportGenerator::new(ReportOptions {
                colorize: false,
                ..Default::default()
            });
            for path in generator.export(report, directory, formats).await? {
                println!("📄 Report written to {}", path.display());
            }
        }
        None => {
            for format in formats {
                let generator = ReportGenerator::new(ReportOptions::new(*format));
                println!("{}", generator.render(report)?);
            }
        }
    }
    Ok(())
}
