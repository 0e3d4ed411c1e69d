//! relmig CLI - plan, edit and run schema and data migrations.

use clap::{Parser, Subcommand};
use relmig::pipeline::{ChannelSink, FanoutSink, LogSink};
use relmig::{Config, MigrateError, MigrationResult, Orchestrator, TaskPlan};
use std::path::PathBuf;
use std::sync::Arc;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "relmig")]
#[command(about = "Schema and data migration to DDL scripts and delimited data files")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "relmig.yaml")]
    config: PathBuf,

    /// Path to the migration script [default: <output_dir>/<prefix>_script.json]
    #[arg(long)]
    script_file: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Print run events as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the source, reconcile it and save the migration script
    Plan {
        /// Print every task of the plan
        #[arg(long)]
        tasks: bool,

        /// Merge objects added at the source into the saved script instead of re-planning
        #[arg(long)]
        refresh: bool,
    },

    /// Run the migration from the saved script (planning first if there is none)
    Run {
        /// Discard the saved script and plan again
        #[arg(long)]
        replan: bool,
    },

    /// Rename the target of a source table or column in the saved script
    Retarget {
        /// Source table as OWNER.TABLE
        table: String,

        /// New target name
        new_name: String,

        /// Retarget this source column instead of the table
        #[arg(long)]
        column: Option<String>,

        /// Move the table to another target schema
        #[arg(long)]
        schema: Option<String>,
    },

    /// List the schema files written for a target schema
    Files {
        /// Target schema [default: target.schema from the configuration]
        #[arg(long)]
        schema: Option<String>,
    },

    /// Validate data file row counts against the run manifest
    Validate,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(MigrateError::Config)?;

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    let mut orchestrator = Orchestrator::new(config)?;
    if let Some(path) = &cli.script_file {
        orchestrator = orchestrator.with_script_file(path.clone());
    }

    match cli.command {
        Commands::Plan { tasks, refresh } => {
            let (mut script, mut reconciler) = if refresh && orchestrator.script_path().exists() {
                let (script, mut reconciler) = orchestrator.load_script()?;
                let added = orchestrator.refresh(&mut reconciler).await?;
                info!("Refresh found {} new source objects", added);
                (script, reconciler)
            } else {
                orchestrator.plan().await?
            };
            let path = orchestrator.save_script(&mut script, &reconciler)?;
            let plan = TaskPlan::build(&reconciler);

            if cli.output_json {
                let summary = serde_json::json!({
                    "run_id": script.run_id,
                    "script": path,
                    "summary": reconciler.summary(),
                    "tasks": plan.counts(),
                });
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                let summary = reconciler.summary();
                println!("Migration script saved to {}", path.display());
                println!("  Run ID: {}", script.run_id);
                println!(
                    "  Tables: {} source -> {} target ({} merged)",
                    summary.table_intents, summary.target_tables, summary.merged_tables
                );
                println!("  Other objects: {}", summary.object_intents);
                for (phase, count) in plan.counts() {
                    println!("  {:<9} {} tasks", phase.as_str(), count);
                }
                if tasks {
                    println!("\n{}", plan.render());
                }
            }
        }

        Commands::Run { replan } => {
            let cancel_token = setup_signal_handler()?;
            if cli.progress {
                orchestrator = with_progress(orchestrator);
            }
            if replan {
                let (mut script, reconciler) = orchestrator.plan().await?;
                orchestrator.save_script(&mut script, &reconciler)?;
            }
            let result = orchestrator.migrate(cancel_token).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                print_result(&result);
            }
            match result.status.as_str() {
                "cancelled" => return Err(MigrateError::Cancelled),
                "failed" => {
                    return Err(MigrateError::transfer(
                        result.failed_tables.join(", "),
                        "every table failed",
                    ))
                }
                _ => {}
            }
        }

        Commands::Retarget {
            table,
            new_name,
            column,
            schema,
        } => {
            let (owner, name) = table.split_once('.').ok_or_else(|| {
                MigrateError::Config(format!("expected OWNER.TABLE, got '{}'", table))
            })?;
            let (mut script, mut reconciler) = if orchestrator.script_path().exists() {
                orchestrator.load_script()?
            } else {
                orchestrator.plan().await?
            };
            match &column {
                Some(column) => reconciler.retarget_column(owner, name, column, &new_name)?,
                None => reconciler.retarget_table(owner, name, schema.as_deref(), &new_name)?,
            }
            let path = orchestrator.save_script(&mut script, &reconciler)?;
            match column {
                Some(column) => println!("{}.{}.{} -> {}", owner, name, column, new_name),
                None => {
                    let target = reconciler
                        .table_intent(owner, name)
                        .map(|i| format!("{}.{}", i.target_owner, i.target))
                        .unwrap_or(new_name);
                    println!("{}.{} -> {}", owner, name, target);
                }
            }
            println!("Migration script saved to {}", path.display());
        }

        Commands::Files { schema } => {
            let schema = schema.unwrap_or_else(|| orchestrator.config().target.schema.clone());
            let files = orchestrator.files(&schema)?;
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&files)?);
            } else {
                for file in files {
                    println!("{}", file);
                }
            }
        }

        Commands::Validate => {
            let manifest = MigrationResult::load(orchestrator.manifest_path())?;
            let checks = orchestrator.verify_outputs(&manifest);
            let mismatched: Vec<String> = checks
                .iter()
                .filter(|c| !c.matches())
                .map(|c| c.table.clone())
                .collect();

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&checks)?);
            } else {
                for check in &checks {
                    let actual = check
                        .actual
                        .map(|n| n.to_string())
                        .unwrap_or_else(|| "missing".into());
                    let tag = if check.matches() { "match" } else { "MISMATCH" };
                    println!("  {}: {} / {} ({})", check.table, check.expected, actual, tag);
                }
            }
            if !mismatched.is_empty() {
                return Err(MigrateError::transfer(
                    mismatched.join(", "),
                    "data file row count does not match the manifest",
                ));
            }
            println!("Validation completed successfully");
        }
    }

    Ok(())
}

/// Mirror run events to stderr as JSON lines, next to the log output.
fn with_progress(orchestrator: Orchestrator) -> Orchestrator {
    let (sink, mut rx) = ChannelSink::new();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if let Ok(line) = serde_json::to_string(&event) {
                eprintln!("{}", line);
            }
        }
    });
    let events = FanoutSink::new().with(Arc::new(LogSink)).with(Arc::new(sink));
    orchestrator.with_events(Arc::new(events))
}

fn print_result(result: &MigrationResult) {
    println!("\nMigration {}!", result.status);
    println!("  Run ID: {}", result.run_id);
    println!("  Duration: {:.2}s", result.duration_seconds);
    println!("  Tables: {}/{}", result.tables_success, result.tables_total);
    println!("  Rows: {}", result.rows_transferred);
    println!("  Throughput: {} rows/sec", result.rows_per_second);
    if result.record_errors > 0 {
        println!("  Record errors: {}", result.record_errors);
        if let Some(path) = &result.error_file {
            println!("  Error file: {}", path.display());
        }
    }
    if !result.failed_tables.is_empty() {
        println!("  Failed tables: {:?}", result.failed_tables);
    }
    for advisory in &result.advisories {
        println!("  Advisory: {}", advisory);
    }
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = verbosity.to_lowercase();
    if !matches!(level.as_str(), "debug" | "info" | "warn" | "error") {
        return Err(format!("unknown verbosity '{}'", verbosity));
    }
    // RUST_LOG wins over --verbosity.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("unknown log format '{}'", other)),
    }

    Ok(())
}

/// Cancel the returned token on SIGINT or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!("\nReceived {}. Finishing in-flight batches...", name);
        token.cancel();
    });

    Ok(cancel_token)
}

/// Cancel the returned token on Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing in-flight batches...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
