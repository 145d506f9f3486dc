//! shop-sync CLI - load JSON-lines commerce batches into a SQL database.

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use shop_sync::{
    preview, Config, JsonLinesSource, Orchestrator, SyncError, SyncReport, TableId,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "shop-sync")]
#[command(about = "Normalize and upsert commerce API batches into SQL Server, MySQL or PostgreSQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ensure tables, seed the calendar and load a JSON-lines batch file
    Run {
        /// JSON-lines file, one page per line
        #[arg(long)]
        batches: PathBuf,

        /// Do not seed the calendar table
        #[arg(long)]
        skip_calendar: bool,
    },

    /// Seed the calendar dimension only
    Calendar {
        /// First day (YYYY-MM-DD); overrides calendar.start_date
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Days after the start to generate; overrides calendar.horizon_days
        #[arg(long)]
        horizon_days: Option<u32>,
    },

    /// Print generated DDL and merge statements without connecting
    Plan {
        /// Only this table
        #[arg(long)]
        table: Option<String>,
    },

    /// Test the database connection
    HealthCheck,
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

async fn run() -> Result<(), SyncError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Plan { table } => {
            let table = table.map(|t| t.parse::<TableId>()).transpose()?;
            let previews = preview(&config, table)?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&previews)?);
            } else {
                for p in &previews {
                    println!("-- {} ({})", p.plan.table, p.plan.dialect);
                    println!("{}\n", p.create_table);
                    println!("{}\n", p.plan.staging_ddl);
                    if let Some(probe) = &p.plan.match_probe {
                        println!("{}\n", probe);
                    }
                    println!("{}\n", p.plan.merge_statement);
                    println!("{}\n", p.plan.cleanup_statement);
                }
            }
        }

        Commands::Run {
            batches,
            skip_calendar,
        } => {
            let cancel_token = setup_signal_handler();
            let orchestrator = Orchestrator::new(config.clone()).await?;

            if config.sync.create_tables {
                orchestrator.ensure_tables().await?;
            }
            let calendar = if config.calendar.enabled && !skip_calendar {
                Some(orchestrator.seed_calendar().await?)
            } else {
                None
            };

            let pages = JsonLinesSource::open(&batches).await?.pages();
            let (mut report, fatal) = match orchestrator.run(pages, &cancel_token).await {
                Ok(report) => (report, None),
                Err(aborted) => (*aborted.report, Some(aborted.error)),
            };
            orchestrator.close().await;
            report.calendar = calendar;
            print_report(&report, cli.output_json)?;

            if let Some(e) = fatal {
                return Err(e);
            }
            if report.cancelled {
                return Err(SyncError::Cancelled);
            }
            if report.failed_merges() > 0 {
                return Err(SyncError::merge(
                    "sync",
                    format!("{} merge transactions rolled back", report.failed_merges()),
                ));
            }
        }

        Commands::Calendar {
            start,
            horizon_days,
        } => {
            if let Some(start) = start {
                config.calendar.start_date = start;
            }
            if let Some(days) = horizon_days {
                config.calendar.horizon_days = days;
            }

            let orchestrator = Orchestrator::new(config).await?;
            orchestrator
                .executor()
                .ensure_table(TableId::DateDimension)
                .await?;
            let result = orchestrator.seed_calendar().await;
            orchestrator.close().await;
            let result = result?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Calendar: {} new days, {} already present", result.inserted, result.unchanged());
            }
            if !result.committed {
                return Err(SyncError::merge(
                    TableId::DateDimension.name(),
                    result.errors.join("; "),
                ));
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.health_check().await;
            orchestrator.close().await;
            let result = result?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Target ({}): OK ({}ms)",
                    result.dialect, result.latency_ms
                );
                println!("  Namespace: {}", result.namespace);
            }
        }
    }

    Ok(())
}

fn print_report(report: &SyncReport, json: bool) -> Result<(), SyncError> {
    if json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    match &report.fatal {
        Some(reason) => println!("\nSync aborted: {}", reason),
        None => println!("\nSync completed!"),
    }
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {:.2}s", report.duration_seconds);
    println!("  Pages: {}", report.pages);
    for (table, totals) in &report.tables {
        println!(
            "  {}: {} received, {} rejected, {} inserted, {} updated, {} unchanged",
            table,
            totals.received,
            totals.rejected,
            totals.inserted,
            totals.updated,
            totals.unchanged
        );
    }
    if let Some(cal) = &report.calendar {
        if cal.committed {
            println!("  Calendar: {} new days", cal.inserted);
        } else {
            println!("  Calendar: rolled back ({})", cal.errors.join("; "));
        }
    }
    if !report.issues.is_empty() {
        println!("  Issues: {}", report.issues.len());
    }
    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT or SIGTERM.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            match signal(kind) {
                Ok(mut stream) => {
                    stream.recv().await;
                    eprintln!("\nReceived {}. Stopping after the current page...", name);
                    token.cancel();
                }
                Err(e) => warn!("Failed to install {} handler: {}", name, e),
            }
        });
    }

    cancel_token
}

/// Windows only delivers Ctrl-C.
#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping after the current page...");
            token.cancel();
        }
    });
    cancel_token
}
