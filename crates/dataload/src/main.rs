//! `dataload` binary: runs the pipeline or inspects its admin tables.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dataload::output::{error_rows, print_table, profile_rows, ERROR_HEADERS, PROFILE_HEADERS};
use dataload::{Pipeline, PipelineConfig, ShutdownToken};
use dataload_db::{AdminLog, DbConnection};
use dataload_logging::{init_logging, LogConfig};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "dataload", about = "Folder-watching ingestion into DuckDB tables")]
struct Cli {
    /// Pipeline config file (TOML)
    #[arg(long, global = true, env = "DATALOAD_CONFIG")]
    config: Option<PathBuf>,

    /// Watched root, overrides the config file
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Database path, overrides the config file
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Log file directory, defaults to `~/.dataload/logs`
    #[arg(long, global = true, env = "DATALOAD_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Watch the root until SIGINT/SIGTERM
    Run,
    /// One discovery pass; wait for the workers it started, then exit
    Once,
    /// Recent load profiles
    Log {
        /// Only this target table
        #[arg(long)]
        table: Option<String>,

        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Recent error log entries
    Errors {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => {
            let root = cli
                .root
                .clone()
                .context("No config file given; pass --config or --root")?;
            PipelineConfig::new(root)
        }
    };
    if let Some(root) = &cli.root {
        config.root = root.clone();
    }
    if let Some(database) = &cli.database {
        config.database_path = database.clone();
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn install_signal_handlers(token: &ShutdownToken) -> Result<()> {
    let flag = token.flag();

    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals =
            Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handlers")?;
        std::thread::spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("Received signal {}, initiating shutdown...", sig);
                flag.store(true, Ordering::SeqCst);
            }
        });
    }

    #[cfg(windows)]
    {
        ctrlc::set_handler(move || {
            info!("Received Ctrl+C, initiating shutdown...");
            flag.store(true, Ordering::SeqCst);
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run => {
            let mut pipeline = Pipeline::open(config).context("Failed to start pipeline")?;
            install_signal_handlers(&pipeline.shutdown_token())?;
            let reports = pipeline.run();
            info!(workers = reports.len(), "all workers finished");
            pipeline.shutdown();
        }
        Commands::Once => {
            let mut pipeline = Pipeline::open(config).context("Failed to start pipeline")?;
            let reports = pipeline.run_once().context("Discovery pass failed")?;
            for report in &reports {
                println!(
                    "{}: {} loaded ({} rows), {} duplicate, {} chunked, {} skipped, {} failed",
                    report.table,
                    report.loaded,
                    report.rows,
                    report.duplicates,
                    report.chunked,
                    report.skipped,
                    report.failed
                );
            }
            pipeline.shutdown();
        }
        Commands::Log { table, limit } => {
            let conn = DbConnection::open_duckdb_readonly(&config.database_path)
                .with_context(|| format!("Failed to open {}", config.database_path.display()))?;
            let profiles = AdminLog::new(config.admin_schema.clone())
                .recent_profiles(&conn, table.as_deref(), limit)
                .context("Failed to read load profiles")?;
            print_table(PROFILE_HEADERS, profile_rows(&profiles));
        }
        Commands::Errors { limit } => {
            let conn = DbConnection::open_duckdb_readonly(&config.database_path)
                .with_context(|| format!("Failed to open {}", config.database_path.display()))?;
            let errors = AdminLog::new(config.admin_schema.clone())
                .recent_errors(&conn, limit)
                .context("Failed to read error log")?;
            print_table(ERROR_HEADERS, error_rows(&errors));
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "dataload",
        verbose: cli.verbose,
        log_dir: cli.log_dir.clone(),
    }) {
        eprintln!("Failed to initialize logging: {err:#}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
