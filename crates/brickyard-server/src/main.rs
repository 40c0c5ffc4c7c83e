use brickyard_core::{install_shutdown_handler, App, InstanceLock, ServerConfig};
use brickyard_server::{bind, serve, shutdown, FileBackupSink, ServerError, Service};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "brickyard-server",
    about = "Brickyard storage cluster control plane",
    version
)]
struct Cli {
    /// Configuration file (TOML).
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Port to listen on, overriding the configuration.
    #[arg(long)]
    port: Option<u16>,

    /// Database file, overriding the configuration.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Number of HTTP worker threads.
    #[arg(long)]
    workers: Option<usize>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("BRICKYARD_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), ServerError> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(db) = cli.db {
        config.db = db;
    }
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    config.validate()?;

    let _lock = InstanceLock::acquire(&config.lock_path())?;
    let app = App::open(&config)?;

    let mut service = Service::new(app);
    if let Some(path) = &config.backup_file {
        info!("backing up database to {} after each change", path.display());
        service = service.with_backup(Box::new(FileBackupSink::new(path.clone())));
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let server = bind(&addr)?;
    let workers = config.workers;
    {
        let server = Arc::clone(&server);
        install_shutdown_handler(move || shutdown(&server, workers));
    }

    info!("starting brickyard-server on {addr}");
    info!("database: {}", config.db.display());
    serve(&Arc::new(service), &server, workers)?;
    info!("server stopped");
    Ok(())
}
