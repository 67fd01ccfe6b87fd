use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dotenvy::dotenv;
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ingest_runtime::{
    App,
    config::load_config,
    import::{ImportSelection, load_rules},
    pipeline::{IngestJob, IngestionWorker},
};

#[derive(Debug, Parser)]
#[command(name = "ingest", about = "Document ingestion pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Index files in the input directory that were not queued yet.
    Scan,
    /// Index files in place, tracking them in the file registry.
    Enqueue { paths: Vec<PathBuf> },
    /// Index files through temporary copies.
    InsertFile {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Copy a file into the input directory and index it.
    Upload { path: PathBuf },
    InsertText {
        #[arg(required = true)]
        texts: Vec<String>,
        #[arg(long = "source")]
        sources: Vec<String>,
        #[arg(long = "id")]
        ids: Vec<String>,
    },
    /// Drop every storage and delete all input files.
    Clear,
    ClearCache {
        #[arg(long = "mode")]
        modes: Vec<String>,
    },
    Status,
    Documents,
    Import(ImportArgs),
    /// Scan periodically until interrupted.
    Watch {
        #[arg(long, default_value_t = 30)]
        interval: u64,
    },
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[arg(long)]
    batch_size: Option<usize>,
    #[arg(long, default_value_t = 0)]
    start: usize,
    #[arg(long)]
    limit: Option<usize>,
    #[arg(long)]
    workers: Option<usize>,
    #[arg(long)]
    data_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(error = %err, "ingest failed");
        eprintln!("ingest failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_tracing();
    if let Err(err) = dotenv() {
        info!(error = %err, "no .env file loaded");
    }

    let cli = Cli::parse();
    let config = load_config()
        .await
        .context("Failed to load application configuration")?;
    let app = App::bootstrap(config).await?;

    let result = execute(&app, cli.command).await;
    let shutdown = app.shutdown().await;
    result?;
    shutdown
}

async fn execute(app: &App, command: Command) -> Result<()> {
    let pipeline = &app.pipeline;
    match command {
        Command::Scan => print_json(&pipeline.scan_for_new_files().await?),
        Command::Enqueue { paths } => {
            let mut responses = Vec::with_capacity(paths.len());
            for path in paths {
                responses.push(pipeline.enqueue_file(path).await?);
            }
            print_json(&responses)
        }
        Command::InsertFile { paths } => {
            let mut files = Vec::with_capacity(paths.len());
            for path in &paths {
                files.push((file_name(path)?, read_file(path).await?));
            }
            let response = if files.len() == 1 {
                let (name, bytes) = files.remove(0);
                pipeline.insert_file(&name, &bytes).await?
            } else {
                pipeline.insert_files(files).await?
            };
            print_json(&response)
        }
        Command::Upload { path } => {
            let bytes = read_file(&path).await?;
            print_json(&pipeline.upload_file(&file_name(&path)?, &bytes).await?)
        }
        Command::InsertText {
            texts,
            sources,
            ids,
        } => {
            let sources = (!sources.is_empty()).then_some(sources);
            let ids = (!ids.is_empty()).then_some(ids);
            print_json(&pipeline.enqueue_texts(texts, sources, ids).await?)
        }
        Command::Clear => print_json(&pipeline.clear_all().await),
        Command::ClearCache { modes } => print_json(&pipeline.clear_cache(Some(modes)).await?),
        Command::Status => print_json(&pipeline.get_status()),
        Command::Documents => print_json(&pipeline.list_documents().await?),
        Command::Import(args) => import(app, args).await,
        Command::Watch { interval } => watch(app, Duration::from_secs(interval.max(1))).await,
    }
}

async fn import(app: &App, args: ImportArgs) -> Result<()> {
    let settings = &app.config.import;
    let data_file = args.data_file.unwrap_or_else(|| settings.data_file.clone());
    let selection = ImportSelection {
        start: args.start,
        limit: args.limit,
        allowed_authorities: settings.allowed_authorities.clone(),
    };

    let rules = load_rules(&data_file, &selection).await?;
    let results = app
        .importer()
        .import(
            rules,
            args.batch_size.unwrap_or(settings.batch_size),
            args.workers.unwrap_or(settings.workers),
        )
        .await;
    print_json(&results)
}

async fn watch(app: &App, interval: Duration) -> Result<()> {
    let token = CancellationToken::new();
    let worker = IngestionWorker::spawn(Arc::clone(&app.pipeline), token.clone(), 16);
    let mut ticker = tokio::time::interval(interval);
    info!(interval_secs = interval.as_secs(), "watching input directory");

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                match worker.execute(IngestJob::Scan).await {
                    Ok(Ok(output)) => print_json(&output)?,
                    Ok(Err(err)) => warn!(error = %err, "scan failed"),
                    Err(err) => {
                        error!(error = %err, "ingestion worker unavailable");
                        break;
                    }
                }
            }
        }
    }

    worker.shutdown().await
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{rendered}");
    Ok(())
}

fn file_name(path: &std::path::Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))
}

async fn read_file(path: &std::path::Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                if stream.recv().await.is_some() {
                    info!("Received SIGTERM");
                }
            }
            Err(err) => warn!(error = %err, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received termination signal (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received termination signal (SIGTERM)");
        }
    }
}
