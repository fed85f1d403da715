//! tessera - run fetch, download and write tasks from the command line.
//!
//! Usage:
//!   tessera fetch <URL> [--output <FILE>] [--decode]   Fetch a URL, optionally decode and save it
//!   tessera download <URL> <DEST>                       Download a URL into a file
//!   tessera write <SOURCE> <DEST>                       Append a file to another file

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tessera::{
    ActivityIndicator, BatchTask, DecodeTask, DownloadTask, Event, EventBus, EventHandler,
    Executor, ExecutorConfig, FetchTask, HttpTransport, Node, Operation, Request, TaskError,
    WriteContent, WriteTask,
};
use tessera::tasks::DEFAULT_HIGH_WATER_MARK;
use tracing::{debug, info, warn};

/// tessera - dependency-ordered task execution
#[derive(Parser)]
#[command(name = "tessera")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Executor configuration file (YAML)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a URL and print (or save) the response body
    Fetch {
        #[arg(value_name = "URL")]
        url: String,

        /// Append the body to this file instead of printing it
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Decode the body as JSON and pretty-print it
        #[arg(short, long)]
        decode: bool,
    },

    /// Download a URL into a file, replacing it if present
    Download {
        #[arg(value_name = "URL")]
        url: String,

        #[arg(value_name = "DEST")]
        destination: PathBuf,
    },

    /// Append the contents of one file to another
    Write {
        #[arg(value_name = "SOURCE")]
        source: PathBuf,

        #[arg(value_name = "DEST")]
        destination: PathBuf,

        /// Bytes written per chunk
        #[arg(long, default_value_t = DEFAULT_HIGH_WATER_MARK)]
        high_water_mark: usize,
    },
}

/// Logs executor lifecycle events.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::TaskSubmitted { name, executor, .. } => {
                debug!("[{}] '{}' submitted", executor, name);
            }
            Event::TaskStarted { name, executor, .. } => {
                info!("[{}] '{}' started", executor, name);
            }
            Event::TaskFinished {
                name,
                executor,
                cancelled,
                duration,
                ..
            } => {
                if *cancelled {
                    warn!("[{}] '{}' cancelled after {:?}", executor, name, duration);
                } else {
                    info!("[{}] '{}' finished in {:?}", executor, name, duration);
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ExecutorConfig::load(path)?,
        None => ExecutorConfig::default(),
    };

    let events = Arc::new(EventBus::new());
    events.register(Arc::new(LoggingHandler)).await;

    let indicator = ActivityIndicator::with_callback(Duration::from_millis(250), |visible| {
        debug!("network activity {}", if visible { "on" } else { "off" });
    });
    let executor = Executor::builder(config)
        .event_bus(Arc::clone(&events))
        .activity(Arc::new(indicator))
        .build();

    // Cancel everything on Ctrl+C; tasks still finish and report.
    let run = run(cli.command, &executor);
    tokio::pin!(run);
    let interrupted = tokio::select! {
        result = &mut run => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match interrupted {
        Some(result) => result,
        None => {
            info!("Cancelling...");
            executor.cancel_all();
            run.await
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

async fn run(command: Commands, executor: &Executor) -> CliResult {
    match command {
        Commands::Fetch {
            url,
            output,
            decode,
        } => fetch(executor, url, output, decode).await,
        Commands::Download { url, destination } => download(executor, url, destination).await,
        Commands::Write {
            source,
            destination,
            high_water_mark,
        } => write(executor, WriteContent::File(source), destination, high_water_mark).await,
    }
}

/// Fetch (and optionally decode) inside a batch, then save or print.
async fn fetch(
    executor: &Executor,
    url: String,
    output: Option<PathBuf>,
    decode: bool,
) -> CliResult {
    let transport = Arc::new(HttpTransport::new()?);
    let fetch = Operation::new(FetchTask::new(transport, Request::get(url)));
    let mut members = vec![fetch.clone() as Arc<dyn Node>];

    let decoded = if decode {
        let op = Operation::new(DecodeTask::<serde_json::Value>::new(fetch.upstream()));
        members.push(op.clone());
        Some(op)
    } else {
        None
    };

    let body = fetch.upstream();
    let batch = BatchTask::with_output(
        members,
        |config| config.name = "tessera.fetch".to_string(),
        move || body.value(),
    )?;
    let batch = Operation::new(batch);
    executor.submit(batch.clone());

    let body = batch
        .wait()
        .await
        .flatten()
        .ok_or(TaskError::Cancelled)??;

    let rendered = match decoded.and_then(|op| op.value()) {
        Some(value) => {
            let value = value?;
            serde_json::to_vec_pretty(&value)?
        }
        None => body,
    };

    match output {
        Some(path) => {
            write(executor, WriteContent::Bytes(rendered), path, DEFAULT_HIGH_WATER_MARK).await
        }
        None => {
            println!("{}", String::from_utf8_lossy(&rendered));
            Ok(())
        }
    }
}

async fn download(executor: &Executor, url: String, destination: PathBuf) -> CliResult {
    let downloader = Arc::new(HttpTransport::new()?);
    let op = Operation::new(DownloadTask::from_url(downloader, url, destination));
    executor.submit(op.clone());

    let path = op.wait().await.ok_or(TaskError::Cancelled)??;
    println!("Saved to {}", path.display());
    Ok(())
}

async fn write(
    executor: &Executor,
    content: WriteContent,
    destination: PathBuf,
    high_water_mark: usize,
) -> CliResult {
    let op = Operation::new(
        WriteTask::new(content, destination).with_high_water_mark(high_water_mark),
    );
    executor.submit(op.clone());

    let path = op.wait().await.ok_or(TaskError::Cancelled)??;
    println!("Wrote {}", path.display());
    Ok(())
}
