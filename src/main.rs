use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use flv_recorder::config::AppConfig;
use flv_recorder::live::StreamHub;
use flv_recorder::service::RecordService;
use flv_recorder::{mock, probe};

#[derive(Parser, Debug)]
#[command(version, about = "Record live audio/video streams into FLV files")]
struct Cli {
    /// Configuration file; the built-in defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the recorder until Ctrl-C
    Serve {
        /// Publish a synthetic stream under this id (repeatable)
        #[arg(long)]
        mock: Vec<String>,

        /// Record every mock stream
        #[arg(long, default_value_t = false)]
        record: bool,

        /// Append to existing recordings instead of overwriting them
        #[arg(long, default_value_t = false)]
        append: bool,
    },
    /// List recordings with their size and duration as JSON
    List,
    /// Print the last timestamp of a container file
    Probe { file: PathBuf },
    /// Delete the recording of a stream
    Delete { stream: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load_default()?,
    };

    match cli.command {
        Command::Probe { file } => {
            let mut f = std::fs::File::open(&file)?;
            println!("{}", probe::probe_last_timestamp(&mut f));
        }
        Command::List => {
            let service = RecordService::new(config.record, StreamHub::new())?;
            println!("{}", serde_json::to_string_pretty(&service.list().await?)?);
        }
        Command::Delete { stream } => {
            let service = RecordService::new(config.record, StreamHub::new())?;
            let path = service.delete(&stream).await?;
            info!("deleted {}", path.display());
        }
        Command::Serve { mock, record, append } => serve(config, mock, record, append).await?,
    }
    Ok(())
}

async fn serve(config: AppConfig, mock_streams: Vec<String>, record: bool, append: bool) -> Result<()> {
    info!("starting flv_recorder, recordings under {}", config.record.path.display());
    let service = RecordService::new(config.record, StreamHub::new())?;

    let mut sources = Vec::new();
    for stream in &mock_streams {
        sources.push(mock::start_mock_source(service.hub(), stream, None)?);
    }

    let mut recordings = Vec::new();
    if record {
        for stream in &mock_streams {
            match service.start(stream, append).await {
                Ok(r) => recordings.push(r),
                Err(e) => tracing::error!("cannot record {}: {}", stream, e),
            }
        }
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    for recording in recordings {
        if let Err(e) = service.stop(&recording.stream_id).await {
            tracing::warn!("stop {}: {}", recording.stream_id, e);
        }
        match recording.task.await? {
            Ok(stats) => info!("{}: {} bytes written", recording.path.display(), stats.bytes_written),
            Err(e) => tracing::error!("{}: {}", recording.path.display(), e),
        }
    }
    for source in sources {
        source.abort();
    }
    for status in service.sessions().await {
        info!("session {} -> {} (recording: {})", status.id, status.filepath.display(), status.recording);
    }
    Ok(())
}
