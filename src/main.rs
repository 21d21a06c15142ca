use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use summora_relay::{
    create_router, AppState, CaptureConstraints, Config, ControllerState, FileCaptureBackend,
    HttpDownstream, Outcome, RecordingController, RelayService, StagingArea, UploadClient,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "summora")]
#[command(about = "Recording upload gateway and recorder")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the upload relay gateway
    Serve {
        /// Config file (extension optional)
        #[arg(short, long, default_value = "config/summora")]
        config: String,

        /// Override the listening port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Record from a media file and upload it through the gateway
    Record {
        /// Media file replayed as the capture device
        #[arg(short, long)]
        source: PathBuf,

        /// Gateway upload endpoint
        #[arg(short, long, default_value = "http://localhost:3001/api/upload")]
        endpoint: String,

        /// Seconds to record before stopping
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Capture audio only
        #[arg(long)]
        audio_only: bool,

        /// Upload timeout in seconds
        #[arg(long, default_value = "300")]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("summora_relay=info,summora=info,tower_http=info")),
        )
        .init();

    match Cli::parse().command {
        Command::Serve { config, port } => serve(&config, port).await,
        Command::Record {
            source,
            endpoint,
            duration,
            audio_only,
            timeout,
        } => record(source, endpoint, duration, audio_only, timeout).await,
    }
}

async fn serve(config_path: &str, port: Option<u16>) -> Result<()> {
    let mut cfg = Config::load(config_path)?;
    if let Some(port) = port {
        cfg.service.http.port = port;
    }

    info!("Summora gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let staging = StagingArea::from_config(&cfg.staging)
        .await
        .context("Failed to prepare staging area")?;
    match staging.dir() {
        Some(dir) => info!("Staging uploads on disk in {}", dir.display()),
        None => info!("Staging uploads in {:?} mode", staging.mode()),
    }

    let downstream = HttpDownstream::new(&cfg.relay.downstream_url)
        .context("Failed to build downstream client")?;
    info!(
        "Relaying uploads to {} (timeout {}s)",
        downstream.url(),
        cfg.relay.timeout_secs
    );
    let relay = RelayService::new(
        staging,
        Arc::new(downstream),
        &cfg.relay.field_name,
        cfg.relay.timeout(),
    );

    let state = AppState::new(relay).with_allowed_origin(&cfg.service.allowed_origin);
    let app = create_router(state);

    let addr = cfg.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Gateway listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Gateway shutdown complete");
    Ok(())
}

async fn record(
    source: PathBuf,
    endpoint: String,
    duration: u64,
    audio_only: bool,
    timeout: u64,
) -> Result<()> {
    let constraints = if audio_only {
        CaptureConstraints::audio_only()
    } else {
        CaptureConstraints::audio_video()
    };

    let backend = Arc::new(FileCaptureBackend::new(&source));
    let uploader = Arc::new(
        UploadClient::new(&endpoint, Duration::from_secs(timeout))
            .context("Failed to build upload client")?,
    );
    info!("Uploading recordings to {}", uploader.endpoint());
    let controller = RecordingController::new(backend, uploader).with_constraints(constraints);
    let upload_status = controller.upload_status();

    info!("Recording {} for {} seconds", source.display(), duration);

    let state = controller.start().await?;
    if state != ControllerState::Recording {
        report(&state);
        return Ok(());
    }

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(duration)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping early"),
    }

    let state = controller.stop().await?;
    if let Some(line) = upload_status.borrow().describe() {
        info!("{}", line);
    }
    report(&state);
    Ok(())
}

fn report(state: &ControllerState) {
    match state {
        ControllerState::Done(Outcome::Success(payload)) => {
            info!("Recording uploaded successfully");
            println!("{}", serde_json::to_string_pretty(payload).unwrap_or_default());
        }
        ControllerState::Done(Outcome::Error(detail)) => error!("Recording failed: {}", detail),
        other => error!("Recording ended in unexpected state: {}", other.name()),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
