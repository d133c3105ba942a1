use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use tracing_subscriber::EnvFilter;

use ffmpeg_api::{AppState, Config, router};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Sets the IP address to bind the server to
    #[arg(long, default_value = "0.0.0.0", env = "FFMPEG_API_HOST")]
    host: IpAddr,

    /// Sets the Port to bind the server to
    #[arg(long, default_value_t = 5000, env = "FFMPEG_API_PORT")]
    port: u16,

    /// Path to the ffmpeg binary (defaults to the one on PATH)
    #[arg(long, env = "FFMPEG_API_FFMPEG")]
    ffmpeg: Option<PathBuf>,

    /// Directory holding the job workspace
    #[arg(long, env = "DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Largest accepted upload, in MiB
    #[arg(long, default_value_t = 100, env = "FFMPEG_API_MAX_UPLOAD_MIB")]
    max_upload_mib: usize,

    /// Kills a transcode that runs longer than this many seconds
    #[arg(long, env = "FFMPEG_API_JOB_TIMEOUT_SECS")]
    job_timeout_secs: Option<u64>,
}

fn resolve_data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }

    let proj_dirs =
        ProjectDirs::from("", "", "ffmpeg-api").context("Could not determine home directory")?;
    Ok(proj_dirs.data_dir().to_path_buf())
}

#[tokio::main]
async fn main() -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let env_filter = match rust_log.is_empty() {
        true => EnvFilter::builder().parse_lossy("info"),
        false => EnvFilter::builder().parse_lossy(rust_log),
    };
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    let data_dir = resolve_data_dir(cli.data_dir)?;
    std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;
    tracing::info!("Using data directory: {}", data_dir.display());

    let config = Config {
        data_dir,
        ffmpeg: cli.ffmpeg,
        max_upload_bytes: cli.max_upload_mib * 1024 * 1024,
        job_timeout: cli.job_timeout_secs.map(Duration::from_secs),
    };

    let state = AppState::new(&config)?;
    state.engine().preload();
    let app = router(state);

    let addr = SocketAddr::new(cli.host, cli.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    tracing::info!("ffmpeg-api listening at http://{}", addr);

    axum::serve(listener, app).await.context("Server failed")?;
    Ok(())
}
