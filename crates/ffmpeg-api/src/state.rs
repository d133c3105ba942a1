use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::engine::{EngineHandle, SharedEngine};
use crate::ffmpeg::Ffmpeg;
use crate::jobs::Jobs;
use crate::workspace::Workspace;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Explicit ffmpeg binary; looked up on `PATH` when unset.
    pub ffmpeg: Option<PathBuf>,
    pub max_upload_bytes: usize,
    pub job_timeout: Option<Duration>,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ffmpeg: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            job_timeout: None,
        }
    }

    pub fn workspace_dir(&self) -> PathBuf {
        self.data_dir.join("workspace")
    }
}

#[derive(Clone, Debug)]
pub struct AppState {
    pub jobs: Arc<Jobs>,
    pub max_upload_bytes: usize,
}

impl AppState {
    /// Opens the workspace and prepares a lazily loaded ffmpeg engine.
    pub fn new(config: &Config) -> Result<Self> {
        let workspace = Workspace::open(config.workspace_dir())
            .context("Failed to open job workspace")?;
        let leftovers = workspace.purge();
        if leftovers > 0 {
            info!("Removed {} stale workspace entries", leftovers);
        }

        let binary = config.ffmpeg.clone();
        let timeout = config.job_timeout;
        let engine = EngineHandle::new(move || async move {
            let ffmpeg = Ffmpeg::load(binary.as_deref(), timeout).await?;
            Ok(Arc::new(ffmpeg) as SharedEngine)
        });

        Ok(Self::with_engine(
            Arc::new(engine),
            Arc::new(workspace),
            config.max_upload_bytes,
        ))
    }

    pub fn with_engine(
        engine: Arc<EngineHandle>,
        workspace: Arc<Workspace>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            jobs: Arc::new(Jobs::new(engine, workspace)),
            max_upload_bytes,
        }
    }

    pub fn engine(&self) -> &Arc<EngineHandle> {
        self.jobs.engine()
    }
}
