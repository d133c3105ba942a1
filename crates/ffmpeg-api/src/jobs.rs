//! The three jobs the service runs against the shared engine.
//!
//! Every job follows the same shape: acquire the engine, wait for its turn,
//! stage the upload, run one command, read the outputs back and clean up.
//! Jobs run one at a time; the engine and its workspace are not safe to share
//! between concurrent commands.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::engine::{Engine, EngineHandle};
use crate::error::JobError;
use crate::range::ClipRange;
use crate::sampling::{Sampling, compute_sampling};
use crate::workspace::{JobScope, Workspace};

const INPUT_NAME: &str = "input-video";
const FRAME_PATTERN: &str = "out%d.png";

/// Attachment name for clips returned by `/trim` and `/thumbnail`.
pub const CLIP_FILENAME: &str = "output.mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipKind {
    Trim,
    Thumbnail,
}

impl ClipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClipKind::Trim => "trim",
            ClipKind::Thumbnail => "thumbnail",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Frames {
    pub sampling: Sampling,
    /// PNG images in capture order.
    pub images: Vec<Bytes>,
}

#[derive(Debug, Clone)]
pub struct Clip {
    pub filename: &'static str,
    pub bytes: Bytes,
}

impl Clip {
    pub fn content_length(&self) -> usize {
        self.bytes.len()
    }
}

/// Output name of the `n`th extracted frame, counting from 1.
fn frame_name(n: u32) -> String {
    FRAME_PATTERN.replace("%d", &n.to_string())
}

pub fn frame_args(input: &str, output_pattern: &str, sampling: &Sampling) -> Vec<String> {
    vec![
        "-i".to_string(),
        input.to_string(),
        "-vf".to_string(),
        sampling.rate.filter(),
        "-frames:v".to_string(),
        sampling.extract_count.to_string(),
        output_pattern.to_string(),
    ]
}

/// Stream copy between the two offsets, no re-encode.
pub fn clip_args(input: &str, output: &str, range: &ClipRange) -> Vec<String> {
    vec![
        "-i".to_string(),
        input.to_string(),
        "-ss".to_string(),
        range.start(),
        "-to".to_string(),
        range.end(),
        "-c:v".to_string(),
        "copy".to_string(),
        output.to_string(),
    ]
}

#[derive(Debug)]
pub struct Jobs {
    engine: Arc<EngineHandle>,
    workspace: Arc<Workspace>,
    turn: Mutex<()>,
}

impl Jobs {
    pub fn new(engine: Arc<EngineHandle>, workspace: Arc<Workspace>) -> Self {
        Self {
            engine,
            workspace,
            turn: Mutex::new(()),
        }
    }

    pub fn engine(&self) -> &Arc<EngineHandle> {
        &self.engine
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    /// Pulls periodic stills out of `payload`.
    ///
    /// Exactly `extract_count` frames come back or the whole job fails.
    pub async fn extract_frames(&self, payload: &[u8], duration_secs: f64) -> Result<Frames, JobError> {
        let sampling = compute_sampling(duration_secs)?;
        let engine = self.engine.acquire().await?;

        let _turn = self.turn.lock().await;
        let scope = self.workspace.scope();
        info!(
            "[Job {}] frames: {} frames at {} fps from {} bytes",
            scope.id(),
            sampling.extract_count,
            sampling.rate,
            payload.len()
        );

        let result = self.run_frames(engine.as_ref(), &scope, payload, &sampling).await;
        finish(scope, "frames", &result).await;
        result
    }

    async fn run_frames(
        &self,
        engine: &dyn Engine,
        scope: &JobScope,
        payload: &[u8],
        sampling: &Sampling,
    ) -> Result<Frames, JobError> {
        let input = scope.name(INPUT_NAME);
        self.workspace.write(&input, payload).await?;

        let args = frame_args(&input, &scope.name(FRAME_PATTERN), sampling);
        engine.run(self.workspace.root(), &args).await?;

        let mut images = Vec::with_capacity(sampling.extract_count as usize);
        for n in 1..=sampling.extract_count {
            let name = scope.name(&frame_name(n));
            images.push(self.workspace.read(&name).await?);
            self.workspace.remove(&name).await?;
        }
        self.workspace.remove(&input).await?;

        Ok(Frames {
            sampling: *sampling,
            images,
        })
    }

    pub async fn trim(&self, payload: &[u8], range: &ClipRange) -> Result<Clip, JobError> {
        self.cut(ClipKind::Trim, payload, range).await
    }

    /// Same command as [`Jobs::trim`]; kept as its own operation for callers
    /// that want a short preview clip.
    pub async fn thumbnail(&self, payload: &[u8], range: &ClipRange) -> Result<Clip, JobError> {
        self.cut(ClipKind::Thumbnail, payload, range).await
    }

    async fn cut(&self, kind: ClipKind, payload: &[u8], range: &ClipRange) -> Result<Clip, JobError> {
        let engine = self.engine.acquire().await?;

        let _turn = self.turn.lock().await;
        let scope = self.workspace.scope();
        info!(
            "[Job {}] {}: {} -> {} from {} bytes",
            scope.id(),
            kind.as_str(),
            range.start(),
            range.end(),
            payload.len()
        );

        let result = self.run_cut(engine.as_ref(), &scope, payload, range).await;
        finish(scope, kind.as_str(), &result).await;
        result
    }

    async fn run_cut(
        &self,
        engine: &dyn Engine,
        scope: &JobScope,
        payload: &[u8],
        range: &ClipRange,
    ) -> Result<Clip, JobError> {
        let input = scope.name(INPUT_NAME);
        let output = scope.name(CLIP_FILENAME);
        self.workspace.write(&input, payload).await?;

        engine
            .run(self.workspace.root(), &clip_args(&input, &output, range))
            .await?;

        let bytes = self.workspace.read(&output).await?;
        self.workspace.remove(&input).await?;
        self.workspace.remove(&output).await?;

        Ok(Clip {
            filename: CLIP_FILENAME,
            bytes,
        })
    }
}

async fn finish<T>(scope: JobScope, job: &str, result: &Result<T, JobError>) {
    match result {
        Ok(_) => info!("[Job {}] {} finished", scope.id(), job),
        Err(e) => error!("[Job {}] {} failed: {}", scope.id(), job, e),
    }
    scope.close().await;
}
