//! Transcoding engine abstraction and its lazily loaded, shared handle.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transcoding engine failed to load: {0}")]
    Load(String),

    #[error("transcoding engine unavailable: {0}")]
    Unavailable(Arc<EngineError>),

    #[error("failed to launch transcoding engine: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("transcode failed (exit code {code:?}): {stderr}")]
    Failed { code: Option<i32>, stderr: String },

    #[error("transcode timed out after {0:?}")]
    Timeout(Duration),
}

/// Black-box transcoder: runs one command against files staged in `cwd`.
///
/// File names in `args` are relative to `cwd`.
#[async_trait]
pub trait Engine: Send + Sync + std::fmt::Debug {
    async fn run(&self, cwd: &Path, args: &[String]) -> Result<(), EngineError>;

    fn version(&self) -> &str;
}

pub type SharedEngine = Arc<dyn Engine>;

type LoadResult = Result<SharedEngine, Arc<EngineError>>;
type Loader = Box<dyn FnOnce() -> BoxFuture<'static, Result<SharedEngine, EngineError>> + Send>;

enum LoadState {
    Uninitialized,
    Loading(Shared<BoxFuture<'static, LoadResult>>),
    Ready(SharedEngine),
    Failed(Arc<EngineError>),
}

struct Slot {
    state: LoadState,
    loader: Option<Loader>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "error", rename_all = "lowercase")]
pub enum EngineStatus {
    Uninitialized,
    Loading,
    Ready,
    Failed(String),
}

/// Owns the single engine instance of the process.
///
/// The first [`EngineHandle::acquire`] starts the load; everyone who calls
/// while it is in flight waits on the same load. A failed load is terminal:
/// later callers get the recorded error and no second load is started.
pub struct EngineHandle {
    slot: Mutex<Slot>,
}

impl EngineHandle {
    pub fn new<F, Fut>(loader: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<SharedEngine, EngineError>> + Send + 'static,
    {
        let loader: Loader = Box::new(move || loader().boxed());
        Self {
            slot: Mutex::new(Slot {
                state: LoadState::Uninitialized,
                loader: Some(loader),
            }),
        }
    }

    /// Handle whose engine is already loaded.
    pub fn ready(engine: SharedEngine) -> Self {
        Self {
            slot: Mutex::new(Slot {
                state: LoadState::Ready(engine),
                loader: None,
            }),
        }
    }

    pub async fn acquire(&self) -> Result<SharedEngine, EngineError> {
        let pending = {
            let mut guard = self.slot.lock();
            let slot = &mut *guard;
            match &slot.state {
                LoadState::Ready(engine) => return Ok(Arc::clone(engine)),
                LoadState::Failed(err) => return Err(EngineError::Unavailable(Arc::clone(err))),
                LoadState::Loading(pending) => pending.clone(),
                LoadState::Uninitialized => {
                    let pending = start_load(slot.loader.take());
                    slot.state = LoadState::Loading(pending.clone());
                    pending
                }
            }
        };

        let outcome = pending.await;
        self.settle(&outcome);
        outcome.map_err(EngineError::Unavailable)
    }

    /// Starts loading in the background without waiting for it.
    pub fn preload(self: &Arc<Self>) {
        let handle = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = handle.acquire().await {
                error!("Engine preload failed: {}", e);
            }
        });
    }

    /// The engine, if it has finished loading. Never starts a load.
    pub fn loaded(&self) -> Option<SharedEngine> {
        match &self.slot.lock().state {
            LoadState::Ready(engine) => Some(Arc::clone(engine)),
            LoadState::Loading(pending) => pending.peek().and_then(|r| r.clone().ok()),
            _ => None,
        }
    }

    pub fn status(&self) -> EngineStatus {
        match &self.slot.lock().state {
            LoadState::Uninitialized => EngineStatus::Uninitialized,
            LoadState::Loading(pending) => match pending.peek() {
                None => EngineStatus::Loading,
                Some(Ok(_)) => EngineStatus::Ready,
                Some(Err(e)) => EngineStatus::Failed(e.to_string()),
            },
            LoadState::Ready(_) => EngineStatus::Ready,
            LoadState::Failed(e) => EngineStatus::Failed(e.to_string()),
        }
    }

    fn settle(&self, outcome: &LoadResult) {
        let mut slot = self.slot.lock();
        if !matches!(slot.state, LoadState::Loading(_)) {
            return;
        }
        slot.state = match outcome {
            Ok(engine) => {
                info!("Transcoding engine ready: {}", engine.version());
                LoadState::Ready(Arc::clone(engine))
            }
            Err(e) => {
                error!("Transcoding engine failed to load: {}", e);
                LoadState::Failed(Arc::clone(e))
            }
        };
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("status", &self.status())
            .finish()
    }
}

fn start_load(loader: Option<Loader>) -> Shared<BoxFuture<'static, LoadResult>> {
    info!("Loading transcoding engine");

    // Spawned so the load finishes even if every waiter goes away.
    let task = loader.map(|load| tokio::spawn(load()));

    async move {
        match task {
            Some(task) => match task.await {
                Ok(Ok(engine)) => Ok(engine),
                Ok(Err(e)) => Err(Arc::new(e)),
                Err(e) => Err(Arc::new(EngineError::Load(format!("load task aborted: {e}")))),
            },
            None => Err(Arc::new(EngineError::Load("no loader configured".to_string()))),
        }
    }
    .boxed()
    .shared()
}
