use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};

#[cfg(target_os = "windows")]
const BINARY_NAME: &str = "ffmpeg.exe";
#[cfg(not(target_os = "windows"))]
const BINARY_NAME: &str = "ffmpeg";

/// The ffmpeg command line tool driven as a subprocess.
#[derive(Debug)]
pub struct Ffmpeg {
    path: PathBuf,
    version: String,
    timeout: Option<Duration>,
}

impl Ffmpeg {
    /// Locates the binary, checks that it runs and records what it reports.
    ///
    /// Without an explicit `binary`, `ffmpeg` is looked up on `PATH`.
    pub async fn load(binary: Option<&Path>, timeout: Option<Duration>) -> Result<Self, EngineError> {
        let path = match binary {
            Some(path) => path.to_path_buf(),
            None => which::which(BINARY_NAME)
                .map_err(|e| EngineError::Load(format!("{BINARY_NAME} not found in PATH: {e}")))?,
        };

        info!("Using FFmpeg binary at {}", path.display());

        let version = Self::probe_version(&path).await?;
        info!("FFmpeg version: {}", version);

        match Self::detect_hwaccels(&path).await {
            Ok(hwaccels) => info!("Detected hardware accelerators: {:?}", hwaccels),
            Err(e) => info!("No hardware accelerators detected or FFmpeg failed to query: {}", e),
        }

        Ok(Self {
            path,
            version,
            timeout,
        })
    }

    async fn probe_version(path: &Path) -> Result<String, EngineError> {
        let output = Command::new(path)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| EngineError::Load(format!("failed to execute {}: {e}", path.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Load(format!("-version probe failed: {}", stderr.trim())));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or("unknown").to_string())
    }

    async fn detect_hwaccels(path: &Path) -> std::io::Result<Vec<String>> {
        let output = Command::new(path)
            .args(["-hide_banner", "-hwaccels"])
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("FFmpeg -hwaccels stderr: {}", stderr);
        }

        Ok(parse_hwaccels(&String::from_utf8_lossy(&output.stdout)))
    }

    #[cfg(test)]
    fn with_binary(path: PathBuf, timeout: Option<Duration>) -> Self {
        Self {
            path,
            version: "test".to_string(),
            timeout,
        }
    }
}

/// `-hwaccels` prints a header line followed by one accelerator per line.
fn parse_hwaccels(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl Engine for Ffmpeg {
    async fn run(&self, cwd: &Path, args: &[String]) -> Result<(), EngineError> {
        let mut cmd = Command::new(&self.path);
        cmd.current_dir(cwd)
            .args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y"])
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!("Running FFmpeg command: {:?}", args);

        let child = cmd.spawn()?;
        let output = match self.timeout {
            // Dropping the wait future on expiry drops the child, which kills it.
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| {
                    warn!("FFmpeg exceeded {:?}, killing it", limit);
                    EngineError::Timeout(limit)
                })??,
            None => child.wait_with_output().await?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("FFmpeg failed: {}", stderr);
            return Err(EngineError::Failed {
                code: output.status.code(),
                stderr,
            });
        }

        debug!("FFmpeg command completed");
        Ok(())
    }

    fn version(&self) -> &str {
        &self.version
    }
}
