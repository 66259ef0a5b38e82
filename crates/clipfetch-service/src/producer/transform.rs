use std::path::{Path, PathBuf};
use std::process::Stdio;

use futures::future::BoxFuture;
use tokio::process::Command;

use crate::config::{DelogoRegion, TransformConfig};
use crate::types::FetchKey;

use super::{FetchError, FetchResult};

/// How much of `ffmpeg`s stderr is kept in error messages.
const STDERR_TAIL: usize = 512;

/// Removes the watermark from a video.
pub trait Transformer: Send + Sync + 'static {
    /// Transforms the video at `video_url`, returning a reference to the transformed video.
    fn transform<'a>(
        &'a self,
        video_url: &'a str,
        key: &'a FetchKey,
    ) -> BoxFuture<'a, FetchResult<String>>;
}

/// A [`Transformer`] that blurs out the watermark with `ffmpeg`s `delogo` filter.
///
/// Each key gets its own output file named after its [`cache_key`](FetchKey::cache_key), so
/// concurrent transforms of different videos never overwrite each other.
#[derive(Debug, Clone)]
pub struct FfmpegTransformer {
    ffmpeg: PathBuf,
    output_dir: PathBuf,
    delogo: DelogoRegion,
}

impl FfmpegTransformer {
    pub fn from_config(config: &TransformConfig) -> Self {
        Self {
            ffmpeg: config.ffmpeg.clone(),
            output_dir: config.output_dir.clone(),
            delogo: config.delogo,
        }
    }

    fn output_path(&self, key: &FetchKey) -> PathBuf {
        self.output_dir.join(format!("{}.mp4", key.cache_key()))
    }

    async fn run(&self, video_url: &str, key: &FetchKey) -> FetchResult<String> {
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|err| {
                FetchError::Transform(format!(
                    "failed to create `{}`: {err}",
                    self.output_dir.display()
                ))
            })?;

        // ffmpeg writes into a temp file first, so a failed run never leaves a truncated video
        // behind at the final path.
        let temp_file = tempfile::Builder::new()
            .prefix(".clipfetch-")
            .suffix(".mp4")
            .tempfile_in(&self.output_dir)
            .map_err(|err| FetchError::Transform(format!("failed to create temp file: {err}")))?;

        self.run_ffmpeg(video_url, temp_file.path()).await?;

        let output = self.output_path(key);
        temp_file.persist(&output).map_err(|err| {
            FetchError::Transform(format!(
                "failed to persist `{}`: {}",
                output.display(),
                err.error
            ))
        })?;

        Ok(output.display().to_string())
    }

    async fn run_ffmpeg(&self, input: &str, output: &Path) -> FetchResult<()> {
        tracing::debug!(input, output = %output.display(), "Running ffmpeg");

        let result = Command::new(&self.ffmpeg)
            .arg("-nostdin")
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-vf")
            .arg(self.delogo.to_string())
            .arg("-c:a")
            .arg("copy")
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await;

        let output = result.map_err(|err| {
            FetchError::Transform(format!(
                "failed to run `{}`: {err}",
                self.ffmpeg.display()
            ))
        })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        let tail_start = stderr
            .char_indices()
            .rev()
            .nth(STDERR_TAIL.saturating_sub(1))
            .map_or(0, |(idx, _)| idx);
        let tail = &stderr[tail_start..];

        Err(FetchError::Transform(if tail.is_empty() {
            format!("ffmpeg exited with {}", output.status)
        } else {
            format!("ffmpeg exited with {}: {tail}", output.status)
        }))
    }
}

impl Transformer for FfmpegTransformer {
    fn transform<'a>(
        &'a self,
        video_url: &'a str,
        key: &'a FetchKey,
    ) -> BoxFuture<'a, FetchResult<String>> {
        Box::pin(self.run(video_url, key))
    }
}
