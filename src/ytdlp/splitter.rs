use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Result, bail};
use tokio::process::Command;

use crate::utils::paths::{find_existing_audio, sanitize_filename};
use crate::ytdlp::progress::{DownloadStage, ProgressFn, ProgressUpdate};
use crate::ytdlp::request::TrackMetadata;

/// Time range of one track inside a larger recording, in seconds.
/// An open end means "until the end of the file".
#[derive(Debug, Clone, Copy)]
pub struct TrackSpan {
    pub start: f64,
    pub end: Option<f64>,
}

/// Carves one downloaded container file into individual tracks with
/// ffmpeg, one invocation per time range. Re-running over an already
/// populated directory transcodes nothing.
pub struct TrackSplitter {
    ffmpeg_path: PathBuf,
    per_track_timeout: Duration,
}

impl TrackSplitter {
    pub fn new(ffmpeg_path: PathBuf) -> Self {
        TrackSplitter { ffmpeg_path, per_track_timeout: Duration::from_secs(300) }
    }

    /// Split `source` into one file per span. Progress is reported as a
    /// flat percentage of ranges completed, not byte progress within a
    /// range. Individual range failures are logged and skipped; the
    /// successfully produced paths are returned.
    pub async fn split(
        &self,
        source: &Path,
        spans: &[TrackSpan],
        output_dir: &Path,
        metadata: &[TrackMetadata],
        mut progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<Vec<PathBuf>> {
        if !source.exists() {
            bail!("source file not found: {:?}", source);
        }
        if spans.len() != metadata.len() {
            bail!(
                "spans and metadata must have the same length ({} vs {})",
                spans.len(),
                metadata.len()
            );
        }

        let mut outputs = Vec::new();

        for (index, (span, meta)) in spans.iter().zip(metadata).enumerate() {
            let title = meta
                .title
                .clone()
                .unwrap_or_else(|| format!("track_{}", index + 1));
            let number = meta.track_number.unwrap_or(index as u32 + 1);
            let stem = format!("{:02} - {}", number, sanitize_filename(&title));

            // Idempotent re-run: a matching file in any audio format
            // already satisfies this range.
            if let Some(existing) = find_existing_audio(output_dir, &stem) {
                log::info!("track {} already exists at {:?}, skipping", index + 1, existing);
                outputs.push(existing);
                report(
                    &mut progress,
                    ((index + 1) as f64 / spans.len() as f64) * 100.0,
                    DownloadStage::Skipped,
                );
                continue;
            }

            report(
                &mut progress,
                (index as f64 / spans.len() as f64) * 100.0,
                DownloadStage::Splitting,
            );

            let output_path = output_dir.join(format!("{stem}.mp3"));
            let mut cmd = Command::new(&self.ffmpeg_path);
            cmd.arg("-i")
                .arg(source)
                .arg("-ss")
                .arg(span.start.to_string())
                .arg("-acodec")
                .arg("libmp3lame")
                .arg("-ab")
                .arg("320k")
                .arg("-y");
            if let Some(end) = span.end {
                cmd.arg("-t").arg((end - span.start).to_string());
            }
            cmd.arg(&output_path)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            match tokio::time::timeout(self.per_track_timeout, cmd.output()).await {
                Ok(Ok(output)) if output.status.success() && output_path.exists() => {
                    outputs.push(output_path);
                }
                Ok(Ok(output)) => {
                    log::error!(
                        "error splitting track {}: {}",
                        index + 1,
                        String::from_utf8_lossy(&output.stderr).trim()
                    );
                }
                Ok(Err(e)) => {
                    log::error!("error splitting track {}: {}", index + 1, e);
                }
                Err(_) => {
                    log::error!(
                        "timeout splitting track {} after {}s",
                        index + 1,
                        self.per_track_timeout.as_secs()
                    );
                }
            }
        }

        report(&mut progress, 100.0, DownloadStage::Completed);
        Ok(outputs)
    }
}

fn report(progress: &mut Option<&mut ProgressFn<'_>>, percent: f64, stage: DownloadStage) {
    if let Some(callback) = progress.as_deref_mut() {
        callback(&ProgressUpdate::flat(percent, stage));
    }
}
