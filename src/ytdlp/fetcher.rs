use std::collections::HashSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::utils::paths::{find_existing_audio, is_audio_file, organized_path};
use crate::ytdlp::cookies;
use crate::ytdlp::errors::{DownloadFailure, ErrorCategory};
use crate::ytdlp::process::RunBudget;
use crate::ytdlp::progress::{DownloadStage, ProgressFn, ProgressUpdate};
use crate::ytdlp::request::{DownloadRequest, Quality, TrackMetadata};
use crate::ytdlp::retry::{RetryHandler, RetryPolicy};
use crate::ytdlp::strategies::strategy_chain;
use crate::ytdlp::updater::ToolUpdater;

/// Result of one download: the file on disk, and whether it was already
/// there before this call.
#[derive(Debug, PartialEq, Eq)]
pub struct Fetched {
    pub path: PathBuf,
    pub already_existed: bool,
}

/// Downloads one track or album recording, escalating through the client
/// strategies until one produces a file. All strategies of one call share
/// a single wall-clock budget.
pub struct MusicFetcher {
    yt_dlp_path: PathBuf,
    download_dir: PathBuf,
    retry: RetryHandler,
}

impl MusicFetcher {
    pub fn new(
        yt_dlp_path: PathBuf,
        download_dir: PathBuf,
        policy: RetryPolicy,
        updater: Arc<ToolUpdater>,
    ) -> std::io::Result<Self> {
        std::fs::create_dir_all(&download_dir)?;
        Ok(MusicFetcher {
            yt_dlp_path,
            download_dir,
            retry: RetryHandler::new(policy, updater),
        })
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Download the audio of `url` with default quality.
    pub async fn download_audio(
        &self,
        url: &str,
        metadata: Option<&TrackMetadata>,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<Fetched, DownloadFailure> {
        self.download(url, Quality::Audio, true, metadata, progress).await
    }

    /// Download `url`, trying each client strategy in order.
    pub async fn download(
        &self,
        url: &str,
        quality: Quality,
        audio_only: bool,
        metadata: Option<&TrackMetadata>,
        mut progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<Fetched, DownloadFailure> {
        let target_dir = organized_path(&self.download_dir, metadata)
            .map_err(|e| setup_failure(format!("could not create download directory: {e}")))?;
        let expected_stem = metadata.and_then(|m| m.file_stem());

        // A file from an earlier run satisfies the request outright.
        if let Some(stem) = expected_stem.as_deref() {
            if let Some(existing) = find_existing_audio(&target_dir, stem) {
                log::info!("skipping download, file already exists: {:?}", existing);
                if let Some(callback) = progress.as_deref_mut() {
                    callback(&ProgressUpdate::flat(100.0, DownloadStage::Completed));
                }
                return Ok(Fetched { path: existing, already_existed: true });
            }
        }

        let template = match expected_stem.as_deref() {
            Some(stem) => format!("{stem}.%(ext)s"),
            None => "%(title)s.%(ext)s".to_string(),
        };
        let request = DownloadRequest {
            url: url.to_string(),
            quality,
            audio_only,
            output_template: target_dir.join(template).to_string_lossy().into_owned(),
            metadata: metadata.cloned(),
        };

        let budget = RunBudget::start(self.retry.policy().max_total_time);
        let chain = strategy_chain();
        let mut last_failure: Option<DownloadFailure> = None;
        let mut total_attempts = 0u32;

        for (index, strategy) in chain.iter().enumerate() {
            // The budget also gates escalation, not just retries.
            if budget.exhausted() {
                return Err(DownloadFailure::budget_exhausted(
                    total_attempts,
                    budget.elapsed(),
                    format!(
                        "maximum total time ({}s) exceeded before strategy {}",
                        budget.max_total.as_secs(),
                        index + 1
                    ),
                ));
            }

            log::info!("trying strategy {}/{} ({})", index + 1, chain.len(), strategy.name);
            let cookie_browser =
                if strategy.allow_cookies { cookies::detect_cookie_browser() } else { None };
            let args = strategy.build_command(&request, cookie_browser);
            let snapshot = file_names(&target_dir);

            let outcome = self
                .retry
                .run_with_retry(
                    &self.yt_dlp_path,
                    &args,
                    &format!("download ({})", strategy.name),
                    &budget,
                    progress.as_deref_mut(),
                )
                .await;

            match outcome {
                Ok(_) => {
                    match newest_new_audio_file(&target_dir, expected_stem.as_deref(), &snapshot) {
                        Some(file) => {
                            log::info!("success with strategy {} -> {:?}", strategy.name, file);
                            return Ok(Fetched { path: file, already_existed: false });
                        }
                        None => {
                            log::warn!(
                                "strategy {} completed but no file was created",
                                strategy.name
                            );
                            last_failure = Some(DownloadFailure::new(
                                ErrorCategory::Unknown,
                                total_attempts,
                                budget.elapsed(),
                                "download completed but no file was created",
                            ));
                        }
                    }
                }
                Err(failure) => {
                    total_attempts += failure.attempts;
                    if !failure.category.is_retryable() || failure.is_budget_exhausted() {
                        return Err(failure);
                    }
                    log::warn!("strategy {} failed: {}", strategy.name, failure);
                    last_failure = Some(failure);
                }
            }
        }

        Err(last_failure.unwrap_or_else(|| {
            setup_failure("all download strategies failed without producing a file")
        }))
    }
}

fn setup_failure(diagnostic: impl Into<String>) -> DownloadFailure {
    DownloadFailure::new(ErrorCategory::Unknown, 0, Duration::ZERO, diagnostic)
}

fn file_names(dir: &Path) -> HashSet<OsString> {
    std::fs::read_dir(dir)
        .map(|entries| entries.flatten().map(|e| e.file_name()).collect())
        .unwrap_or_default()
}

/// The file this download produced: the newest audio file that was not in
/// the pre-download snapshot, preferring exact then prefix stem matches.
fn newest_new_audio_file(
    dir: &Path,
    expected_stem: Option<&str>,
    snapshot: &HashSet<OsString>,
) -> Option<PathBuf> {
    let new_files: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .flatten()
        .filter(|entry| !snapshot.contains(&entry.file_name()))
        .map(|entry| entry.path())
        .filter(|path| is_audio_file(path))
        .collect();
    if new_files.is_empty() {
        return None;
    }

    if let Some(stem) = expected_stem {
        let exact: Vec<&PathBuf> = new_files
            .iter()
            .filter(|p| p.file_stem().and_then(|s| s.to_str()) == Some(stem))
            .collect();
        if let Some(path) = newest(&exact) {
            return Some(path);
        }
        let prefixed: Vec<&PathBuf> = new_files
            .iter()
            .filter(|p| {
                p.file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|s| s.starts_with(stem))
            })
            .collect();
        if let Some(path) = newest(&prefixed) {
            return Some(path);
        }
    }

    newest(&new_files.iter().collect::<Vec<_>>())
}

fn newest(candidates: &[&PathBuf]) -> Option<PathBuf> {
    candidates
        .iter()
        .max_by_key(|path| {
            path.metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH)
        })
        .map(|path| (*path).clone())
}
