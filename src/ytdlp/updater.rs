use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use tokio::process::Command;

const RELEASES_ATOM_URL: &str = "https://github.com/yt-dlp/yt-dlp/releases.atom";
const UPDATE_TIMEOUT: Duration = Duration::from_secs(180);
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Self-update for the managed yt-dlp binary.
///
/// Updating is expensive and rarely needed more than once, so the whole
/// process shares a single attempt slot regardless of how many downloads
/// are in flight; concurrent orchestrators share one instance via `Arc`.
/// The flag is only ever cleared by an explicit `reset()`.
pub struct ToolUpdater {
    binary_path: PathBuf,
    update_attempted: AtomicBool,
}

impl ToolUpdater {
    pub fn new(binary_path: PathBuf) -> Self {
        ToolUpdater { binary_path, update_attempted: AtomicBool::new(false) }
    }

    pub fn update_attempted(&self) -> bool {
        self.update_attempted.load(Ordering::SeqCst)
    }

    /// Re-arm the updater so a later signature failure may update again.
    pub fn reset(&self) {
        self.update_attempted.store(false, Ordering::SeqCst);
    }

    /// Consume the slot without updating. Used when the binary was fetched
    /// fresh at startup and another download right away would be pointless.
    pub fn mark_attempted(&self) {
        self.update_attempted.store(true, Ordering::SeqCst);
    }

    /// Claim the per-process update slot. Returns true for exactly one
    /// caller, even under a race.
    fn try_begin_update(&self) -> bool {
        !self.update_attempted.swap(true, Ordering::SeqCst)
    }

    /// Update the binary if no update has been attempted yet this process.
    /// Bounded by its own timeout so a slow download cannot eat the retry
    /// budget. Failures are logged and swallowed; the caller retries with
    /// whatever binary is present either way.
    pub async fn update_if_needed(&self) -> bool {
        if !self.try_begin_update() {
            log::debug!("yt-dlp update already attempted this session, skipping");
            return false;
        }
        log::info!("signature extraction failed, updating yt-dlp at {:?}...", self.binary_path);
        match tokio::time::timeout(UPDATE_TIMEOUT, self.run_update()).await {
            Ok(Ok(())) => {
                log::info!("yt-dlp updated successfully");
                true
            }
            Ok(Err(e)) => {
                log::warn!("could not update yt-dlp automatically: {}", e);
                false
            }
            Err(_) => {
                log::warn!("yt-dlp update timed out after {}s", UPDATE_TIMEOUT.as_secs());
                false
            }
        }
    }

    async fn run_update(&self) -> Result<()> {
        if let Some(current) = installed_version(&self.binary_path).await {
            log::info!("current yt-dlp version: {}", current);
            match latest_release_version().await {
                Ok(latest) if latest.contains(&current) => {
                    log::info!("yt-dlp is already at the latest release ({})", latest);
                    return Ok(());
                }
                Ok(latest) => log::info!("latest yt-dlp release: {}", latest),
                Err(e) => log::warn!("could not check latest yt-dlp release: {}", e),
            }
        }

        download_file(&release_download_url(), &self.binary_path).await?;
        make_executable(&self.binary_path).await?;
        Ok(())
    }
}

/// Platform-specific asset name on the latest-release download path.
pub(crate) fn release_download_url() -> String {
    let asset = if cfg!(target_os = "windows") {
        "yt-dlp.exe"
    } else if cfg!(target_os = "linux") {
        "yt-dlp_linux"
    } else if cfg!(target_os = "macos") {
        "yt-dlp_macos"
    } else {
        "yt-dlp"
    };
    format!("https://github.com/yt-dlp/yt-dlp/releases/latest/download/{}", asset)
}

async fn installed_version(binary: &Path) -> Option<String> {
    let result = tokio::time::timeout(
        VERSION_CHECK_TIMEOUT,
        Command::new(binary).arg("--version").output(),
    )
    .await;
    match result {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
        }
        _ => None,
    }
}

/// Latest version tag from the releases Atom feed. Titles look like
/// "yt-dlp 2025.01.26"; the last whitespace-separated token is the tag.
async fn latest_release_version() -> Result<String> {
    let content = reqwest::get(RELEASES_ATOM_URL).await?.text().await?;
    let feed = feed_rs::parser::parse(content.as_bytes())?;
    let entry = feed
        .entries
        .first()
        .ok_or_else(|| anyhow::anyhow!("no entries found in releases feed"))?;
    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.clone())
        .unwrap_or_default();
    let version = title
        .trim()
        .split_whitespace()
        .next_back()
        .unwrap_or("")
        .to_string();
    if version.is_empty() {
        anyhow::bail!("releases feed entry has no usable title");
    }
    Ok(version)
}

pub(crate) async fn download_file(url: &str, path: &Path) -> Result<()> {
    log::info!("downloading {} to {:?}", url, path);

    let client = reqwest::Client::new();
    let mut response = client.get(url).send().await?;
    if !response.status().is_success() {
        anyhow::bail!("download failed for {}: HTTP status {}", url, response.status());
    }

    let mut file = tokio::fs::File::create(path).await?;
    while let Some(chunk) = response.chunk().await? {
        tokio::io::copy(&mut chunk.as_ref(), &mut file).await?;
    }

    log::info!("download completed successfully to {:?}", path);
    Ok(())
}

pub(crate) async fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = tokio::fs::metadata(path).await?.permissions();
        perms.set_mode(0o755);
        tokio::fs::set_permissions(path, perms).await?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn update_slot_is_claimed_at_most_once() {
        let updater = ToolUpdater::new(PathBuf::from("/tmp/yt-dlp"));
        assert!(!updater.update_attempted());
        assert!(updater.try_begin_update());
        assert!(updater.update_attempted());
        assert!(!updater.try_begin_update());
    }

    #[test]
    fn reset_rearms_the_updater() {
        let updater = ToolUpdater::new(PathBuf::from("/tmp/yt-dlp"));
        assert!(updater.try_begin_update());
        updater.reset();
        assert!(!updater.update_attempted());
        assert!(updater.try_begin_update());
    }

    #[tokio::test]
    async fn concurrent_callers_claim_exactly_one_slot() {
        let updater = Arc::new(ToolUpdater::new(PathBuf::from("/tmp/yt-dlp")));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let updater = Arc::clone(&updater);
            handles.push(tokio::spawn(async move { updater.try_begin_update() }));
        }
        let mut claimed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                claimed += 1;
            }
        }
        assert_eq!(claimed, 1);
    }

    #[test]
    fn release_url_names_a_platform_asset() {
        let url = release_download_url();
        assert!(url.starts_with("https://github.com/yt-dlp/yt-dlp/releases/latest/download/"));
        assert!(url.rsplit('/').next().unwrap().starts_with("yt-dlp"));
    }
}
