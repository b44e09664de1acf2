use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::fs;

use crate::ytdlp::updater::{download_file, make_executable, release_download_url};

pub fn is_executable_present(path: &Path) -> bool {
    path.exists() && is_executable(path)
}

pub fn is_executable(path: &Path) -> bool {
    #[cfg(windows)]
    {
        path.extension().is_some_and(|ext| ext == "exe")
    }
    #[cfg(not(windows))]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::metadata(path)
            .is_ok_and(|metadata| metadata.permissions().mode() & 0o111 != 0)
    }
}

/// Make sure the managed yt-dlp binary exists under `libraries_dir`,
/// downloading the latest release when it does not. Returns the binary
/// path and whether it was freshly downloaded.
pub async fn ensure_downloader(libraries_dir: &Path) -> Result<(PathBuf, bool)> {
    fs::create_dir_all(libraries_dir).await?;

    let binary = libraries_dir
        .join(if cfg!(target_os = "windows") { "yt-dlp.exe" } else { "yt-dlp" });

    if is_executable_present(&binary) {
        log::info!("yt-dlp already exists at {:?}", binary);
        return Ok((binary, false));
    }

    log::info!("yt-dlp not found, downloading latest version...");
    download_file(&release_download_url(), &binary).await?;
    make_executable(&binary).await?;

    if !is_executable_present(&binary) {
        anyhow::bail!("yt-dlp not available at {:?} after download", binary);
    }
    Ok((binary, true))
}

/// Locate ffmpeg on PATH. Only track splitting and audio extraction need
/// it, so absence is a warning at startup rather than a hard error.
pub fn find_ffmpeg() -> Option<PathBuf> {
    let name = if cfg!(target_os = "windows") { "ffmpeg.exe" } else { "ffmpeg" };
    std::env::var_os("PATH").and_then(|path| {
        std::env::split_paths(&path)
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable_present(candidate))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs::File;
    use tempfile::TempDir;

    #[test]
    fn test_is_executable_present() {
        let temp_dir = TempDir::new().unwrap();

        let non_existent = temp_dir.path().join("non_existent");
        assert!(!is_executable_present(&non_existent));

        let test_file = temp_dir.path().join("tool");
        File::create(&test_file).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            // Plain files are not executable until the bit is set.
            assert!(!is_executable_present(&test_file));
            let mut perms = std::fs::metadata(&test_file).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&test_file, perms).unwrap();
            assert!(is_executable_present(&test_file));
        }
    }

    #[test]
    #[serial]
    #[cfg(unix)]
    fn find_ffmpeg_searches_path() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let ffmpeg = temp_dir.path().join("ffmpeg");
        File::create(&ffmpeg).unwrap();
        let mut perms = std::fs::metadata(&ffmpeg).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&ffmpeg, perms).unwrap();

        let old_path = std::env::var_os("PATH");
        unsafe { std::env::set_var("PATH", temp_dir.path()) };
        let found = find_ffmpeg();
        match old_path {
            Some(old) => unsafe { std::env::set_var("PATH", old) },
            None => unsafe { std::env::remove_var("PATH") },
        }

        assert_eq!(found, Some(ffmpeg));
    }
}
