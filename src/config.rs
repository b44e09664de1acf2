use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;

use crate::ytdlp::retry::RetryPolicy;

pub fn find_dotenv() -> Result<Option<PathBuf>> {
    // 1. Check directory where the executable is located
    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(exe_dir) = current_exe.parent() {
            let exe_dir_dotenv = exe_dir.join(".env");
            if exe_dir_dotenv.exists() {
                return Ok(Some(exe_dir_dotenv));
            }
        }
    }

    // 2. Check current working directory (for cargo run compatibility)
    let current_dir = std::env::current_dir()?;
    let current_dotenv = current_dir.join(".env");
    if current_dotenv.exists() {
        return Ok(Some(current_dotenv));
    }

    Ok(None)
}

pub fn load_environment() -> Result<()> {
    match find_dotenv()? {
        Some(path) => {
            dotenv::from_path(&path)?;
            log::info!("Loaded environment variables from {:?}", path);
        }
        None => {
            log::warn!("No .env file found. Using system environment variables.");
        }
    }
    Ok(())
}

/// Download subsystem tuning, overridable through the environment.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub download_dir: PathBuf,
    pub libraries_dir: PathBuf,
    pub max_retries: u32,
    pub base_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub attempt_timeout: Duration,
    pub max_total_time: Duration,
    pub stall_timeout: Duration,
}

impl DownloadConfig {
    pub fn from_env() -> Self {
        DownloadConfig {
            download_dir: env_path("SONGFETCHER_DOWNLOAD_DIR", "downloads"),
            libraries_dir: env_path("SONGFETCHER_LIB_DIR", "lib"),
            max_retries: env_parse("SONGFETCHER_MAX_RETRIES", 5),
            base_retry_delay: Duration::from_secs_f64(env_parse(
                "SONGFETCHER_BASE_RETRY_DELAY",
                2.0,
            )),
            max_retry_delay: Duration::from_secs_f64(env_parse(
                "SONGFETCHER_MAX_RETRY_DELAY",
                60.0,
            )),
            attempt_timeout: Duration::from_secs(env_parse("SONGFETCHER_TIMEOUT", 600)),
            max_total_time: Duration::from_secs(env_parse("SONGFETCHER_MAX_TOTAL_TIME", 1800)),
            stall_timeout: Duration::from_secs(env_parse("SONGFETCHER_STALL_TIMEOUT", 60)),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: self.base_retry_delay,
            max_delay: self.max_retry_delay,
            attempt_timeout: self.attempt_timeout,
            max_total_time: self.max_total_time,
            stall_timeout: self.stall_timeout,
        }
    }
}

fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            log::warn!("ignoring unparsable {}={:?}", name, value);
            default
        }),
        Err(_) => default,
    }
}

fn env_path(name: &str, default: &str) -> PathBuf {
    std::env::var_os(name)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}
