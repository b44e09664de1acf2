use std::time::{Duration, Instant};

use crate::ytdlp::progress::{DownloadStage, ProgressUpdate};

// Minimum spacing between logged progress lines; completion always logs.
const MIN_UPDATE_INTERVAL: Duration = Duration::from_millis(1000);

const MIB: f64 = 1024.0 * 1024.0;

/// Logs progress updates without flooding the output on fast downloads.
pub struct ProgressReporter {
    last_update: Option<Instant>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        ProgressReporter { last_update: None }
    }

    /// Log one update. Returns whether a line was actually emitted.
    pub fn update(&mut self, update: &ProgressUpdate) -> bool {
        if let Some(message) = &update.message {
            log::info!("{}: {}", update.stage.as_str(), message);
            return true;
        }

        let now = Instant::now();
        let completed = update.stage == DownloadStage::Completed || update.percent >= 100.0;
        if !completed {
            if let Some(last) = self.last_update {
                if now.duration_since(last) < MIN_UPDATE_INTERVAL {
                    return false;
                }
            }
        }
        self.last_update = Some(now);

        let mut line = format!("{} {:.1}%", update.stage.as_str(), update.percent);
        if let (Some(done), Some(total)) = (update.downloaded_bytes, update.total_bytes) {
            line.push_str(&format!(" ({:.1}/{:.1} MiB)", done / MIB, total / MIB));
        }
        if let Some(speed) = update.speed_bytes {
            line.push_str(&format!(" at {:.1} MiB/s", speed / MIB));
        }
        if let Some(eta) = update.eta_seconds {
            line.push_str(&format!(" ETA {}:{:02}", eta / 60, eta % 60));
        }
        log::info!("{}", line);
        true
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}
