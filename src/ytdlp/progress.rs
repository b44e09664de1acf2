use std::sync::LazyLock;

use regex::Regex;

/// Stage of the pipeline a progress line belongs to. `Splitting` and
/// `Skipped` are only ever reported by the track splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStage {
    Downloading,
    Extracting,
    Merging,
    Splitting,
    Skipped,
    Completed,
}

impl DownloadStage {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStage::Downloading => "downloading",
            DownloadStage::Extracting => "extracting",
            DownloadStage::Merging => "merging",
            DownloadStage::Splitting => "splitting",
            DownloadStage::Skipped => "skipped",
            DownloadStage::Completed => "completed",
        }
    }
}

/// One normalized snapshot of progress, produced from a single output line.
/// Lives only for the duration of the callback invocation.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub percent: f64,
    pub total_bytes: Option<f64>,
    pub downloaded_bytes: Option<f64>,
    pub speed_bytes: Option<f64>,
    pub eta_seconds: Option<u64>,
    pub stage: DownloadStage,
    pub message: Option<String>,
}

impl ProgressUpdate {
    /// Status-only event for a relevant line that carries no percentage.
    pub(crate) fn status_only(stage: DownloadStage, line: &str) -> Self {
        ProgressUpdate {
            percent: 0.0,
            total_bytes: None,
            downloaded_bytes: None,
            speed_bytes: None,
            eta_seconds: None,
            stage,
            message: Some(line.to_string()),
        }
    }

    /// Flat percentage event with no byte-level detail (splitter progress).
    pub(crate) fn flat(percent: f64, stage: DownloadStage) -> Self {
        ProgressUpdate {
            percent,
            total_bytes: None,
            downloaded_bytes: None,
            speed_bytes: None,
            eta_seconds: None,
            stage,
            message: None,
        }
    }
}

pub type ProgressFn<'a> = dyn FnMut(&ProgressUpdate) + Send + 'a;

static ANSI_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1B\[[0-?]*[ -/]*[@-~]").unwrap());
static PERCENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+\.?\d*)%").unwrap());
static TOTAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)of\s+(~?\s*[\d.]+\s*[KMGT]?i?B)").unwrap());
static SPEED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)([\d.]+\s*[KMGT]?i?B)/s").unwrap());
static SIZE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^~?\s*([\d.]+)\s*([KMGT]?i?B)$").unwrap());
// ETA shows up in three layouts depending on how long the download will take
static ETA_COLON_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)ETA\s+(\d+):(\d+)").unwrap());
static ETA_HM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)ETA\s+(\d+)h\s*(\d+)m").unwrap());
static ETA_MS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)ETA\s+(\d+)m\s*(\d+)s").unwrap());

/// Convert a yt-dlp size string like `5.2MiB` or `~1.5GB` to bytes.
///
/// KB and KiB are both treated as 1024-based on purpose; yt-dlp's own
/// output uses the spellings interchangeably.
pub fn convert_size_to_bytes(size: &str) -> Option<f64> {
    let caps = SIZE_RE.captures(size.trim())?;
    let value: f64 = caps[1].parse().ok()?;
    Some(value * unit_multiplier(&caps[2]))
}

fn unit_multiplier(unit: &str) -> f64 {
    match unit.to_uppercase().as_str() {
        "B" => 1.0,
        "KB" | "KIB" => 1024.0,
        "MB" | "MIB" => 1024.0 * 1024.0,
        "GB" | "GIB" => 1024.0 * 1024.0 * 1024.0,
        "TB" | "TIB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
        _ => 1.0,
    }
}

pub(crate) fn strip_ansi(line: &str) -> String {
    ANSI_RE.replace_all(line, "").to_string()
}

/// Classify one line of downloader output.
///
/// Returns a `ProgressUpdate` for progress and status lines, `None` for
/// everything else. A single line never yields more than one event.
pub fn parse_progress_line(line: &str) -> Option<ProgressUpdate> {
    let clean = strip_ansi(line);
    let trimmed = clean.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lower = trimmed.to_lowercase();

    // Only lines carrying a stage marker are worth reporting; yt-dlp prints
    // plenty of unrelated diagnostics on the same streams.
    let relevant = lower.contains("[download]")
        || lower.contains("[extractaudio]")
        || lower.contains("[mergeformat]")
        || (lower.contains("[info]")
            && (lower.contains("downloading") || lower.contains("extracting")));
    if !relevant {
        return None;
    }

    let stage = detect_stage(&lower);

    let percent: f64 = match PERCENT_RE.captures(trimmed) {
        Some(caps) => caps[1].parse().ok()?,
        // Relevant but percentless: surface it as a status message only.
        None => return Some(ProgressUpdate::status_only(stage, trimmed)),
    };

    let total_bytes = TOTAL_RE
        .captures(trimmed)
        .and_then(|caps| convert_size_to_bytes(&caps[1]));
    let downloaded_bytes = total_bytes.map(|total| (percent / 100.0) * total);

    let speed_bytes = SPEED_RE
        .captures(trimmed)
        .and_then(|caps| convert_size_to_bytes(&caps[1]));

    let eta_seconds = parse_eta(trimmed);

    Some(ProgressUpdate {
        percent,
        total_bytes,
        downloaded_bytes,
        speed_bytes,
        eta_seconds,
        stage: if percent >= 100.0 { DownloadStage::Completed } else { stage },
        message: None,
    })
}

fn detect_stage(lower: &str) -> DownloadStage {
    if lower.contains("[extractaudio]") || lower.contains("extracting") {
        DownloadStage::Extracting
    } else if lower.contains("[mergeformat]") || lower.contains("merging") {
        DownloadStage::Merging
    } else {
        DownloadStage::Downloading
    }
}

fn parse_eta(line: &str) -> Option<u64> {
    if let Some(caps) = ETA_COLON_RE.captures(line) {
        let minutes: u64 = caps[1].parse().ok()?;
        let seconds: u64 = caps[2].parse().ok()?;
        return Some(minutes * 60 + seconds);
    }
    if let Some(caps) = ETA_HM_RE.captures(line) {
        let hours: u64 = caps[1].parse().ok()?;
        let minutes: u64 = caps[2].parse().ok()?;
        return Some(hours * 3600 + minutes * 60);
    }
    if let Some(caps) = ETA_MS_RE.captures(line) {
        let minutes: u64 = caps[1].parse().ok()?;
        let seconds: u64 = caps[2].parse().ok()?;
        return Some(minutes * 60 + seconds);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: f64 = 1024.0 * 1024.0;

    #[test]
    fn parses_full_download_line() {
        let update =
            parse_progress_line("[download]  45.2% of ~12.3MiB at 1.5MiB/s ETA 00:08").unwrap();
        assert!((update.percent - 45.2).abs() < f64::EPSILON);
        assert!((update.total_bytes.unwrap() - 12.3 * MIB).abs() < 1.0);
        assert!((update.downloaded_bytes.unwrap() - 0.452 * 12.3 * MIB).abs() < 1.0);
        assert!((update.speed_bytes.unwrap() - 1.5 * MIB).abs() < 1.0);
        assert_eq!(update.eta_seconds, Some(8));
        assert_eq!(update.stage, DownloadStage::Downloading);
    }

    #[test]
    fn percent_is_exact() {
        for (line, expected) in [
            ("[download]   0.1% of 5.0MiB at 1.0MiB/s ETA 01:00", 0.1),
            ("[download]  99.9% of 5.0MiB at 1.0MiB/s ETA 00:01", 99.9),
            ("[download]  50% of 5.0MiB", 50.0),
        ] {
            let update = parse_progress_line(line).unwrap();
            assert!((update.percent - expected).abs() < f64::EPSILON, "line: {line}");
        }
    }

    #[test]
    fn hundred_percent_is_completed() {
        let update = parse_progress_line("[download] 100% of 5.2MiB in 00:05").unwrap();
        assert_eq!(update.stage, DownloadStage::Completed);
        assert_eq!(update.eta_seconds, None);
    }

    #[test]
    fn size_units_are_binary_for_both_spellings() {
        for (unit, order) in
            [("B", 0u32), ("KB", 1), ("KiB", 1), ("MB", 2), ("MiB", 2), ("GB", 3), ("GiB", 3), ("TB", 4), ("TiB", 4)]
        {
            let bytes = convert_size_to_bytes(&format!("2.5{unit}")).unwrap();
            let expected = 2.5 * 1024f64.powi(order as i32);
            assert!((bytes - expected).abs() < 1e-6, "unit: {unit}");
        }
    }

    #[test]
    fn size_round_trips_through_its_unit() {
        let bytes = convert_size_to_bytes("12.3MiB").unwrap();
        let back = bytes / MIB;
        assert!((back - 12.3).abs() < 1e-9);
    }

    #[test]
    fn tilde_prefix_is_accepted() {
        assert_eq!(convert_size_to_bytes("~1KiB"), Some(1024.0));
        assert_eq!(convert_size_to_bytes("garbage"), None);
    }

    #[test]
    fn status_line_without_percent() {
        let update =
            parse_progress_line("[ExtractAudio] Destination: 01 - Breathe.mp3").unwrap();
        assert_eq!(update.percent, 0.0);
        assert_eq!(update.stage, DownloadStage::Extracting);
        assert!(update.message.unwrap().contains("Breathe"));
    }

    #[test]
    fn merge_marker_sets_stage() {
        let update =
            parse_progress_line("[MergeFormat] Merging formats into \"out.mkv\"").unwrap();
        assert_eq!(update.stage, DownloadStage::Merging);
    }

    #[test]
    fn info_marker_needs_activity_keyword() {
        assert!(parse_progress_line("[info] Downloading video thumbnail").is_some());
        assert!(parse_progress_line("[info] Writing video metadata as JSON").is_none());
    }

    #[test]
    fn noise_is_ignored() {
        assert!(parse_progress_line("").is_none());
        assert!(parse_progress_line("WARNING: unable to obtain file audio codec").is_none());
        assert!(parse_progress_line("[youtube] abc: Downloading webpage").is_none());
    }

    #[test]
    fn eta_layouts() {
        let colon = parse_progress_line("[download] 10% of 1GiB at 2MiB/s ETA 01:23").unwrap();
        assert_eq!(colon.eta_seconds, Some(83));
        let hm = parse_progress_line("[download] 10% of 1GiB at 2MiB/s ETA 1h 23m").unwrap();
        assert_eq!(hm.eta_seconds, Some(3600 + 23 * 60));
        let ms = parse_progress_line("[download] 10% of 1GiB at 2MiB/s ETA 1m 23s").unwrap();
        assert_eq!(ms.eta_seconds, Some(83));
    }

    #[test]
    fn ansi_codes_are_stripped() {
        let update =
            parse_progress_line("\x1b[K[download]  45.2% of 12.3MiB at 1.5MiB/s ETA 00:08")
                .unwrap();
        assert!((update.percent - 45.2).abs() < f64::EPSILON);
    }
}
