use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::ytdlp::request::TrackMetadata;

/// Extensions the downloader and splitter may produce.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "ogg", "opus", "flac", "wav", "aac", "webm"];

/// Files the OS litters download directories with.
pub const SYSTEM_FILES: &[&str] = &[".DS_Store", "Thumbs.db", "desktop.ini"];

// Album-side track titles like "Title: a) Part One / b) Part Two" get their
// sub-part tails removed to keep filenames short.
static SUB_PART_AFTER_COLON_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i):\s*[a-z]\)\s+[^/]+(?:\s*[/,]\s*[a-z]\)\s+[^/]+)*").unwrap()
});
static SUB_PART_TAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+[a-z]\)\s+[^/]+(?:\s*[/,]\s*[a-z]\)\s+[^/]+)*$").unwrap()
});
static HAS_COLON_SUB_PART_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i):\s*[a-z]\)").unwrap());
static HAS_TAIL_SUB_PART_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\s+[a-z]\)\s+").unwrap());
static TRAILING_SEPARATOR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[:;]\s*$").unwrap());
static INVALID_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).unwrap());
static UNDERSCORE_RUNS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_+").unwrap());

const MAX_FILENAME_LEN: usize = 200;

/// Make a track or album title safe to use as a filename component.
/// The result never contains a path separator, so joined paths cannot
/// escape their base directory.
pub fn sanitize_filename(name: &str) -> String {
    if name.is_empty() {
        return "unknown".to_string();
    }

    let mut sanitized = name.to_string();

    if HAS_COLON_SUB_PART_RE.is_match(&sanitized) {
        sanitized = SUB_PART_AFTER_COLON_RE.replace_all(&sanitized, "").into_owned();
    } else if HAS_TAIL_SUB_PART_RE.is_match(&sanitized) {
        sanitized = SUB_PART_TAIL_RE.replace_all(&sanitized, "").into_owned();
    }

    sanitized = TRAILING_SEPARATOR_RE.replace_all(&sanitized, "").into_owned();
    sanitized = sanitized.trim().replace("..", "_");
    sanitized = INVALID_CHARS_RE.replace_all(&sanitized, "_").into_owned();
    sanitized = UNDERSCORE_RUNS_RE.replace_all(&sanitized, "_").into_owned();

    let sanitized: String = sanitized
        .trim_matches(|c| c == '_' || c == '.')
        .chars()
        .take(MAX_FILENAME_LEN)
        .collect();

    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}

/// Destination directory for a download: `Artist/Album (year)/` under the
/// base directory when metadata is known, the base directory otherwise.
/// Components are sanitized, so the result always stays inside the base.
pub fn organized_path(
    download_dir: &Path,
    metadata: Option<&TrackMetadata>,
) -> std::io::Result<PathBuf> {
    let Some(meta) = metadata else {
        return Ok(download_dir.to_path_buf());
    };

    let artist = meta
        .artist
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or("Unknown Artist");
    let album = meta
        .album
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or("Unknown Album");

    let album_dir = match meta.year {
        Some(year) => sanitize_filename(&format!("{album} ({year})")),
        None => sanitize_filename(album),
    };
    let organized = download_dir.join(sanitize_filename(artist)).join(album_dir);
    std::fs::create_dir_all(&organized)?;
    Ok(organized)
}

/// Whether a path looks like an audio file this tool would have produced.
pub fn is_audio_file(path: &Path) -> bool {
    let has_audio_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| AUDIO_EXTENSIONS.iter().any(|a| a.eq_ignore_ascii_case(e)));
    let is_system = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| SYSTEM_FILES.contains(&n));
    has_audio_ext && !is_system && path.is_file()
}

/// Find a file that already satisfies a download or split for `stem`:
/// first an exact `stem.<ext>` match, then any audio file whose name
/// starts with the stem (yt-dlp sometimes appends format suffixes).
pub fn find_existing_audio(dir: &Path, stem: &str) -> Option<PathBuf> {
    for ext in AUDIO_EXTENSIONS {
        let candidate = dir.join(format!("{stem}.{ext}"));
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    let pattern = format!("{}/{}*", dir.display(), glob::Pattern::escape(stem));
    glob::glob(&pattern).ok()?.flatten().find(|path| is_audio_file(path))
}
