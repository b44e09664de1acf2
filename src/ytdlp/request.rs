use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One logical download: what to fetch, how, and where to put it.
/// Built once by the fetcher and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub url: String,
    pub quality: Quality,
    pub audio_only: bool,
    pub output_template: String,
    pub metadata: Option<TrackMetadata>,
}

impl DownloadRequest {
    /// Whether this request should go through yt-dlp's audio extraction
    /// pipeline rather than a plain format selection.
    pub fn wants_audio(&self) -> bool {
        self.audio_only || matches!(self.quality, Quality::Audio)
    }
}

/// Quality selector passed to yt-dlp. `Audio` switches the command over to
/// extract-audio mode; everything else is a format selector string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Quality {
    Best,
    Worst,
    Audio,
    Format(String),
}

impl Quality {
    pub fn selector(&self) -> &str {
        match self {
            Quality::Best => "best",
            Quality::Worst => "worst",
            Quality::Audio => "bestaudio",
            Quality::Format(code) => code,
        }
    }
}

impl FromStr for Quality {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "best" => Quality::Best,
            "worst" => Quality::Worst,
            "audio" => Quality::Audio,
            other => Quality::Format(other.to_string()),
        })
    }
}

/// Tag data attached to a request. Drives the organized output directory
/// and the expected filename; every field is optional because providers
/// disagree about what they know.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackMetadata {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<u32>,
    pub track_number: Option<u32>,
}

impl TrackMetadata {
    /// Expected filename stem (`NN - Title`) when a title is known.
    pub fn file_stem(&self) -> Option<String> {
        let title = crate::utils::paths::sanitize_filename(self.title.as_deref()?);
        Some(match self.track_number {
            Some(number) => format!("{number:02} - {title}"),
            None => title,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_from_str() {
        assert_eq!("best".parse::<Quality>().unwrap(), Quality::Best);
        assert_eq!("worst".parse::<Quality>().unwrap(), Quality::Worst);
        assert_eq!("audio".parse::<Quality>().unwrap(), Quality::Audio);
        assert_eq!(
            "bestvideo[height<=720]".parse::<Quality>().unwrap(),
            Quality::Format("bestvideo[height<=720]".to_string())
        );
    }

    #[test]
    fn file_stem_prefixes_the_track_number() {
        let meta = TrackMetadata {
            title: Some("Breathe (In the Air)".into()),
            track_number: Some(2),
            ..TrackMetadata::default()
        };
        assert_eq!(meta.file_stem().unwrap(), "02 - Breathe (In the Air)");

        let untitled = TrackMetadata::default();
        assert_eq!(untitled.file_stem(), None);
    }

    #[test]
    fn audio_quality_implies_audio_mode() {
        let request = DownloadRequest {
            url: "https://example.com/watch?v=abc".to_string(),
            quality: Quality::Audio,
            audio_only: false,
            output_template: "%(title)s.%(ext)s".to_string(),
            metadata: None,
        };
        assert!(request.wants_audio());
    }
}
