use std::fmt;
use std::time::Duration;

/// Failure categories for a download attempt. Every category except
/// `Unavailable` is worth retrying; transient and unknown errors are
/// assumed recoverable by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Connection,
    RateLimit,
    ServerError,
    Signature,
    BotDetection,
    Unavailable,
    Timeout,
    Unknown,
}

impl ErrorCategory {
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorCategory::Unavailable)
    }

    /// Minimum delay before the next attempt, independent of the
    /// exponential backoff value.
    pub fn backoff_floor(self) -> Option<Duration> {
        match self {
            ErrorCategory::RateLimit => Some(Duration::from_secs(10)),
            ErrorCategory::Connection => Some(Duration::from_secs(5)),
            ErrorCategory::Signature => Some(Duration::from_secs(3)),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ErrorCategory::Connection => "connection error",
            ErrorCategory::RateLimit => "rate limit",
            ErrorCategory::ServerError => "server error",
            ErrorCategory::Signature => "signature extraction error",
            ErrorCategory::BotDetection => "bot detection",
            ErrorCategory::Unavailable => "video unavailable",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Unknown => "error",
        }
    }

    /// Remediation hint for categories with a known, communicable fix.
    pub fn guidance(self) -> Option<&'static str> {
        match self {
            ErrorCategory::Signature => Some(
                "signature extraction errors usually mean yt-dlp needs updating; \
                 run `yt-dlp -U` or reinstall the latest release",
            ),
            ErrorCategory::BotDetection => Some(
                "the site blocked the request as automated; sign in to the site in \
                 Chrome or Firefox so browser cookies can be used",
            ),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

const BOT_HTTP_KEYWORDS: &[&str] = &[
    "403",
    "401",
    "forbidden",
    "unauthorized",
    "access denied",
    "http error 403",
    "http error 401",
    "http 403",
    "http 401",
    "error 403",
    "error 401",
    "status code 403",
    "status code 401",
];

const CONNECTION_KEYWORDS: &[&str] = &[
    "connection",
    "network",
    "timeout",
    "timed out",
    "unreachable",
    "refused",
    "reset",
    "broken pipe",
];

const SIGNATURE_KEYWORDS: &[&str] = &[
    "signature extraction",
    "signature",
    "player",
    "extractor",
    "unable to extract",
    "could not extract",
];

const RATE_LIMIT_KEYWORDS: &[&str] = &["rate limit", "429", "too many requests", "quota"];

const SERVER_ERROR_KEYWORDS: &[&str] = &[
    "500",
    "502",
    "503",
    "504",
    "internal server error",
    "bad gateway",
    "service unavailable",
    "gateway timeout",
];

const BOT_KEYWORDS: &[&str] = &["bot", "sign in to confirm", "captcha", "verify"];

const UNAVAILABLE_KEYWORDS: &[&str] = &[
    "video unavailable",
    "private video",
    "deleted",
    "removed",
    "not available",
    "does not exist",
];

/// Classify a failed attempt's diagnostic text.
///
/// Pure keyword matching, first match wins. The 403/401 rule deliberately
/// precedes the generic bot-detection rule: both map to `BotDetection`
/// today, and the explicit ordering keeps any future category split an
/// intentional decision.
pub fn classify_error(output: &str) -> (bool, ErrorCategory) {
    let lower = output.to_lowercase();
    let matches_any = |keywords: &[&str]| keywords.iter().any(|k| lower.contains(k));

    let category = if matches_any(BOT_HTTP_KEYWORDS) {
        ErrorCategory::BotDetection
    } else if matches_any(CONNECTION_KEYWORDS) {
        ErrorCategory::Connection
    } else if matches_any(SIGNATURE_KEYWORDS) {
        ErrorCategory::Signature
    } else if matches_any(RATE_LIMIT_KEYWORDS) {
        ErrorCategory::RateLimit
    } else if matches_any(SERVER_ERROR_KEYWORDS) {
        ErrorCategory::ServerError
    } else if matches_any(BOT_KEYWORDS) {
        ErrorCategory::BotDetection
    } else if matches_any(UNAVAILABLE_KEYWORDS) {
        ErrorCategory::Unavailable
    } else {
        ErrorCategory::Unknown
    };

    (category.is_retryable(), category)
}

/// Terminal failure of one logical download. Carries everything the caller
/// needs for user-facing messaging: the category, how many attempts were
/// made, how long they took, and the last diagnostic text.
#[derive(Debug)]
pub struct DownloadFailure {
    pub category: ErrorCategory,
    pub attempts: u32,
    pub elapsed: Duration,
    pub budget_exhausted: bool,
    pub diagnostic: String,
}

impl DownloadFailure {
    pub fn new(
        category: ErrorCategory,
        attempts: u32,
        elapsed: Duration,
        diagnostic: impl Into<String>,
    ) -> Self {
        DownloadFailure {
            category,
            attempts,
            elapsed,
            budget_exhausted: false,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn budget_exhausted(
        attempts: u32,
        elapsed: Duration,
        diagnostic: impl Into<String>,
    ) -> Self {
        DownloadFailure {
            category: ErrorCategory::Timeout,
            attempts,
            elapsed,
            budget_exhausted: true,
            diagnostic: diagnostic.into(),
        }
    }

    /// True when the cumulative wall-clock budget ran out; the caller must
    /// not start further attempts or strategies.
    pub fn is_budget_exhausted(&self) -> bool {
        self.budget_exhausted
    }
}

impl fmt::Display for DownloadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} attempt{} in {:.1}s: {}",
            self.category.label(),
            self.attempts,
            if self.attempts == 1 { "" } else { "s" },
            self.elapsed.as_secs_f64(),
            self.diagnostic.trim(),
        )?;
        if let Some(hint) = self.category.guidance() {
            write!(f, " ({hint})")?;
        }
        Ok(())
    }
}

impl std::error::Error for DownloadFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forbidden_is_bot_detection() {
        let (retryable, category) = classify_error("HTTP Error 403: Forbidden");
        assert!(retryable);
        assert_eq!(category, ErrorCategory::BotDetection);
    }

    #[test]
    fn http_codes_take_precedence_over_bot_keywords() {
        // "403" and "sign in to confirm" often co-occur; rule 1 wins.
        let (_, category) =
            classify_error("ERROR: HTTP Error 403. Sign in to confirm you're not a bot");
        assert_eq!(category, ErrorCategory::BotDetection);
    }

    #[test]
    fn connection_errors() {
        for text in ["Connection reset by peer", "network is unreachable", "read timed out"] {
            let (retryable, category) = classify_error(text);
            assert!(retryable);
            assert_eq!(category, ErrorCategory::Connection, "text: {text}");
        }
    }

    #[test]
    fn signature_errors() {
        let (retryable, category) =
            classify_error("ERROR: Unable to extract signature function name");
        assert!(retryable);
        assert_eq!(category, ErrorCategory::Signature);
    }

    #[test]
    fn rate_limit_errors() {
        let (_, category) = classify_error("HTTP Error 429: Too Many Requests");
        assert_eq!(category, ErrorCategory::RateLimit);
    }

    #[test]
    fn server_errors() {
        let (_, category) = classify_error("HTTP Error 503: Service Unavailable");
        assert_eq!(category, ErrorCategory::ServerError);
    }

    #[test]
    fn bot_keywords() {
        let (retryable, category) = classify_error("Please solve the captcha to continue");
        assert!(retryable);
        assert_eq!(category, ErrorCategory::BotDetection);
    }

    #[test]
    fn unavailable_is_the_only_non_retryable() {
        let (retryable, category) = classify_error("ERROR: Video unavailable");
        assert!(!retryable);
        assert_eq!(category, ErrorCategory::Unavailable);

        for category in [
            ErrorCategory::Connection,
            ErrorCategory::RateLimit,
            ErrorCategory::ServerError,
            ErrorCategory::Signature,
            ErrorCategory::BotDetection,
            ErrorCategory::Timeout,
            ErrorCategory::Unknown,
        ] {
            assert!(category.is_retryable(), "category: {category:?}");
        }
    }

    #[test]
    fn unknown_fails_open() {
        let (retryable, category) = classify_error("something completely novel happened");
        assert!(retryable);
        assert_eq!(category, ErrorCategory::Unknown);
    }

    #[test]
    fn classification_is_deterministic() {
        let text = "ERROR: Video unavailable";
        assert_eq!(classify_error(text), classify_error(text));
    }

    #[test]
    fn backoff_floors() {
        assert_eq!(ErrorCategory::RateLimit.backoff_floor(), Some(Duration::from_secs(10)));
        assert_eq!(ErrorCategory::Connection.backoff_floor(), Some(Duration::from_secs(5)));
        assert_eq!(ErrorCategory::Signature.backoff_floor(), Some(Duration::from_secs(3)));
        assert_eq!(ErrorCategory::BotDetection.backoff_floor(), None);
        assert_eq!(ErrorCategory::Unknown.backoff_floor(), None);
    }

    #[test]
    fn failure_display_carries_guidance() {
        let failure = DownloadFailure::new(
            ErrorCategory::Signature,
            3,
            Duration::from_secs(42),
            "ERROR: Unable to extract signature",
        );
        let text = failure.to_string();
        assert!(text.contains("3 attempts"));
        assert!(text.contains("yt-dlp -U"));

        let plain = DownloadFailure::new(
            ErrorCategory::Connection,
            1,
            Duration::from_secs(5),
            "reset",
        );
        assert!(!plain.to_string().contains('('));
    }
}
