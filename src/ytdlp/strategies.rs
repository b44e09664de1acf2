use crate::ytdlp::request::DownloadRequest;

pub const MOBILE_USER_AGENT: &str = "Mozilla/5.0 (Linux; Android 13; SM-G991B) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Mobile Safari/537.36";
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// One recipe for invoking yt-dlp: which client identity to present, how
/// aggressive the tool's own retries should be, and whether browser
/// cookies may be attached. Stateless and reusable across requests.
#[derive(Debug, Clone, Copy)]
pub struct Strategy {
    pub name: &'static str,
    pub user_agent: &'static str,
    pub player_client: &'static str,
    pub retries: Option<u32>,
    pub extractor_retries: Option<u32>,
    pub sleep_requests: Option<u32>,
    pub allow_cookies: bool,
}

/// The escalation chain, fastest and most reliable first.
///
/// Cookies break mobile player clients, so only the last-resort web
/// strategy may attach them. The ordering is load-bearing: the fetcher
/// walks this list forward on escalation.
const STRATEGY_CHAIN: [Strategy; 5] = [
    Strategy {
        name: "android_music",
        user_agent: MOBILE_USER_AGENT,
        player_client: "android_music",
        retries: None,
        extractor_retries: None,
        sleep_requests: None,
        allow_cookies: false,
    },
    Strategy {
        name: "android",
        user_agent: MOBILE_USER_AGENT,
        player_client: "android",
        retries: None,
        extractor_retries: None,
        sleep_requests: None,
        allow_cookies: false,
    },
    Strategy {
        name: "android_music+retries",
        user_agent: MOBILE_USER_AGENT,
        player_client: "android_music",
        retries: Some(10),
        extractor_retries: Some(3),
        sleep_requests: None,
        allow_cookies: false,
    },
    Strategy {
        name: "android+retries+sleep",
        user_agent: MOBILE_USER_AGENT,
        player_client: "android",
        retries: Some(10),
        extractor_retries: None,
        sleep_requests: Some(1),
        allow_cookies: false,
    },
    Strategy {
        name: "web+cookies",
        user_agent: DESKTOP_USER_AGENT,
        player_client: "web",
        retries: None,
        extractor_retries: None,
        sleep_requests: None,
        allow_cookies: true,
    },
];

pub fn strategy_chain() -> &'static [Strategy] {
    &STRATEGY_CHAIN
}

impl Strategy {
    /// Build the complete yt-dlp argument list for one request. Pure data
    /// transformation; no I/O happens here.
    pub fn build_command(
        &self,
        request: &DownloadRequest,
        cookie_browser: Option<&str>,
    ) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--user-agent".into(),
            self.user_agent.into(),
            "--no-check-certificate".into(),
            "--ignore-errors".into(),
            "--no-warnings".into(),
            "--extractor-args".into(),
            format!("youtube:player_client={}", self.player_client),
        ];

        if let Some(retries) = self.retries {
            args.push("--retries".into());
            args.push(retries.to_string());
            args.push("--fragment-retries".into());
            args.push(retries.to_string());
        }
        if let Some(extractor_retries) = self.extractor_retries {
            args.push("--extractor-retries".into());
            args.push(extractor_retries.to_string());
        }
        if let Some(sleep) = self.sleep_requests {
            args.push("--sleep-requests".into());
            args.push(sleep.to_string());
            args.push("--sleep-interval".into());
            args.push(sleep.to_string());
        }

        // Cookies only ever ride along on the web client.
        if self.allow_cookies {
            if let Some(browser) = cookie_browser {
                args.push("--cookies-from-browser".into());
                args.push(browser.into());
            }
        }

        if request.wants_audio() {
            args.push("-x".into());
            args.push("--audio-format".into());
            args.push("mp3".into());
            args.push("--audio-quality".into());
            args.push("0".into());
            args.push("--postprocessor-args".into());
            args.push("ffmpeg:-b:a 320k".into());
        } else {
            args.push("-f".into());
            args.push(request.quality.selector().into());
        }

        // Without --newline, progress overwrites itself with carriage
        // returns and line-based parsing breaks.
        args.push("--progress".into());
        args.push("--newline".into());
        args.push("-o".into());
        args.push(request.output_template.clone());
        args.push(request.url.clone());

        args
    }
}
