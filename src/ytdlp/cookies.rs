use std::path::Path;

// Default-profile cookie store locations for macOS, Linux and Windows.
const CHROME_COOKIE_PATHS: &[&str] = &[
    "Library/Application Support/Google/Chrome/Default/Cookies",
    "Library/Application Support/Google/Chrome/Profile 1/Cookies",
    ".config/google-chrome/Default/Cookies",
    ".config/google-chrome/Profile 1/Cookies",
    "AppData/Local/Google/Chrome/User Data/Default/Cookies",
    "AppData/Local/Google/Chrome/User Data/Profile 1/Cookies",
];

const FIREFOX_PROFILE_DIRS: &[&str] = &[
    "Library/Application Support/Firefox/Profiles",
    ".mozilla/firefox",
    "AppData/Roaming/Mozilla/Firefox/Profiles",
];

/// Pick a browser whose cookie store yt-dlp can read, Chrome preferred.
/// Returns the identifier passed to `--cookies-from-browser`.
pub fn detect_cookie_browser() -> Option<&'static str> {
    let home = dirs::home_dir()?;
    detect_cookie_browser_in(&home)
}

fn detect_cookie_browser_in(home: &Path) -> Option<&'static str> {
    if has_chrome_cookies(home) {
        Some("chrome")
    } else if has_firefox_cookies(home) {
        Some("firefox")
    } else {
        None
    }
}

fn has_chrome_cookies(home: &Path) -> bool {
    CHROME_COOKIE_PATHS.iter().any(|rel| home.join(rel).exists())
}

fn has_firefox_cookies(home: &Path) -> bool {
    // Firefox names profile directories randomly; any subdirectory counts.
    FIREFOX_PROFILE_DIRS.iter().any(|rel| {
        let dir = home.join(rel);
        dir.is_dir()
            && std::fs::read_dir(&dir)
                .map(|entries| {
                    entries.flatten().any(|entry| entry.path().is_dir())
                })
                .unwrap_or(false)
    })
}
