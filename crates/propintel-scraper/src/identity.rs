//! Browser identities and request pacing.
//!
//! Each request goes out as one coherent browser: the `User-Agent`, the
//! `Accept` header and the client-hint headers all describe the same browser
//! and platform. Mixing them (a Firefox UA with `sec-ch-ua` hints, say) is an
//! easy bot signal.

use std::time::Duration;

use rand::seq::IndexedRandom;
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Browser engine family, which decides the header shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserFamily {
    /// Chrome, Edge and Chromium-based Android browsers. Send client hints.
    Chromium {
        sec_ch_ua: &'static str,
        platform: &'static str,
        mobile: bool,
    },
    Firefox,
    Safari,
}

/// One entry of the rotation pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentityProfile {
    pub user_agent: &'static str,
    pub family: BrowserFamily,
}

const CHROME_125: &str = r#""Google Chrome";v="125", "Chromium";v="125", "Not-A.Brand";v="99""#;
const CHROME_124: &str = r#""Google Chrome";v="124", "Chromium";v="124", "Not-A.Brand";v="99""#;
const EDGE_124: &str = r#""Microsoft Edge";v="124", "Chromium";v="124", "Not-A.Brand";v="99""#;

const fn chromium(
    user_agent: &'static str,
    sec_ch_ua: &'static str,
    platform: &'static str,
    mobile: bool,
) -> IdentityProfile {
    IdentityProfile {
        user_agent,
        family: BrowserFamily::Chromium {
            sec_ch_ua,
            platform,
            mobile,
        },
    }
}

/// Current desktop and mobile browsers, weighted toward Chrome.
pub const IDENTITY_POOL: &[IdentityProfile] = &[
    chromium(
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
        CHROME_125,
        "\"Windows\"",
        false,
    ),
    chromium(
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        CHROME_124,
        "\"Windows\"",
        false,
    ),
    chromium(
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
        CHROME_125,
        "\"macOS\"",
        false,
    ),
    chromium(
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
        CHROME_124,
        "\"macOS\"",
        false,
    ),
    chromium(
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/125.0.0.0 Safari/537.36",
        CHROME_125,
        "\"Linux\"",
        false,
    ),
    IdentityProfile {
        user_agent:
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:126.0) Gecko/20100101 Firefox/126.0",
        family: BrowserFamily::Firefox,
    },
    IdentityProfile {
        user_agent:
            "Mozilla/5.0 (Macintosh; Intel Mac OS X 14.5; rv:126.0) Gecko/20100101 Firefox/126.0",
        family: BrowserFamily::Firefox,
    },
    chromium(
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36 Edg/124.0.0.0",
        EDGE_124,
        "\"Windows\"",
        false,
    ),
    IdentityProfile {
        user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
        family: BrowserFamily::Safari,
    },
    chromium(
        "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.6367.82 Mobile Safari/537.36",
        CHROME_124,
        "\"Android\"",
        true,
    ),
];

const ACCEPT_LANGUAGES: &[&str] = &[
    "en-IN,en-GB;q=0.9,en;q=0.8",
    "en-US,en;q=0.9,hi;q=0.7",
    "en-GB,en;q=0.8",
];

const CHROMIUM_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8,application/signed-exchange;v=b3;q=0.7";
const FIREFOX_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";
const SAFARI_ACCEPT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

impl IdentityProfile {
    /// Picks a profile uniformly from [`IDENTITY_POOL`].
    #[must_use]
    pub fn random() -> &'static IdentityProfile {
        IDENTITY_POOL
            .choose(&mut rand::rng())
            .unwrap_or(&IDENTITY_POOL[0])
    }

    /// Builds the full request header set for this identity.
    ///
    /// `referer` is skipped if it is not a valid header value.
    #[must_use]
    pub fn headers(&self, referer: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let mut set = |name: &'static str, value: &'static str| {
            headers.insert(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            );
        };

        set("user-agent", self.user_agent);
        set(
            "accept-language",
            ACCEPT_LANGUAGES
                .choose(&mut rand::rng())
                .copied()
                .unwrap_or(ACCEPT_LANGUAGES[0]),
        );
        // accept-encoding is left to reqwest, which only decodes what it negotiated.
        set("upgrade-insecure-requests", "1");
        set("cache-control", "max-age=0");

        match self.family {
            BrowserFamily::Chromium {
                sec_ch_ua,
                platform,
                mobile,
            } => {
                set("accept", CHROMIUM_ACCEPT);
                set_fetch_metadata(&mut set);
                set("sec-ch-ua", sec_ch_ua);
                set("sec-ch-ua-mobile", if mobile { "?1" } else { "?0" });
                set("sec-ch-ua-platform", platform);
            }
            BrowserFamily::Firefox => {
                set("accept", FIREFOX_ACCEPT);
                set("dnt", "1");
                set_fetch_metadata(&mut set);
            }
            BrowserFamily::Safari => {
                set("accept", SAFARI_ACCEPT);
            }
        }

        if let Ok(value) = HeaderValue::from_str(referer) {
            headers.insert(reqwest::header::REFERER, value);
        }
        headers
    }
}

fn set_fetch_metadata(set: &mut impl FnMut(&'static str, &'static str)) {
    set("sec-fetch-dest", "document");
    set("sec-fetch-mode", "navigate");
    set("sec-fetch-site", "same-origin");
    set("sec-fetch-user", "?1");
}

/// Uniform random pause taken before every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayWindow {
    min_ms: u64,
    max_ms: u64,
}

impl DelayWindow {
    /// An inverted window collapses to `min_ms`.
    #[must_use]
    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms,
            max_ms: max_ms.max(min_ms),
        }
    }

    #[must_use]
    pub fn none() -> Self {
        Self::new(0, 0)
    }

    #[must_use]
    pub fn sample(&self) -> Duration {
        if self.min_ms == self.max_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rand::rng().random_range(self.min_ms..=self.max_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_has_distinct_user_agents() {
        let mut agents: Vec<&str> = IDENTITY_POOL.iter().map(|p| p.user_agent).collect();
        agents.sort_unstable();
        agents.dedup();
        assert_eq!(agents.len(), IDENTITY_POOL.len());
    }

    #[test]
    fn chromium_hints_match_user_agent_version() {
        for profile in IDENTITY_POOL {
            if let BrowserFamily::Chromium { sec_ch_ua, .. } = profile.family {
                let version = if profile.user_agent.contains("Chrome/125") {
                    "v=\"125\""
                } else {
                    "v=\"124\""
                };
                assert!(sec_ch_ua.contains(version), "{}", profile.user_agent);
                if profile.user_agent.contains("Edg/") {
                    assert!(sec_ch_ua.contains("Microsoft Edge"));
                }
            }
        }
    }

    #[test]
    fn firefox_headers_carry_dnt_and_no_client_hints() {
        let firefox = IDENTITY_POOL
            .iter()
            .find(|p| p.family == BrowserFamily::Firefox)
            .expect("pool has a firefox profile");
        let headers = firefox.headers("https://www.magicbricks.com/");
        assert_eq!(headers.get("dnt").unwrap(), "1");
        assert_eq!(headers.get("sec-fetch-mode").unwrap(), "navigate");
        assert!(headers.get("sec-ch-ua").is_none());
        assert_eq!(headers.get("referer").unwrap(), "https://www.magicbricks.com/");
    }

    #[test]
    fn safari_headers_are_minimal() {
        let safari = IDENTITY_POOL
            .iter()
            .find(|p| p.family == BrowserFamily::Safari)
            .expect("pool has a safari profile");
        let headers = safari.headers("https://www.magicbricks.com/");
        assert_eq!(headers.get("accept").unwrap(), SAFARI_ACCEPT);
        assert!(headers.get("sec-fetch-dest").is_none());
        assert!(headers.get("sec-ch-ua").is_none());
    }

    #[test]
    fn mobile_chromium_reports_android_platform() {
        let mobile = IDENTITY_POOL
            .iter()
            .find(|p| p.user_agent.contains("Android"))
            .expect("pool has a mobile profile");
        let headers = mobile.headers("https://www.magicbricks.com/");
        assert_eq!(headers.get("sec-ch-ua-mobile").unwrap(), "?1");
        assert_eq!(headers.get("sec-ch-ua-platform").unwrap(), "\"Android\"");
    }

    #[test]
    fn invalid_referer_is_dropped() {
        let headers = IDENTITY_POOL[0].headers("bad\nreferer");
        assert!(headers.get("referer").is_none());
        assert!(headers.get("user-agent").is_some());
    }

    #[test]
    fn delay_window_samples_within_bounds() {
        let window = DelayWindow::new(10, 20);
        for _ in 0..200 {
            let d = window.sample();
            assert!(d >= Duration::from_millis(10) && d <= Duration::from_millis(20));
        }
        assert_eq!(DelayWindow::none().sample(), Duration::ZERO);
        assert_eq!(DelayWindow::new(30, 5).sample(), Duration::from_millis(30));
    }
}
