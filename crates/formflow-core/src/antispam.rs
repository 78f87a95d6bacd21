//! Anti-Spam Gateway and CAPTCHA Verification
//!
//! Two independent gates with deliberately different failure policies:
//! - Content reputation check: best-effort, fails open when unavailable.
//! - CAPTCHA score check: a required gate on the entry page, so a network
//!   failure fails the submission.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

// =============================================================================
// Content reputation gateway
// =============================================================================

/// Distinct content-check failure categories
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpamReason {
    /// Required keyword missing from the message
    MissingKeyword,
    /// A deny-listed keyword was found
    BannedKeyword,
    /// Too many links in the message
    TooManyLinks,
    /// Not enough Japanese content
    NotEnoughJapanese,
}

/// Content check outcome
#[derive(Clone, Copy, Debug)]
pub struct SpamVerdict {
    pub valid: bool,
    pub reason: Option<SpamReason>,
}

impl SpamVerdict {
    pub fn ok() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn rejected(reason: SpamReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }
}

/// Pluggable reputation check
#[async_trait]
pub trait AntiSpamGateway: Send + Sync {
    /// Classify message text
    async fn check(&self, text: &str) -> SpamVerdict;

    /// IP deny-list check; `false` blocks the submission outright
    fn check_ip(&self, _ip: IpAddr) -> bool {
        true
    }
}

/// Gateway used when no reputation capability is configured (fail-open)
pub struct NoopGateway;

#[async_trait]
impl AntiSpamGateway for NoopGateway {
    async fn check(&self, _text: &str) -> SpamVerdict {
        SpamVerdict::ok()
    }
}

/// Keyword/link/language heuristics over the message text
pub struct KeywordGateway {
    /// Keyword the message must contain, if set
    required_keyword: Option<String>,
    /// Deny-listed keywords
    banned_keywords: HashSet<String>,
    /// Maximum allowed link count
    max_links: usize,
    /// Minimum ratio of Japanese characters in the message
    min_japanese_ratio: f64,
    /// Blocked sender addresses
    denied_ips: dashmap::DashMap<IpAddr, ()>,
}

impl KeywordGateway {
    pub fn new() -> Self {
        Self {
            required_keyword: None,
            banned_keywords: HashSet::new(),
            max_links: 3,
            min_japanese_ratio: 0.0,
            denied_ips: dashmap::DashMap::new(),
        }
    }

    pub fn require_keyword(mut self, keyword: &str) -> Self {
        self.required_keyword = Some(keyword.to_string());
        self
    }

    pub fn ban_keyword(mut self, keyword: &str) -> Self {
        self.banned_keywords.insert(keyword.to_string());
        self
    }

    pub fn max_links(mut self, n: usize) -> Self {
        self.max_links = n;
        self
    }

    pub fn min_japanese_ratio(mut self, ratio: f64) -> Self {
        self.min_japanese_ratio = ratio;
        self
    }

    pub fn deny_ip(&self, ip: IpAddr) {
        self.denied_ips.insert(ip, ());
    }

    fn japanese_ratio(text: &str) -> f64 {
        let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
        if chars.is_empty() {
            return 1.0;
        }
        let japanese = chars
            .iter()
            .filter(|c| {
                matches!(**c,
                    '\u{3040}'..='\u{309f}'   // hiragana
                    | '\u{30a0}'..='\u{30ff}' // katakana
                    | '\u{4e00}'..='\u{9fff}' // CJK ideographs
                    | '\u{ff66}'..='\u{ff9f}' // half-width katakana
                )
            })
            .count();
        japanese as f64 / chars.len() as f64
    }

    fn link_count(text: &str) -> usize {
        text.matches("http://").count() + text.matches("https://").count()
    }
}

impl Default for KeywordGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AntiSpamGateway for KeywordGateway {
    async fn check(&self, text: &str) -> SpamVerdict {
        if let Some(keyword) = &self.required_keyword {
            if !text.contains(keyword.as_str()) {
                return SpamVerdict::rejected(SpamReason::MissingKeyword);
            }
        }

        for keyword in &self.banned_keywords {
            if text.contains(keyword.as_str()) {
                return SpamVerdict::rejected(SpamReason::BannedKeyword);
            }
        }

        if Self::link_count(text) > self.max_links {
            return SpamVerdict::rejected(SpamReason::TooManyLinks);
        }

        if Self::japanese_ratio(text) < self.min_japanese_ratio {
            return SpamVerdict::rejected(SpamReason::NotEnoughJapanese);
        }

        SpamVerdict::ok()
    }

    fn check_ip(&self, ip: IpAddr) -> bool {
        !self.denied_ips.contains_key(&ip)
    }
}

// =============================================================================
// CAPTCHA verification
// =============================================================================

/// Score-based CAPTCHA configuration
#[derive(Clone, Debug)]
pub struct CaptchaConfig {
    pub secret: String,
    pub verify_url: String,
    /// Minimum acceptable score
    pub min_score: f64,
    pub timeout_secs: u64,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            verify_url: "https://www.google.com/recaptcha/api/siteverify".to_string(),
            min_score: 0.5,
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    success: bool,
    #[serde(default)]
    score: f64,
}

/// External score-based CAPTCHA check, gated per form on the entry page
pub struct CaptchaVerifier {
    config: CaptchaConfig,
    client: reqwest::Client,
}

impl CaptchaVerifier {
    pub fn new(config: CaptchaConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    /// Verify a response token. A required gate: network failure rejects.
    pub async fn verify(&self, token: &str, remote_ip: Option<IpAddr>) -> bool {
        if token.is_empty() {
            return false;
        }

        let mut params = vec![
            ("secret", self.config.secret.clone()),
            ("response", token.to_string()),
        ];
        if let Some(ip) = remote_ip {
            params.push(("remoteip", ip.to_string()));
        }

        let resp = self
            .client
            .post(&self.config.verify_url)
            .form(&params)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await;

        match resp {
            Ok(resp) => match resp.json::<VerifyResponse>().await {
                Ok(body) => body.success && body.score >= self.config.min_score,
                Err(e) => {
                    tracing::warn!("CAPTCHA response parse failed: {}", e);
                    false
                }
            },
            Err(e) => {
                tracing::warn!("CAPTCHA verification request failed: {}", e);
                false
            }
        }
    }
}
