//! Template Engine
//!
//! Tag substitution and conditional-block evaluation for mail and webhook
//! templates. Two passes, in order:
//!
//! 1. `{if:TAG}...{/if:TAG}` blocks are kept iff the tag maps to a
//!    non-empty string; afterwards runs of 3+ newlines collapse to 2.
//! 2. Every `{TAG}` occurrence is replaced from the tag map (absent tags
//!    become empty), with registered tag filters applied per value.

use crate::config::SiteInfo;
use crate::hooks::Hooks;
use chrono::{Datelike, Local, Timelike};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, LazyLock};

/// Tag name → replacement value
pub type TagMap = HashMap<String, String>;

/// Built-in tag names
pub mod tags {
    pub const SEND_TIME: &str = "send_time";
    pub const SITE_NAME: &str = "site_name";
    pub const SITE_URL: &str = "site_url";
    pub const USER_AGENT: &str = "user_agent";
    pub const REMOTE_ADDR: &str = "remote_addr";
    pub const REMOTE_HOST: &str = "remote_host";
    pub const MAIL_ID: &str = "mail_id";
    pub const AUTO_REPLY_STATUS: &str = "auto_reply_status";
    pub const ADMIN_SEND_STATUS: &str = "admin_send_status";
}

/// Requester metadata surfaced to admin-mail tags
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RequestMeta {
    pub user_agent: String,
    pub remote_addr: Option<IpAddr>,
    /// Reverse-DNS hostname of the client, already resolved upstream
    pub remote_host: String,
}

static NEWLINE_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\r\n|\r|\n){3,}").unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([^{}\r\n]+)\}").unwrap());

/// Renders templates against a tag map
#[derive(Clone)]
pub struct TemplateEngine {
    hooks: Arc<Hooks>,
}

impl TemplateEngine {
    pub fn new(hooks: Arc<Hooks>) -> Self {
        Self { hooks }
    }

    /// Full two-pass render
    pub fn render(&self, template: &str, tags: &TagMap) -> String {
        let conditioned = Self::apply_conditionals(template, tags);
        let collapsed = NEWLINE_RUNS.replace_all(&conditioned, "\n\n");
        self.substitute(&collapsed, tags)
    }

    /// Pass 1: resolve `{if:TAG}...{/if:TAG}` blocks. Non-greedy and
    /// non-nested; multiple blocks may share a tag name.
    fn apply_conditionals(template: &str, tags: &TagMap) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(open) = rest.find("{if:") {
            let Some(name_end) = rest[open + 4..].find('}') else {
                break;
            };
            let name = &rest[open + 4..open + 4 + name_end];
            let body_start = open + 4 + name_end + 1;
            let close_tag = format!("{{/if:{name}}}");
            let Some(close) = rest[body_start..].find(&close_tag) else {
                // Unterminated block: leave the text as-is.
                break;
            };

            out.push_str(&rest[..open]);
            let keep = tags.get(name).map(|v| !v.is_empty()).unwrap_or(false);
            if keep {
                out.push_str(&rest[body_start..body_start + close]);
            }
            rest = &rest[body_start + close + close_tag.len()..];
        }

        out.push_str(rest);
        out
    }

    /// Pass 2: substitute `{TAG}` occurrences through the filter chain
    fn substitute(&self, template: &str, tags: &TagMap) -> String {
        TAG.replace_all(template, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            let value = tags.get(name).map(String::as_str).unwrap_or("");
            self.hooks.filter_tag(name, value)
        })
        .into_owned()
    }
}

/// Tags available to every template: send timestamp and site identity
pub fn default_tags(site: &SiteInfo) -> TagMap {
    let mut tags = TagMap::new();
    tags.insert(tags::SEND_TIME.to_string(), format_send_time());
    tags.insert(tags::SITE_NAME.to_string(), site.name.clone());
    tags.insert(tags::SITE_URL.to_string(), site.url.clone());
    tags
}

/// Requester tags added to the admin-mail map only
pub fn meta_tags(meta: &RequestMeta) -> TagMap {
    let mut tags = TagMap::new();
    tags.insert(tags::USER_AGENT.to_string(), meta.user_agent.clone());
    tags.insert(
        tags::REMOTE_ADDR.to_string(),
        meta.remote_addr.map(|ip| ip.to_string()).unwrap_or_default(),
    );
    tags.insert(tags::REMOTE_HOST.to_string(), meta.remote_host.clone());
    tags
}

const WEEKDAYS_JA: [&str; 7] = ["月", "火", "水", "木", "金", "土", "日"];

/// Locale-formatted timestamp with day-of-week, e.g. `2024年1月5日（金） 14:03`
fn format_send_time() -> String {
    let now = Local::now();
    let weekday = WEEKDAYS_JA[now.weekday().num_days_from_monday() as usize];
    format!(
        "{}年{}月{}日（{}） {}:{:02}",
        now.year(),
        now.month(),
        now.day(),
        weekday,
        now.hour(),
        now.minute()
    )
}
