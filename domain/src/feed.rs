use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

pub type FeedId = Uuid;
pub type UserId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Rss,
    XPath,
    Script,
    Email,
    FreshRssMirror,
}

/// A subscription owned by one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: FeedId,
    pub owner_user_id: UserId,
    pub source_type: SourceType,
    pub config: SourceConfig,
    pub category_path: Vec<String>,
    pub tags: Vec<String>,
    pub proxy_override: Option<String>,
    pub refresh_interval: Duration,
    pub image_mode: bool,
    pub last_fetched: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub position: i32,
}

/// Immutable descriptor for one `Source::fetch` call.
/// Constructed from a `Feed` at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SourceConfig {
    Rss(RssConfig),
    XPath(XPathConfig),
    Script(ScriptConfig),
    Email(EmailConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RssConfig {
    pub url: String,
    pub timeout: Duration,
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    pub basic_auth: Option<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XPathConfig {
    pub url: String,
    pub timeout: Duration,
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    pub item_selector: String,
    pub title_selector: String,
    pub link_selector: String,
    pub content_selector: Option<String>,
    pub date_selector: Option<String>,
    pub date_formats: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptConfig {
    pub script_path: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub server: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub mailbox: String,
    pub uid_watermark: Option<u32>,
    pub imap_id: Option<HashMap<String, String>>,
}

impl SourceConfig {
    pub fn source_type(&self) -> SourceType {
        match self {
            SourceConfig::Rss(_) => SourceType::Rss,
            SourceConfig::XPath(_) => SourceType::XPath,
            SourceConfig::Script(_) => SourceType::Script,
            SourceConfig::Email(_) => SourceType::Email,
        }
    }
}

/// Detects the source type from a raw configuration the same way the
/// manager does: explicit type wins, else infer from the fields present.
pub fn detect_source_type(
    explicit: Option<SourceType>,
    has_script_path: bool,
    has_imap_server: bool,
    has_xpath_selector: bool,
) -> SourceType {
    if let Some(t) = explicit {
        return t;
    }
    if has_script_path {
        SourceType::Script
    } else if has_imap_server {
        SourceType::Email
    } else if has_xpath_selector {
        SourceType::XPath
    } else {
        SourceType::Rss
    }
}
