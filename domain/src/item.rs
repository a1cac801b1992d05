use crate::feed::FeedId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub type ItemId = Uuid;

/// One article/entry as stored by the persistence layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub feed_id: FeedId,
    pub url: String,
    pub stable_guid: String,
    pub title: String,
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub read: bool,
    pub favorite: bool,
    pub hidden: bool,
    pub read_later: bool,
    pub freshrss_item_id: Option<String>,
}

/// What a `Source::fetch` call hands back before dedup/persistence:
/// a feed-level title/link/description plus its parsed items.
#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub items: Vec<ParsedItem>,
}

#[derive(Debug, Clone)]
pub struct ParsedItem {
    pub guid: Option<String>,
    pub url: String,
    pub title: String,
    pub content: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
}

/// Computes the per-feed unique identity used for dedup:
/// the item's explicit GUID if present, else its URL, else a hash of
/// title+published.
pub fn stable_guid(item: &ParsedItem) -> String {
    if let Some(guid) = &item.guid {
        if !guid.is_empty() {
            return guid.clone();
        }
    }
    if !item.url.is_empty() {
        return item.url.clone();
    }
    let mut hasher = Sha256::new();
    hasher.update(item.title.as_bytes());
    if let Some(published) = item.published_at {
        hasher.update(published.timestamp().to_be_bytes());
    }
    format!("sha256:{:x}", hasher.finalize())
}
