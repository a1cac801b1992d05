use crate::item::ItemId;
use serde::{Deserialize, Serialize};

/// A mutating article action that must replay to a FreshRSS upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    MarkRead,
    MarkUnread,
    Star,
    Unstar,
}

impl SyncAction {
    /// The Google-Reader-compatible tag this action adds (`a=`) or
    /// removes (`r=`) via `edit-tag`.
    pub fn tag(&self) -> &'static str {
        match self {
            SyncAction::MarkRead | SyncAction::MarkUnread => "user/-/state/com.google/read",
            SyncAction::Star | SyncAction::Unstar => "user/-/state/com.google/starred",
        }
    }

    pub fn adds_tag(&self) -> bool {
        matches!(self, SyncAction::MarkRead | SyncAction::Star)
    }
}

/// Pending upstream mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub article_id: ItemId,
    pub article_url: String,
    pub action: SyncAction,
}

#[derive(Debug, Clone)]
pub struct FreshRssConfig {
    pub server_url: String,
    pub username: String,
    pub password: String,
}
