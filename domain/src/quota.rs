use crate::feed::UserId;
use serde::{Deserialize, Serialize};

/// Per-user limits and usage, read at admission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQuota {
    pub user_id: UserId,
    pub max_feeds: u32,
    pub used_feeds: u32,
    pub max_ai_tokens: u64,
    pub used_ai_tokens: u64,
    pub max_feed_fetch_concurrency: u32,
    pub max_ai_concurrency: u32,
    pub max_translation_concurrency: u32,
}

impl UserQuota {
    pub fn has_feed_capacity(&self) -> bool {
        self.used_feeds < self.max_feeds
    }

    pub fn remaining_ai_tokens(&self) -> u64 {
        self.max_ai_tokens.saturating_sub(self.used_ai_tokens)
    }
}
