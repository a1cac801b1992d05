use crate::feed::{Feed, FeedId, UserId};
use crate::item::ItemId;
use crate::quota::UserQuota;
use crate::sync::FreshRssConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("feed {0} not found")]
    FeedNotFound(FeedId),
    #[error("item {0} not found")]
    ItemNotFound(ItemId),
    #[error("repository backend error: {0}")]
    Backend(String),
}

pub type RepoResult<T> = std::result::Result<T, RepositoryError>;

#[derive(Debug, Clone)]
pub struct ItemFields {
    pub url: String,
    pub title: String,
    pub content: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// The narrow interface the ingestion core consumes from persistence.
/// Implemented externally; the core never touches SQL.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn list_feeds_for_user(&self, user_id: UserId) -> RepoResult<Vec<Feed>>;

    async fn get_feed(&self, feed_id: FeedId) -> RepoResult<Feed>;

    /// Idempotent on conflict: an existing (feed_id, stable_guid) row is
    /// updated only if `fields.updated_at`/`published_at` is strictly
    /// newer than what is stored.
    async fn upsert_item(
        &self,
        feed_id: FeedId,
        stable_guid: &str,
        fields: ItemFields,
    ) -> RepoResult<UpsertOutcome>;

    async fn update_feed_last_fetch(
        &self,
        feed_id: FeedId,
        when: DateTime<Utc>,
        error: Option<String>,
    ) -> RepoResult<()>;

    /// Advances the email adapter's per-feed UID cursor. Called
    /// only after a fetched batch has fully persisted; a failed batch must
    /// never reach this, so a retry resumes from the prior watermark.
    async fn update_email_watermark(&self, feed_id: FeedId, uid: u32) -> RepoResult<()>;

    async fn mark_article_read(&self, id: ItemId, value: bool) -> RepoResult<bool>;
    async fn mark_article_favorite(&self, id: ItemId, value: bool) -> RepoResult<bool>;
    async fn mark_article_hidden(&self, id: ItemId, value: bool) -> RepoResult<bool>;
    async fn mark_article_read_later(&self, id: ItemId, value: bool) -> RepoResult<bool>;

    async fn get_freshrss_config(&self, user_id: UserId) -> RepoResult<Option<FreshRssConfig>>;

    async fn get_quota_for_user(&self, user_id: UserId) -> RepoResult<UserQuota>;

    /// Raw per-user override, if any (empty/absent means "not set").
    async fn get_raw_user_setting(&self, user_id: UserId, key: &str) -> RepoResult<Option<String>>;
    async fn get_raw_global_setting(&self, key: &str) -> RepoResult<Option<String>>;
    async fn get_raw_encrypted_user_setting(
        &self,
        user_id: UserId,
        key: &str,
    ) -> RepoResult<Option<String>>;
    async fn get_raw_encrypted_global_setting(&self, key: &str) -> RepoResult<Option<String>>;

    /// Precedence: user-scoped setting if present
    /// and non-empty, else global setting, else empty string. This is the
    /// single place that resolution happens so every call site behaves
    /// identically — the source repository's per-callsite divergence is
    /// treated as a bug and not replicated.
    async fn get_setting_with_fallback(&self, user_id: UserId, key: &str) -> RepoResult<String> {
        resolve_fallback(
            self.get_raw_user_setting(user_id, key).await?,
            self.get_raw_global_setting(key).await?,
        )
    }

    async fn get_encrypted_setting_with_fallback(
        &self,
        user_id: UserId,
        key: &str,
    ) -> RepoResult<String> {
        resolve_fallback(
            self.get_raw_encrypted_user_setting(user_id, key).await?,
            self.get_raw_encrypted_global_setting(key).await?,
        )
    }
}

fn resolve_fallback(user: Option<String>, global: Option<String>) -> RepoResult<String> {
    match user {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Ok(global.unwrap_or_default()),
    }
}
