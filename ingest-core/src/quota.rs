use domain::{IngestError, Priority, Result, UserId, UserQuota};
use std::collections::HashMap;
use std::sync::Mutex;

/// Per-user admission and AI-token accounting. Reads limits
/// from `UserQuota`; reservations are tracked locally so concurrent
/// admissions can't race past the limit between the repository read and
/// the commit.
pub struct QuotaGate {
    reserved_ai_tokens: Mutex<HashMap<UserId, u64>>,
}

impl QuotaGate {
    pub fn new() -> Self {
        Self { reserved_ai_tokens: Mutex::new(HashMap::new()) }
    }

    /// Admission check for a FetchTask.
    /// `active_or_queued` is the caller's current count of that user's
    /// running+queued tasks. Head-priority admissions are always allowed.
    pub fn admit_fetch_task(
        &self,
        quota: &UserQuota,
        active_or_queued: u32,
        priority: Priority,
    ) -> Result<()> {
        self.admit_for_concurrency(active_or_queued, quota.max_feed_fetch_concurrency, priority)
    }

    /// Same contract as `admit_fetch_task`, taking the concurrency limit
    /// directly for callers that already resolved it from the quota.
    pub fn admit_for_concurrency(
        &self,
        active_or_queued: u32,
        max_feed_fetch_concurrency: u32,
        priority: Priority,
    ) -> Result<()> {
        if priority == Priority::Head {
            return Ok(());
        }
        if active_or_queued >= max_feed_fetch_concurrency {
            return Err(IngestError::QuotaExceeded(format!(
                "already has {active_or_queued} active/queued fetch tasks (limit {max_feed_fetch_concurrency})"
            )));
        }
        Ok(())
    }

    /// Tentatively reserves `estimated_tokens` against the user's budget;
    /// rejects if that would exceed `max_ai_tokens`.
    pub fn reserve_ai_tokens(&self, quota: &UserQuota, estimated_tokens: u64) -> Result<()> {
        let mut reserved = self.reserved_ai_tokens.lock().expect("quota mutex poisoned");
        let current = *reserved.get(&quota.user_id).unwrap_or(&0);
        let projected = quota.used_ai_tokens + current + estimated_tokens;
        if projected > quota.max_ai_tokens {
            return Err(IngestError::QuotaExceeded(format!(
                "AI token budget exceeded for user {}: {} + {} > {}",
                quota.user_id, quota.used_ai_tokens + current, estimated_tokens, quota.max_ai_tokens
            )));
        }
        *reserved.entry(quota.user_id).or_insert(0) += estimated_tokens;
        Ok(())
    }

    /// Commits the actual token count once the AI call completes,
    /// releasing the tentative reservation regardless of whether the
    /// actual count differs from the estimate.
    pub fn commit_ai_tokens(&self, user_id: UserId, estimated_tokens: u64) {
        let mut reserved = self.reserved_ai_tokens.lock().expect("quota mutex poisoned");
        if let Some(entry) = reserved.get_mut(&user_id) {
            *entry = entry.saturating_sub(estimated_tokens);
        }
    }
}

impl Default for QuotaGate {
    fn default() -> Self {
        Self::new()
    }
}
