use domain::{stable_guid, FeedId, FetchedFeed, ItemFields, ParsedItem, Repository, RepoResult};
use std::sync::Arc;
use tracing::debug;

/// Bridges a fetched feed into the repository: computes each item's stable
/// identity and upserts it. Within a single batch, items sharing a stable
/// guid are upserted only once — grounded on the teacher's `seen_guids`
/// `HashSet` dedup in `parser.rs`. `upsert_item` is also idempotent across
/// calls, so persisting the same batch twice leaves the store unchanged.
///
/// Also advances the email adapter's UID watermark once a batch fully
/// persists: every stable guid of the form `email://<uid>` is scanned for
/// its highest UID, which is then committed both to the repository and to
/// an in-process cache so the scheduler can consult it without a round
/// trip on the common path.
pub struct DedupBridge {
    repository: Arc<dyn Repository>,
    watermark: Arc<UidWatermark>,
}

impl DedupBridge {
    pub fn new(repository: Arc<dyn Repository>, watermark: Arc<UidWatermark>) -> Self {
        Self { repository, watermark }
    }

    pub async fn persist(&self, feed_id: FeedId, feed: FetchedFeed) -> RepoResult<PersistSummary> {
        let mut summary = PersistSummary::default();
        let mut max_email_uid = None;
        let mut seen_guids = std::collections::HashSet::new();

        for item in feed.items {
            let guid = stable_guid(&item);
            if !seen_guids.insert(guid.clone()) {
                debug!(feed_id = %feed_id, guid = %guid, "skipping duplicate guid within batch");
                continue;
            }
            if let Some(uid) = email_uid(&guid) {
                max_email_uid = Some(max_email_uid.map_or(uid, |m: u32| m.max(uid)));
            }
            let fields = to_fields(item);
            let outcome = self.repository.upsert_item(feed_id, &guid, fields).await?;
            debug!(feed_id = %feed_id, guid = %guid, ?outcome, "upserted item");
            summary.record(outcome);
        }

        if let Some(uid) = max_email_uid {
            self.repository.update_email_watermark(feed_id, uid).await?;
            self.watermark.commit(feed_id, uid);
        }

        Ok(summary)
    }
}

fn email_uid(guid: &str) -> Option<u32> {
    guid.strip_prefix("email://")?.parse().ok()
}

fn to_fields(item: ParsedItem) -> ItemFields {
    ItemFields {
        url: item.url,
        title: item.title,
        content: item.content,
        author: item.author,
        published_at: item.published_at,
        updated_at: item.updated_at,
        tags: item.tags,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PersistSummary {
    pub inserted: u32,
    pub updated: u32,
    pub unchanged: u32,
}

impl PersistSummary {
    fn record(&mut self, outcome: domain::UpsertOutcome) {
        match outcome {
            domain::UpsertOutcome::Inserted => self.inserted += 1,
            domain::UpsertOutcome::Updated => self.updated += 1,
            domain::UpsertOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.inserted + self.updated + self.unchanged
    }
}

/// Per-feed watermark for the email adapter's UID cursor. Advanced only
/// after a batch fully persists, so a mid-batch failure leaves the
/// previous watermark intact for a clean retry.
#[derive(Debug, Default)]
pub struct UidWatermark {
    committed: std::sync::Mutex<std::collections::HashMap<FeedId, u32>>,
}

impl UidWatermark {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, feed_id: FeedId) -> Option<u32> {
        self.committed.lock().expect("watermark mutex poisoned").get(&feed_id).copied()
    }

    pub fn commit(&self, feed_id: FeedId, uid: u32) {
        let mut committed = self.committed.lock().expect("watermark mutex poisoned");
        let entry = committed.entry(feed_id).or_insert(0);
        if uid > *entry {
            *entry = uid;
        }
    }
}
