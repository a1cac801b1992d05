use domain::{FreshRssConfig, ItemId, Repository, SyncAction, SyncRequest, UserId};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

const MAX_ATTEMPTS: u32 = 5;
const BASE_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

struct QueuedRequest {
    user_id: UserId,
    request: SyncRequest,
}

/// Replays local article-state mutations to a FreshRSS Google-Reader-
/// compatible upstream. `enqueue` is non-blocking; a fixed
/// pool of single-consumer workers drains the queue, each retrying its
/// own requests independently with exponential backoff. Every article-id
/// is hashed onto the same worker so mutations on one item are delivered
/// in order while different items proceed unordered across workers.
pub struct SyncDispatcher {
    senders: Vec<mpsc::UnboundedSender<QueuedRequest>>,
}

impl SyncDispatcher {
    pub fn new(repository: Arc<dyn Repository>, worker_count: usize, client: Client) -> Self {
        let worker_count = worker_count.max(1);
        let token_cache = Arc::new(Mutex::new(HashMap::new()));
        let mut senders = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let (sender, mut receiver) = mpsc::unbounded_channel::<QueuedRequest>();
            let repository = repository.clone();
            let client = client.clone();
            let token_cache = token_cache.clone();
            tokio::spawn(async move {
                info!(worker_id, "freshrss sync worker starting");
                while let Some(queued) = receiver.recv().await {
                    deliver_with_retry(&repository, &client, &token_cache, queued).await;
                }
            });
            senders.push(sender);
        }

        Self { senders }
    }

    /// Non-blocking enqueue. Bulk callers must only
    /// call this after the local mutation has already committed.
    pub fn enqueue(&self, user_id: UserId, request: SyncRequest) {
        let worker = self.worker_for(request.article_id);
        if self.senders[worker].send(QueuedRequest { user_id, request }).is_err() {
            warn!("sync dispatcher worker channel closed, dropping request");
        }
    }

    pub fn enqueue_many(&self, user_id: UserId, requests: Vec<SyncRequest>) {
        for request in requests {
            self.enqueue(user_id, request);
        }
    }

    fn worker_for(&self, article_id: ItemId) -> usize {
        (article_id.as_u128() % self.senders.len() as u128) as usize
    }
}

async fn deliver_with_retry(
    repository: &Arc<dyn Repository>,
    client: &Client,
    token_cache: &Arc<Mutex<HashMap<UserId, String>>>,
    queued: QueuedRequest,
) {
    let QueuedRequest { user_id, request } = queued;

    let config = match repository.get_freshrss_config(user_id).await {
        Ok(Some(config)) => config,
        Ok(None) => return,
        Err(e) => {
            error!(%user_id, error = %e, "could not load freshrss config, dropping sync request");
            return;
        }
    };

    let mut backoff = BASE_BACKOFF;
    for attempt in 1..=MAX_ATTEMPTS {
        let token = match token_for(client, &config, token_cache, user_id, attempt > 1).await {
            Ok(token) => token,
            Err(e) => {
                warn!(attempt, error = %e, "freshrss auth failed");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        };

        match edit_tag(client, &config, &token, &request).await {
            Ok(()) => return,
            Err(e) => {
                warn!(attempt, article_id = %request.article_id, error = %e, "freshrss edit-tag failed");
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    error!(article_id = %request.article_id, "dropping sync request after exhausting retries");
}

async fn token_for(
    client: &Client,
    config: &FreshRssConfig,
    cache: &Arc<Mutex<HashMap<UserId, String>>>,
    user_id: UserId,
    force_refresh: bool,
) -> Result<String, reqwest::Error> {
    if !force_refresh {
        if let Some(token) = cache.lock().await.get(&user_id).cloned() {
            return Ok(token);
        }
    }

    let response = client
        .post(format!("{}/accounts/ClientLogin", config.server_url.trim_end_matches('/')))
        .form(&[("Email", config.username.as_str()), ("Passwd", config.password.as_str())])
        .send()
        .await?
        .error_for_status()?;
    let body = response.text().await?;
    let auth = body
        .lines()
        .find_map(|line| line.strip_prefix("Auth="))
        .unwrap_or(&body)
        .to_string();

    cache.lock().await.insert(user_id, auth.clone());
    Ok(auth)
}

async fn edit_tag(
    client: &Client,
    config: &FreshRssConfig,
    token: &str,
    request: &SyncRequest,
) -> Result<(), reqwest::Error> {
    let tag_field = if request.action.adds_tag() { "a" } else { "r" };
    let item_id = item_reader_id(request.article_id);
    client
        .post(format!("{}/reader/api/0/edit-tag", config.server_url.trim_end_matches('/')))
        .form(&[
            ("T", token),
            ("i", item_id.as_str()),
            (tag_field, request.action.tag()),
        ])
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

fn item_reader_id(id: ItemId) -> String {
    format!("tag:google.com,2005:reader/item/{}", id.simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_read_adds_the_read_tag() {
        assert!(SyncAction::MarkRead.adds_tag());
        assert_eq!(SyncAction::MarkRead.tag(), "user/-/state/com.google/read");
    }

    #[test]
    fn unstar_removes_the_starred_tag() {
        assert!(!SyncAction::Unstar.adds_tag());
        assert_eq!(SyncAction::Unstar.tag(), "user/-/state/com.google/starred");
    }

    #[test]
    fn item_reader_id_is_a_stable_google_reader_style_tag() {
        let id = uuid::Uuid::new_v4();
        let first = item_reader_id(id);
        let second = item_reader_id(id);
        assert_eq!(first, second);
        assert!(first.starts_with("tag:google.com,2005:reader/item/"));
    }
}
