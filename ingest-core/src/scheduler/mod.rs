use crate::dedup::DedupBridge;
use crate::quota::QuotaGate;
use crate::progress::ProgressTracker;
use crate::sources::SourceManager;
use chrono::Utc;
use domain::{
    FeedId, FetchContext, FetchTask, IngestError, Priority, ProgressEvent, Repository, TaskState,
    UserId,
};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MAX_ATTEMPTS: u32 = 3;
const MAX_OUTER_DEADLINE: Duration = Duration::from_secs(120);

/// The per-user concurrency-limited fetch scheduler. State
/// transitions follow `Admitted -> Queued -> Running -> (terminal)`;
/// retryable failures re-enter `Queued` with `attempt+1` and backoff.
/// Per-user state lives behind `Arc<RwLock<HashMap<...>>>`, background
/// work is spawned with `tokio::spawn`, and completion is fed back
/// through a channel rather than awaited inline.
pub struct Scheduler {
    source_manager: Arc<SourceManager>,
    repository: Arc<dyn Repository>,
    tracker: Arc<ProgressTracker>,
    dedup: Arc<DedupBridge>,
    quota_gate: Arc<QuotaGate>,
    base_backoff: Duration,
    max_backoff: Duration,

    queues: Arc<RwLock<HashMap<UserId, VecDeque<FetchTask>>>>,
    running_counts: Arc<RwLock<HashMap<UserId, u32>>>,
    running_tokens: Arc<AsyncMutex<HashMap<FeedId, CancellationToken>>>,
    is_running: Arc<RwLock<bool>>,
    completion_tx: mpsc::UnboundedSender<UserId>,
}

impl Scheduler {
    pub fn new(
        source_manager: Arc<SourceManager>,
        repository: Arc<dyn Repository>,
        tracker: Arc<ProgressTracker>,
        dedup: Arc<DedupBridge>,
        quota_gate: Arc<QuotaGate>,
        base_backoff: Duration,
        max_backoff: Duration,
    ) -> Arc<Self> {
        let (completion_tx, mut completion_rx) = mpsc::unbounded_channel::<UserId>();

        let scheduler = Arc::new(Self {
            source_manager,
            repository,
            tracker,
            dedup,
            quota_gate,
            base_backoff,
            max_backoff,
            queues: Arc::new(RwLock::new(HashMap::new())),
            running_counts: Arc::new(RwLock::new(HashMap::new())),
            running_tokens: Arc::new(AsyncMutex::new(HashMap::new())),
            is_running: Arc::new(RwLock::new(true)),
            completion_tx,
        });

        info!("fetch scheduler starting");
        let dispatcher = scheduler.clone();
        tokio::spawn(async move {
            while let Some(user_id) = completion_rx.recv().await {
                dispatcher.dispatch_next_for_user(user_id).await;
            }
        });

        scheduler
    }

    /// Admission contract. Applies the quota gate, dedups
    /// against already-queued tasks for the same feed, inserts at head or
    /// tail, and immediately attempts dispatch.
    pub async fn submit(self: &Arc<Self>, task: FetchTask, max_concurrency: u32) -> domain::Result<()> {
        let user_id = task.owner_user_id;

        {
            let mut queues = self.queues.write().await;
            let queue = queues.entry(user_id).or_default();

            if task.priority == Priority::Tail
                && queue.iter().any(|t| t.feed_id() == task.feed_id())
            {
                debug!(feed_id = %task.feed_id(), "dropping duplicate queued task");
                return Ok(());
            }

            let running = *self.running_counts.read().await.get(&user_id).unwrap_or(&0);
            let active_or_queued = running + queue.len() as u32;
            self.quota_gate
                .admit_for_concurrency(active_or_queued, max_concurrency, task.priority)?;

            match task.priority {
                Priority::Head => queue.push_front(task.clone()),
                Priority::Tail => queue.push_back(task.clone()),
            }
        }

        self.publish(&task, TaskState::Queued, None);
        self.dispatch_next_for_user(user_id).await;
        Ok(())
    }

    fn dispatch_next_for_user<'a>(
        self: &'a Arc<Self>,
        user_id: UserId,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if !*self.is_running.read().await {
                return;
            }

            let quota = match self.repository.get_quota_for_user(user_id).await {
                Ok(quota) => quota,
                Err(e) => {
                    error!(%user_id, error = %e, "failed to load quota, skipping dispatch");
                    return;
                }
            };

            let task = {
                let mut queues = self.queues.write().await;
                let mut running_counts = self.running_counts.write().await;
                let running = running_counts.entry(user_id).or_insert(0);

                if *running >= quota.max_feed_fetch_concurrency {
                    return;
                }
                let Some(queue) = queues.get_mut(&user_id) else { return };
                let Some(task) = queue.pop_front() else { return };
                *running += 1;
                task
            };

            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.run_task(task, quota.max_feed_fetch_concurrency).await;
            });
        })
    }

    async fn run_task(self: Arc<Self>, mut task: FetchTask, max_concurrency: u32) {
        let feed_id = task.feed_id();
        let user_id = task.owner_user_id;

        task.state = TaskState::Running;
        task.started_at = Some(Utc::now());
        self.publish(&task, TaskState::Running, None);

        let deadline = task
            .feed_snapshot
            .refresh_interval
            .max(Duration::from_secs(20) * 2)
            .min(MAX_OUTER_DEADLINE);
        let ctx = FetchContext::new(deadline);
        self.running_tokens
            .lock()
            .await
            .insert(feed_id, ctx.cancellation.clone());

        let result = self
            .source_manager
            .fetch(&ctx, &task.feed_snapshot.config)
            .await;

        self.running_tokens.lock().await.remove(&feed_id);

        match result {
            Ok(fetched) => {
                let persist_error = match self.dedup.persist(feed_id, fetched).await {
                    Ok(_) => None,
                    Err(e) => Some(e.to_string()),
                };
                let _ = self
                    .repository
                    .update_feed_last_fetch(feed_id, Utc::now(), persist_error.clone())
                    .await;
                task.state = TaskState::Succeeded;
                task.finished_at = Some(Utc::now());
                self.publish(&task, TaskState::Succeeded, persist_error);
            }
            Err(IngestError::Cancelled) => {
                task.state = TaskState::Cancelled;
                task.finished_at = Some(Utc::now());
                self.publish(&task, TaskState::Cancelled, None);
            }
            Err(e) => {
                if e.is_retryable() && task.attempt + 1 < MAX_ATTEMPTS {
                    task.attempt += 1;
                    task.state = TaskState::FailedRetryable;
                    self.publish(&task, TaskState::FailedRetryable, Some(e.to_string()));

                    let delay = backoff_for_attempt(task.attempt, self.base_backoff, self.max_backoff);
                    let scheduler = self.clone();
                    let requeue_task = task.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        if let Err(submit_err) =
                            scheduler.submit(requeue_task, max_concurrency).await
                        {
                            warn!(error = %submit_err, "failed to re-queue retryable task");
                        }
                    });
                } else {
                    let message = e.to_string();
                    let _ = self
                        .repository
                        .update_feed_last_fetch(feed_id, Utc::now(), Some(message.clone()))
                        .await;
                    task.state = TaskState::FailedFatal;
                    task.finished_at = Some(Utc::now());
                    self.publish(&task, TaskState::FailedFatal, Some(message));
                }
            }
        }

        if let Some(running) = self.running_counts.write().await.get_mut(&user_id) {
            *running = running.saturating_sub(1);
        }
        let _ = self.completion_tx.send(user_id);
    }

    /// Cancels the running task for `feed_id` (if any) and drops queued
    /// tasks for that feed.
    pub async fn cancel_feed(&self, feed_id: FeedId) {
        if let Some(token) = self.running_tokens.lock().await.get(&feed_id) {
            token.cancel();
        }
        let mut queues = self.queues.write().await;
        for queue in queues.values_mut() {
            queue.retain(|t| t.feed_id() != feed_id);
        }
    }

    /// Cancels every running task; if `graceful`, waits up to 30s for
    /// in-flight tasks to finish on their own before forcing cancellation.
    pub async fn shutdown(&self, graceful: bool) {
        *self.is_running.write().await = false;

        if graceful {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
            loop {
                if self.running_tokens.lock().await.is_empty() {
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        }

        let tokens = self.running_tokens.lock().await;
        for token in tokens.values() {
            token.cancel();
        }
        self.queues.write().await.clear();
    }

    fn publish(&self, task: &FetchTask, state: TaskState, error: Option<String>) {
        self.tracker.on_state_change(ProgressEvent {
            task_id: task.id,
            feed_id: task.feed_id(),
            user_id: task.owner_user_id,
            state,
            attempt: task.attempt,
            started_at: task.started_at,
            finished_at: task.finished_at,
            error,
        });
    }
}

/// `min(base * 2^attempt, max)`, as specified. Jitter is left
/// to the caller's re-submission timing rather than baked in here.
fn backoff_for_attempt(attempt: u32, base: Duration, max: Duration) -> Duration {
    let scaled = base.saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX));
    scaled.min(max)
}
