use crate::config::Config;
use crate::dedup::{DedupBridge, UidWatermark};
use crate::discovery::DiscoveryEngine;
use crate::pool::ClientPool;
use crate::progress::ProgressTracker;
use crate::quota::QuotaGate;
use crate::scheduler::Scheduler;
use crate::sources::SourceManager;
use crate::sync_dispatcher::SyncDispatcher;
use domain::{FetchTask, Repository};
use std::sync::Arc;

/// Owns every globally-shared piece of mutable state and wires them
/// together once at startup, rather than reaching for module-level
/// singletons. Everything
/// downstream receives an `Arc` clone instead of touching statics.
pub struct Registry {
    pub pool: Arc<ClientPool>,
    pub tracker: Arc<ProgressTracker>,
    pub scheduler: Arc<Scheduler>,
    pub discovery: Arc<DiscoveryEngine>,
    pub sync_dispatcher: Arc<SyncDispatcher>,
    pub quota_gate: Arc<QuotaGate>,
    pub repository: Arc<dyn Repository>,
}

impl Registry {
    pub fn new(config: Config, repository: Arc<dyn Repository>, email_source: Option<Arc<dyn domain::Source>>) -> Self {
        let pool = Arc::new(ClientPool::new(config.max_clients_per_pool));
        let tracker = Arc::new(ProgressTracker::new());
        let quota_gate = Arc::new(QuotaGate::new());
        let dedup = Arc::new(DedupBridge::new(repository.clone(), Arc::new(UidWatermark::new())));

        let mut source_manager = SourceManager::new(pool.clone(), config.scripts_dir.clone());
        if let Some(email) = email_source {
            source_manager = source_manager.with_email_source(email);
        }
        let source_manager = Arc::new(source_manager);

        let scheduler = Scheduler::new(
            source_manager,
            repository.clone(),
            tracker.clone(),
            dedup,
            quota_gate.clone(),
            config.base_backoff,
            config.max_backoff,
        );

        let discovery = Arc::new(DiscoveryEngine::new(pool.clone()));

        let sync_client = reqwest::Client::builder()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        let sync_dispatcher = Arc::new(SyncDispatcher::new(
            repository.clone(),
            config.freshrss_sync_workers,
            sync_client,
        ));

        Self { pool, tracker, scheduler, discovery, sync_dispatcher, quota_gate, repository }
    }

    /// Convenience wrapper: resolves the submitting user's concurrency
    /// cap from the repository before delegating to the scheduler.
    pub async fn submit_fetch(&self, task: FetchTask) -> domain::Result<()> {
        let quota = self
            .repository
            .get_quota_for_user(task.owner_user_id)
            .await
            .map_err(|e| domain::IngestError::InternalBug(e.to_string()))?;
        self.scheduler.submit(task, quota.max_feed_fetch_concurrency).await
    }
}
