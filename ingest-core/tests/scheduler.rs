mod support;

use domain::{Feed, FetchTask, Priority, SourceConfig, SourceType};
use ingest_core::{ClientPool, DedupBridge, ProgressTracker, QuotaGate, Scheduler, SourceManager};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use support::FakeRepository;

const SAMPLE_FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
<title>Queued Feed</title>
<item><title>Only item</title><link>https://example.com/1</link><guid>g1</guid></item>
</channel></rss>"#;

struct TempDir(std::path::PathBuf);

impl TempDir {
    fn new() -> Self {
        let mut path = std::env::temp_dir();
        path.push(format!("ingest-core-scheduler-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).expect("create temp script dir");
        Self(path)
    }

    fn path(&self) -> &std::path::Path {
        &self.0
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

fn script_feed(dir: &std::path::Path, owner_user_id: uuid::Uuid, script_name: &str) -> Feed {
    let script_path = dir.join(script_name);
    let mut file = std::fs::File::create(&script_path).expect("create script");
    file.write_all(format!("#!/bin/sh\nsleep 0.2\ncat <<'EOF'\n{SAMPLE_FEED}\nEOF\n").as_bytes())
        .expect("write script");

    Feed {
        id: uuid::Uuid::new_v4(),
        owner_user_id,
        source_type: SourceType::Script,
        config: SourceConfig::Script(domain::ScriptConfig {
            script_path: script_name.to_string(),
            args: vec![],
            timeout: Duration::from_secs(5),
        }),
        category_path: vec![],
        tags: vec![],
        proxy_override: None,
        refresh_interval: Duration::from_secs(60),
        image_mode: false,
        last_fetched: None,
        last_error: None,
        position: 0,
    }
}

#[tokio::test]
async fn a_single_slot_concurrency_cap_serializes_two_tail_tasks() {
    let dir = TempDir::new();
    let user_id = uuid::Uuid::new_v4();
    let repository = Arc::new(FakeRepository::with_quota(1));
    let tracker = Arc::new(ProgressTracker::new());
    let quota_gate = Arc::new(QuotaGate::new());
    let watermark = Arc::new(ingest_core::UidWatermark::new());
    let dedup = Arc::new(DedupBridge::new(repository.clone(), watermark));
    let source_manager = Arc::new(SourceManager::new(Arc::new(ClientPool::new(10)), dir.path()));

    let scheduler = Scheduler::new(
        source_manager,
        repository.clone(),
        tracker.clone(),
        dedup,
        quota_gate,
        Duration::from_millis(10),
        Duration::from_secs(1),
    );

    let feed_a = script_feed(dir.path(), user_id, "a.sh");
    let feed_b = script_feed(dir.path(), user_id, "b.sh");
    let task_a = FetchTask::new(feed_a, Priority::Tail);
    let task_b = FetchTask::new(feed_b, Priority::Tail);

    scheduler.submit(task_a, 1).await.unwrap();
    scheduler.submit(task_b, 1).await.unwrap();

    // The single-slot concurrency cap must never let both run at once, and
    // both must eventually drain to completion.
    let mut saw_both_queued_and_running = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let snapshot = tracker.snapshot();
        assert!(snapshot.pool_task_count <= 1, "concurrency cap violated: {snapshot:?}");
        if snapshot.pool_task_count == 1 && snapshot.queue_task_count == 1 {
            saw_both_queued_and_running = true;
        }
        if snapshot.pool_task_count == 0 && snapshot.queue_task_count == 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "tasks never drained: {snapshot:?}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(saw_both_queued_and_running, "never observed the second task waiting behind the first");
    assert_eq!(repository.upserts.lock().unwrap().len(), 2);
}
