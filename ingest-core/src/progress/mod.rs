use domain::{FeedId, ProgressEvent, ProgressState, TaskDetail, TaskId, TaskState};
use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory scheduler state for UI pollers. Holds two lists —
/// running and queued — indexed by task id, under a single mutex: updates
/// are cheap enough that finer-grained locking buys nothing here.
pub struct ProgressTracker {
    inner: Mutex<Inner>,
}

struct Inner {
    pool_tasks: HashMap<TaskId, TaskDetail>,
    queue_tasks: HashMap<TaskId, TaskDetail>,
    feed_titles: HashMap<FeedId, Option<String>>,
    errors: Vec<String>,
    article_click_count: u64,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                pool_tasks: HashMap::new(),
                queue_tasks: HashMap::new(),
                feed_titles: HashMap::new(),
                errors: Vec::new(),
                article_click_count: 0,
            }),
        }
    }

    /// Called by the (external) HTTP layer whenever an article is opened,
    /// so `GET /progress` can report a running click count for the process
    /// lifetime.
    pub fn record_article_click(&self) {
        self.inner.lock().expect("progress mutex poisoned").article_click_count += 1;
    }

    /// O(1) update applied on every scheduler state transition.
    pub fn on_state_change(&self, event: ProgressEvent) {
        let mut inner = self.inner.lock().expect("progress mutex poisoned");

        let feed_title = inner.feed_titles.get(&event.feed_id).cloned().flatten();
        let detail = TaskDetail {
            id: event.task_id,
            feed_id: event.feed_id,
            feed_title,
            state: event.state,
            attempt: event.attempt,
            started_at: event.started_at,
            error: event.error.clone(),
        };

        match event.state {
            TaskState::Queued | TaskState::Admitted => {
                inner.pool_tasks.remove(&event.task_id);
                inner.queue_tasks.insert(event.task_id, detail);
            }
            TaskState::Running => {
                inner.queue_tasks.remove(&event.task_id);
                inner.pool_tasks.insert(event.task_id, detail);
            }
            state if state.is_terminal() => {
                inner.pool_tasks.remove(&event.task_id);
                inner.queue_tasks.remove(&event.task_id);
                if let Some(error) = event.error.filter(|_| state != TaskState::Cancelled) {
                    inner.errors.push(error);
                }
            }
            _ => {}
        }
    }

    pub fn register_feed_title(&self, feed_id: FeedId, title: Option<String>) {
        self.inner
            .lock()
            .expect("progress mutex poisoned")
            .feed_titles
            .insert(feed_id, title);
    }

    /// A defensive copy; callers never observe the tracker's internal
    /// maps.
    pub fn snapshot(&self) -> ProgressState {
        let inner = self.inner.lock().expect("progress mutex poisoned");
        ProgressState {
            is_running: !inner.pool_tasks.is_empty() || !inner.queue_tasks.is_empty(),
            pool_task_count: inner.pool_tasks.len(),
            queue_task_count: inner.queue_tasks.len(),
            article_click_count: inner.article_click_count,
            pool_tasks: inner.pool_tasks.values().cloned().collect(),
            queue_tasks: inner.queue_tasks.values().cloned().collect(),
            errors: inner.errors.clone(),
        }
    }

    pub fn task_details(&self) -> (Vec<TaskDetail>, Vec<TaskDetail>) {
        let inner = self.inner.lock().expect("progress mutex poisoned");
        (
            inner.pool_tasks.values().cloned().collect(),
            inner.queue_tasks.values().cloned().collect(),
        )
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(task_id: TaskId, state: TaskState) -> ProgressEvent {
        ProgressEvent {
            task_id,
            feed_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            state,
            attempt: 0,
            started_at: Some(Utc::now()),
            finished_at: None,
            error: None,
        }
    }

    #[test]
    fn queued_then_running_then_terminal_clears_both_lists() {
        let tracker = ProgressTracker::new();
        let task_id = Uuid::new_v4();

        tracker.on_state_change(event(task_id, TaskState::Queued));
        let snap = tracker.snapshot();
        assert_eq!(snap.queue_task_count, 1);
        assert_eq!(snap.pool_task_count, 0);

        tracker.on_state_change(event(task_id, TaskState::Running));
        let snap = tracker.snapshot();
        assert_eq!(snap.queue_task_count, 0);
        assert_eq!(snap.pool_task_count, 1);

        tracker.on_state_change(event(task_id, TaskState::Succeeded));
        let snap = tracker.snapshot();
        assert_eq!(snap.queue_task_count, 0);
        assert_eq!(snap.pool_task_count, 0);
        assert!(!snap.is_running);
    }

    #[test]
    fn snapshot_counts_always_match_list_lengths() {
        let tracker = ProgressTracker::new();
        for _ in 0..5 {
            tracker.on_state_change(event(Uuid::new_v4(), TaskState::Queued));
        }
        let snap = tracker.snapshot();
        assert_eq!(snap.queue_task_count, snap.queue_tasks.len());
        assert_eq!(snap.pool_task_count, snap.pool_tasks.len());
    }

    #[test]
    fn article_clicks_accumulate_across_snapshots() {
        let tracker = ProgressTracker::new();
        tracker.record_article_click();
        tracker.record_article_click();
        assert_eq!(tracker.snapshot().article_click_count, 2);
    }

    #[test]
    fn terminal_error_is_recorded_except_when_cancelled() {
        let tracker = ProgressTracker::new();
        let mut failed = event(Uuid::new_v4(), TaskState::FailedFatal);
        failed.error = Some("HTTP 500".to_string());
        tracker.on_state_change(failed);

        let mut cancelled = event(Uuid::new_v4(), TaskState::Cancelled);
        cancelled.error = Some("should not appear".to_string());
        tracker.on_state_change(cancelled);

        let snap = tracker.snapshot();
        assert_eq!(snap.errors, vec!["HTTP 500".to_string()]);
    }
}
