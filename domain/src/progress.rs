use crate::feed::{FeedId, UserId};
use crate::task::{TaskId, TaskState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Published on every scheduler state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub task_id: TaskId,
    pub feed_id: FeedId,
    pub user_id: UserId,
    pub state: TaskState,
    pub attempt: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// A single row in the progress API's `pool_tasks[]`/`queue_tasks[]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDetail {
    pub id: TaskId,
    pub feed_id: FeedId,
    pub feed_title: Option<String>,
    pub state: TaskState,
    pub attempt: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Defensive snapshot returned by `ProgressTracker::snapshot`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressState {
    pub is_running: bool,
    pub pool_task_count: usize,
    pub queue_task_count: usize,
    pub article_click_count: u64,
    pub pool_tasks: Vec<TaskDetail>,
    pub queue_tasks: Vec<TaskDetail>,
    pub errors: Vec<String>,
}

/// Stages of single-feed friend-link discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryStage {
    FetchingHomepage,
    FindingFriendLinks,
    FetchingFriendPage,
    FoundLinks,
    CheckingRss,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryProgressRecord {
    pub stage: DiscoveryStage,
    pub message: String,
    pub detail: Option<String>,
    pub current: usize,
    pub total: usize,
    pub found_count: usize,
}
