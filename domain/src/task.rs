use crate::feed::{Feed, FeedId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TaskId = Uuid;

/// Queue insertion position. Head is for user-initiated
/// manual refresh; tail is for scheduled background fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Head,
    Tail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Admitted,
    Queued,
    Running,
    Succeeded,
    FailedRetryable,
    FailedFatal,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::FailedFatal | TaskState::Cancelled
        )
    }
}

/// Unit of scheduler work.
#[derive(Debug, Clone)]
pub struct FetchTask {
    pub id: TaskId,
    pub feed_snapshot: Feed,
    pub owner_user_id: UserId,
    pub priority: Priority,
    pub attempt: u32,
    pub state: TaskState,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl FetchTask {
    pub fn new(feed_snapshot: Feed, priority: Priority) -> Self {
        let owner_user_id = feed_snapshot.owner_user_id;
        Self {
            id: Uuid::new_v4(),
            feed_snapshot,
            owner_user_id,
            priority,
            attempt: 0,
            state: TaskState::Admitted,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn feed_id(&self) -> FeedId {
        self.feed_snapshot.id
    }
}
