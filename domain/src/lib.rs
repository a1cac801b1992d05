//! Shared types and capability traits for the feed ingestion core:
//! the `Source` and `Repository` interfaces, the scheduler's task/progress
//! vocabulary, and the stable-guid dedup key.

pub mod error;
pub mod feed;
pub mod item;
pub mod progress;
pub mod quota;
pub mod repository;
pub mod source;
pub mod sync;
pub mod task;

pub use error::{IngestError, Result};
pub use feed::{
    detect_source_type, EmailConfig, Feed, FeedId, RssConfig, ScriptConfig, SourceConfig,
    SourceType, UserId, XPathConfig,
};
pub use item::{stable_guid, FetchedFeed, Item, ItemId, ParsedItem};
pub use progress::{DiscoveryProgressRecord, DiscoveryStage, ProgressEvent, ProgressState, TaskDetail};
pub use quota::UserQuota;
pub use repository::{ItemFields, Repository, RepoResult, RepositoryError, UpsertOutcome};
pub use source::{FetchContext, Source};
pub use sync::{FreshRssConfig, SyncAction, SyncRequest};
pub use task::{FetchTask, Priority, TaskId, TaskState};
