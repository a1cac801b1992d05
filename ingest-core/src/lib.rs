//! The feed ingestion core: HTTP client pool, source adapters, fetch
//! scheduler, progress tracker, discovery engine, dedup bridge, quota
//! gate, and FreshRSS sync dispatcher. Everything is wired together
//! through a [`registry::Registry`] rather than module-level singletons.

pub mod config;
pub mod dedup;
pub mod discovery;
pub mod net;
pub mod pool;
pub mod progress;
pub mod quota;
pub mod registry;
pub mod scheduler;
pub mod sources;
pub mod sync_dispatcher;

pub use config::Config;
pub use dedup::{DedupBridge, PersistSummary, UidWatermark};
pub use discovery::{DiscoveredFeed, DiscoveryEngine};
pub use pool::{ClientPool, PoolKind, PooledClient};
pub use progress::ProgressTracker;
pub use quota::QuotaGate;
pub use registry::Registry;
pub use scheduler::Scheduler;
pub use sources::{RssSource, ScriptSource, SourceManager, XPathSource};
pub use sync_dispatcher::SyncDispatcher;
