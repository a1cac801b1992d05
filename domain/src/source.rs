use crate::error::Result;
use crate::feed::{SourceConfig, SourceType};
use crate::item::FetchedFeed;
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-attempt cancellation and deadline, threaded through every adapter's
/// blocking I/O.
#[derive(Clone)]
pub struct FetchContext {
    pub cancellation: CancellationToken,
    pub deadline: Duration,
}

impl FetchContext {
    pub fn new(deadline: Duration) -> Self {
        Self {
            cancellation: CancellationToken::new(),
            deadline,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline,
        }
    }
}

/// The capability every source adapter implements.
#[async_trait]
pub trait Source: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Syntactic and semantic checks without network I/O.
    fn validate(&self, config: &SourceConfig) -> Result<()>;

    /// May perform I/O; must honor `ctx.cancellation`.
    async fn fetch(&self, ctx: &FetchContext, config: &SourceConfig) -> Result<FetchedFeed>;
}
