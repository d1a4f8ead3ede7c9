use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::api::errors::DispatchError;

/// The blocking steps of a lookup, each with its own timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Acquire,
    Query,
    Release,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Acquire => "acquire",
            Stage::Query => "query",
            Stage::Release => "release",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Acquire => write!(f, "acquiring a connection"),
            Stage::Query => write!(f, "executing the query"),
            Stage::Release => write!(f, "releasing the connection"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub acquire: Duration,
    pub query: Duration,
    pub release: Duration,
}

impl StageTimeouts {
    pub fn for_stage(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Acquire => self.acquire,
            Stage::Query => self.query,
            Stage::Release => self.release,
        }
    }
}

/// Runs database work on a dedicated runtime with bounded concurrency.
///
/// Event processing stays on the caller's runtime; connection acquisition,
/// query execution and release are spawned onto `handle`, so a slow database
/// ties up the database runtime's workers and never the caller's.
///
/// A [`tokio::sync::Semaphore`] caps the number of lookups doing database
/// work. A lookup takes one [`DispatchPermit`] with [`reserve`] and holds it
/// from acquire through release, so a lookup that owns a connection never
/// waits on lookups that are still waiting for one. Each stage runs under
/// its own timeout; work that overruns is dropped on the database runtime,
/// which also drops any connection it owned.
///
/// [`reserve`]: BlockingDispatcher::reserve
#[derive(Clone)]
pub struct BlockingDispatcher {
    handle: Handle,
    semaphore: Arc<Semaphore>,
    timeouts: StageTimeouts,
}

/// One lookup's share of the dispatcher. Dropping it frees the slot.
#[derive(Debug)]
pub struct DispatchPermit {
    _permit: OwnedSemaphorePermit,
}

impl BlockingDispatcher {
    pub fn new(handle: Handle, max_in_flight: usize, timeouts: StageTimeouts) -> Self {
        Self {
            handle,
            semaphore: Arc::new(Semaphore::new(max_in_flight)),
            timeouts,
        }
    }

    /// Waits for a free slot. Suspends while the database runtime is
    /// saturated.
    pub async fn reserve(&self) -> Result<DispatchPermit, DispatchError> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map(|permit| DispatchPermit { _permit: permit })
            .map_err(|_| DispatchError::Closed)
    }

    /// Runs `work` on the database runtime under the timeout for `stage` and
    /// waits for its output. The caller's permit covers the work.
    pub async fn run<F, T>(
        &self,
        _permit: &DispatchPermit,
        stage: Stage,
        work: F,
    ) -> Result<T, DispatchError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let timeout = self.timeouts.for_stage(stage);
        let task = self
            .handle
            .spawn(async move { tokio::time::timeout(timeout, work).await });

        match task.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_elapsed)) => {
                tracing::warn!(
                    stage = stage.as_str(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Database work timed out"
                );
                Err(DispatchError::TimedOut { stage, timeout })
            }
            Err(e) if e.is_panic() => {
                tracing::error!(stage = stage.as_str(), "Database task panicked");
                Err(DispatchError::Panicked(stage))
            }
            Err(_) => Err(DispatchError::Cancelled(stage)),
        }
    }

    /// Number of permits not currently held. Useful for saturation metrics.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn timeouts(&self) -> StageTimeouts {
        self.timeouts
    }
}
