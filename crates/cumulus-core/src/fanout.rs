//! Concurrent fan-out listing.
//!
//! Runs one listing per parent and flattens the results. Without a [`WorkerPool`]
//! parents are listed one after another; with a pool each parent is listed on its own
//! tokio task, at most `size` at a time. Items from one parent keep their order; no
//! order is promised across parents.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::error::{Error, Result};

/// Bounded set of workers for fan-out listings.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool running at most `size` listings at once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if `size` is zero.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::ConfigError(
                "worker pool size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        })
    }

    /// Create a pool sized by `fanout_workers`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigError`] if the configured size is zero.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        Self::new(config.fanout_workers)
    }

    /// Maximum concurrent listings.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    fn spawn_all<P, T, F, Fut>(
        &self,
        parents: impl IntoIterator<Item = P>,
        list_one: F,
    ) -> JoinSet<Result<Vec<T>>>
    where
        F: Fn(P) -> Fut,
        Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
        T: Send + 'static,
    {
        let mut tasks = JoinSet::new();
        for parent in parents {
            let listing = list_one(parent);
            let permits = Arc::clone(&self.permits);
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::InternalError("worker pool closed".to_string()))?;
                listing.await
            });
        }
        debug!(tasks = tasks.len(), workers = self.size, "Fan-out started");
        tasks
    }
}

/// Results of a best-effort fan-out.
#[derive(Debug)]
pub struct PartialListing<T> {
    /// Items from every parent that listed successfully
    pub items: Vec<T>,
    /// One error per parent that failed
    pub failures: Vec<Error>,
}

impl<T> PartialListing<T> {
    /// Whether every parent listed successfully.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// List every parent and flatten the results, failing on the first error.
///
/// With a pool, the remaining listings are aborted once one fails.
///
/// # Errors
///
/// Returns the first listing error, or [`Error::InternalError`] if a listing task
/// panicked.
pub async fn fan_out<P, T, F, Fut>(
    parents: impl IntoIterator<Item = P>,
    pool: Option<&WorkerPool>,
    list_one: F,
) -> Result<Vec<T>>
where
    F: Fn(P) -> Fut,
    Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
    T: Send + 'static,
{
    let mut items = Vec::new();

    let Some(pool) = pool else {
        for parent in parents {
            items.extend(list_one(parent).await?);
        }
        return Ok(items);
    };

    let mut tasks = pool.spawn_all(parents, list_one);
    while let Some(joined) = tasks.join_next().await {
        match joined.map_err(join_failure).and_then(|outcome| outcome) {
            Ok(listed) => items.extend(listed),
            Err(err) => {
                warn!(%err, pending = tasks.len(), "Fan-out listing failed; aborting the rest");
                tasks.abort_all();
                return Err(err);
            }
        }
    }
    Ok(items)
}

/// List every parent, collecting failures instead of stopping at the first one.
pub async fn fan_out_partial<P, T, F, Fut>(
    parents: impl IntoIterator<Item = P>,
    pool: Option<&WorkerPool>,
    list_one: F,
) -> PartialListing<T>
where
    F: Fn(P) -> Fut,
    Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
    T: Send + 'static,
{
    let mut listing = PartialListing {
        items: Vec::new(),
        failures: Vec::new(),
    };

    let mut record = |outcome: Result<Vec<T>>| match outcome {
        Ok(listed) => listing.items.extend(listed),
        Err(err) => {
            debug!(%err, "Fan-out listing failed; continuing");
            listing.failures.push(err);
        }
    };

    match pool {
        None => {
            for parent in parents {
                record(list_one(parent).await);
            }
        }
        Some(pool) => {
            let mut tasks = pool.spawn_all(parents, list_one);
            while let Some(joined) = tasks.join_next().await {
                record(joined.map_err(join_failure).and_then(|outcome| outcome));
            }
        }
    }

    listing
}

fn join_failure(err: tokio::task::JoinError) -> Error {
    Error::InternalError(format!("fan-out task failed: {err}"))
}
