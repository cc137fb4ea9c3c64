use crate::config::{EngineConfig, ParallelFailurePolicy};
use agentflow_core::FlowResult;
use futures::future::BoxFuture;
#[cfg(feature = "parallel")]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(feature = "parallel")]
use std::sync::Arc;
#[cfg(feature = "parallel")]
use tokio::sync::Semaphore;
#[cfg(feature = "parallel")]
use tokio::task::JoinSet;


/// A branch of a parallel node, ready to be polled.
pub type Branch<T> = BoxFuture<'static, FlowResult<T>>;

/// Configuration for parallel execution
#[derive(Debug, Clone, Default)]
pub struct ParallelConfig {
    /// Maximum number of concurrent branches (None for unlimited)
    pub max_concurrency: Option<usize>,
    /// What happens to in-flight siblings when a branch fails
    pub failure: ParallelFailurePolicy,
}

impl ParallelConfig {
    /// Create a config with maximum concurrency limit
    pub fn with_max_concurrency(concurrency: usize) -> Self {
        Self {
            max_concurrency: Some(concurrency),
            ..Default::default()
        }
    }

    /// Set maximum concurrency
    pub fn max_concurrency(mut self, concurrency: usize) -> Self {
        self.max_concurrency = Some(concurrency);
        self
    }

    /// Drop in-flight siblings on the first failure
    pub fn with_cancel_siblings(mut self) -> Self {
        self.failure = ParallelFailurePolicy::CancelSiblings;
        self
    }
}

impl From<&EngineConfig> for ParallelConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            failure: config.parallel_failure,
        }
    }
}

/// Final state of one branch.
#[derive(Debug)]
pub enum BranchOutcome<T> {
    Completed(T),
    Failed(agentflow_core::FlowError),
    /// Never dispatched because a sibling had already failed.
    Skipped,
    /// Dropped while in flight.
    Cancelled,
}

impl<T> BranchOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, BranchOutcome::Completed(_))
    }
}

/// Executor for the branches of one parallel node
pub struct ParallelExecutor {
    config: ParallelConfig,
}

impl ParallelExecutor {
    pub fn new() -> Self {
        Self {
            config: ParallelConfig::default(),
        }
    }

    /// Create executor with custom configuration
    pub fn with_config(config: ParallelConfig) -> Self {
        Self { config }
    }

    /// Runs every branch and returns their outcomes in declaration order.
    #[cfg(feature = "parallel")]
    pub async fn execute_branches<T>(&self, branches: Vec<Branch<T>>) -> Vec<BranchOutcome<T>>
    where
        T: Send + 'static,
    {
        let count = branches.len();
        let failed = Arc::new(AtomicBool::new(false));
        let semaphore = self
            .config
            .max_concurrency
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        let mut join_set = JoinSet::new();

        for (index, branch) in branches.into_iter().enumerate() {
            let failed = failed.clone();
            let sem = semaphore.clone();

            join_set.spawn(async move {
                let _permit = match sem {
                    Some(semaphore) => match semaphore.acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => return (index, BranchOutcome::Skipped),
                    },
                    None => None,
                };

                if failed.load(Ordering::SeqCst) {
                    return (index, BranchOutcome::Skipped);
                }

                match branch.await {
                    Ok(value) => (index, BranchOutcome::Completed(value)),
                    Err(e) => {
                        failed.store(true, Ordering::SeqCst);
                        (index, BranchOutcome::Failed(e))
                    }
                }
            });
        }

        let mut outcomes: Vec<Option<BranchOutcome<T>>> = (0..count).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    let is_failure = matches!(outcome, BranchOutcome::Failed(_));
                    outcomes[index] = Some(outcome);
                    if is_failure && self.config.failure == ParallelFailurePolicy::CancelSiblings {
                        join_set.abort_all();
                    }
                }
                Err(join_error) if join_error.is_cancelled() => {}
                Err(join_error) => {
                    tracing::error!(error = %join_error, "parallel branch panicked");
                    failed.store(true, Ordering::SeqCst);
                }
            }
        }

        outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or(BranchOutcome::Cancelled))
            .collect()
    }

    /// Runs every branch in declaration order, one at a time.
    #[cfg(not(feature = "parallel"))]
    pub async fn execute_branches<T>(&self, branches: Vec<Branch<T>>) -> Vec<BranchOutcome<T>>
    where
        T: Send + 'static,
    {
        let mut outcomes = Vec::with_capacity(branches.len());
        let mut failed = false;
        for branch in branches {
            if failed {
                outcomes.push(BranchOutcome::Skipped);
                continue;
            }
            match branch.await {
                Ok(value) => outcomes.push(BranchOutcome::Completed(value)),
                Err(e) => {
                    failed = true;
                    outcomes.push(BranchOutcome::Failed(e));
                }
            }
        }
        outcomes
    }
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new()
    }
}
