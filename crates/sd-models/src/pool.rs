//! Task pool running analyses off the async executor
//!
//! Engines are CPU-bound, so each run goes to `spawn_blocking` behind a
//! semaphore sized by [`PoolConfig::workers`]. A timed-out run has its
//! cancellation flag set; iterative engines stop at their next check.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinHandle};
use tracing::{debug, warn};

use crate::base::{AnalysisOutput, RunContext};
use crate::error::{ModelError, Result};
use crate::runner::{AnalysisRequest, AnalysisResponse, run_with_context};


/// Pool sizing and per-run timeout
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Analyses allowed to run at once
    pub workers: usize,
    /// Applied by [`AnalysisPool::submit`] and [`AnalysisPool::run`]
    pub timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            timeout: None,
        }
    }
}

impl PoolConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Bounded pool of analysis runs; cheap to clone
#[derive(Debug, Clone)]
pub struct AnalysisPool {
    config: PoolConfig,
    permits: Arc<Semaphore>,
}

impl Default for AnalysisPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl AnalysisPool {
    pub fn new(config: PoolConfig) -> Self {
        let workers = config.workers.max(1);
        Self {
            config: PoolConfig { workers, ..config },
            permits: Arc::new(Semaphore::new(workers)),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Start a run on the current runtime
    pub fn submit(&self, request: AnalysisRequest) -> JoinHandle<AnalysisResponse> {
        let pool = self.clone();
        tokio::spawn(async move { pool.run(request).await })
    }

    /// Run to completion, honouring the configured timeout
    pub async fn run(&self, request: AnalysisRequest) -> AnalysisResponse {
        match self.config.timeout {
            Some(timeout) => self.run_with_timeout(request, timeout).await,
            None => execute(Arc::clone(&self.permits), request, RunContext::new()).await,
        }
    }

    /// Run with a deadline covering both queueing and computation
    pub async fn run_with_timeout(
        &self,
        request: AnalysisRequest,
        timeout: Duration,
    ) -> AnalysisResponse {
        let method = request.method();
        let ctx = RunContext::new();
        let flag = ctx.cancel_flag();
        match tokio::time::timeout(timeout, execute(Arc::clone(&self.permits), request, ctx)).await
        {
            Ok(output) => output,
            Err(_) => {
                flag.store(true, Ordering::Relaxed);
                warn!(method, seconds = timeout.as_secs_f64(), "analysis timed out");
                AnalysisOutput::from_error(&ModelError::TimedOut {
                    seconds: timeout.as_secs_f64(),
                })
            }
        }
    }

    /// Fan the requests out and join them in request order.
    ///
    /// Fails with the first failed member's errors if any run failed.
    pub async fn run_all(
        &self,
        requests: impl IntoIterator<Item = AnalysisRequest>,
    ) -> Result<Vec<AnalysisResponse>> {
        let (methods, handles): (Vec<_>, Vec<_>) = requests
            .into_iter()
            .map(|request| (request.method(), self.submit(request)))
            .unzip();
        debug!(runs = handles.len(), "joining analysis batch");

        let mut outputs = Vec::with_capacity(handles.len());
        for (index, (method, joined)) in methods.into_iter().zip(join_all(handles).await).enumerate() {
            let output = joined
                .map_err(|e| ModelError::custom(format!("Analysis task failed: {}", e)))?;
            if !output.is_success() {
                return Err(ModelError::custom(format!(
                    "Analysis {} ({}) failed: {}",
                    index + 1,
                    method,
                    output.get_all_errors()
                )));
            }
            outputs.push(output);
        }
        Ok(outputs)
    }
}

async fn execute(
    permits: Arc<Semaphore>,
    request: AnalysisRequest,
    ctx: RunContext,
) -> AnalysisResponse {
    let Ok(permit) = permits.acquire_owned().await else {
        return AnalysisOutput::from_error(&ModelError::custom("Analysis pool is closed"));
    };
    let method = request.method();
    // the permit lives as long as the blocking run, even if the caller stops waiting
    let joined = task::spawn_blocking(move || {
        let _permit = permit;
        run_with_context(&request, &ctx)
    })
    .await;
    joined.unwrap_or_else(|e| {
        warn!(method, error = %e, "analysis task failed");
        AnalysisOutput::from_error(&ModelError::custom(format!("Analysis task failed: {}", e)))
    })
}
