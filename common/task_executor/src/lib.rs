use futures::prelude::*;
use std::sync::LazyLock;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub use tokio_util::sync::CancellationToken as ShutdownToken;

static ASYNC_TASKS_HISTOGRAM: LazyLock<metrics::Result<metrics::HistogramVec>> =
    LazyLock::new(|| {
        metrics::try_create_histogram_vec(
            "async_tasks_time_seconds",
            "Time taken by async tasks",
            &["task"],
        )
    });
static ASYNC_TASKS_COUNT: LazyLock<metrics::Result<metrics::IntGaugeVec>> = LazyLock::new(|| {
    metrics::try_create_int_gauge_vec(
        "async_tasks_count",
        "Total number of async tasks spawned using spawn",
        &["task"],
    )
});

/// A wrapper over a runtime handle which can spawn async and blocking tasks.
///
/// Tasks are raced against the executor's shutdown token: when the node shuts down, every task
/// spawned through this executor unwinds at its next await point.
#[derive(Clone)]
pub struct TaskExecutor {
    handle: Handle,
    exit: CancellationToken,
}

impl TaskExecutor {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            exit: CancellationToken::new(),
        }
    }

    /// An executor bound to the current tokio runtime, for tests.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// The token tasks should propagate to child operations that need cancellation.
    pub fn exit_token(&self) -> CancellationToken {
        self.exit.clone()
    }

    /// Begin shutdown: every shutdown-aware task unwinds at its next await.
    pub fn shutdown(&self) {
        self.exit.cancel();
    }

    /// Spawn a shutdown-aware future, incrementing the task-count metric.
    pub fn spawn(&self, task: impl Future<Output = ()> + Send + 'static, name: &'static str) {
        if let Some(int_gauge) = metrics::get_int_gauge(&ASYNC_TASKS_COUNT, &[name]) {
            int_gauge.inc();
            let exit = self.exit.clone();
            self.handle.spawn(async move {
                tokio::select! {
                    _ = exit.cancelled() => {
                        debug!(task = name, "Async task shutdown, exit received");
                    }
                    _ = task => {}
                }
                int_gauge.dec();
            });
        }
    }

    /// Spawn a future that must run to completion even during shutdown (e.g. a write batch).
    pub fn spawn_without_exit(
        &self,
        task: impl Future<Output = ()> + Send + 'static,
        name: &'static str,
    ) {
        if let Some(int_gauge) = metrics::get_int_gauge(&ASYNC_TASKS_COUNT, &[name]) {
            int_gauge.inc();
            self.handle.spawn(task.then(move |_| async move {
                int_gauge.dec();
            }));
        }
    }

    /// Spawn a shutdown-aware future, returning a handle to its result.
    ///
    /// Returns `None` only if the executor is already shut down.
    pub fn spawn_handle<R: Send + 'static>(
        &self,
        task: impl Future<Output = R> + Send + 'static,
        name: &'static str,
    ) -> Option<tokio::task::JoinHandle<Option<R>>> {
        if self.exit.is_cancelled() {
            return None;
        }
        let exit = self.exit.clone();
        let timer = metrics::start_timer_vec(&ASYNC_TASKS_HISTOGRAM, &[name]);
        Some(self.handle.spawn(async move {
            let result = tokio::select! {
                _ = exit.cancelled() => {
                    debug!(task = name, "Async task shutdown, exit received");
                    None
                }
                result = task => Some(result),
            };
            drop(timer);
            result
        }))
    }

    /// Spawn a blocking (CPU-bound or synchronous-IO) task on the blocking pool.
    pub fn spawn_blocking_handle<F, R>(
        &self,
        task: F,
        name: &'static str,
    ) -> Option<tokio::task::JoinHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.exit.is_cancelled() {
            return None;
        }
        let timer = metrics::start_timer_vec(&ASYNC_TASKS_HISTOGRAM, &[name]);
        Some(self.handle.spawn_blocking(move || {
            let result = task();
            drop(timer);
            result
        }))
    }

    /// Block the current (non-async) thread on a future, racing it against shutdown.
    pub fn block_on_dangerous<F: Future>(&self, future: F, _name: &'static str) -> Option<F::Output> {
        let exit = self.exit.clone();
        self.handle.block_on(async move {
            tokio::select! {
                _ = exit.cancelled() => None,
                output = future => Some(output),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn spawn_handle_returns_result() {
        let executor = TaskExecutor::current();
        let handle = executor.spawn_handle(async { 42 }, "test_task").unwrap();
        assert_eq!(handle.await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_tasks() {
        let executor = TaskExecutor::current();
        let handle = executor
            .spawn_handle(
                async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    42
                },
                "test_sleeper",
            )
            .unwrap();
        executor.shutdown();
        assert_eq!(handle.await.unwrap(), None);
    }

    #[tokio::test]
    async fn no_spawning_after_shutdown() {
        let executor = TaskExecutor::current();
        executor.shutdown();
        assert!(executor.spawn_handle(async { () }, "late").is_none());
    }
}
