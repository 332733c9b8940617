//! The `Executor` contract consumed from the environment: submit a task, get
//! back nothing the framework relies on. A minimal spawn-per-task default is
//! provided as a stand-in for the real worker-pool implementation that a
//! production deployment injects — the pool itself is out of scope (§1).

use std::thread;

/// Accepts a unit of work to run somewhere, at some point.
///
/// The framework never inspects or waits on a submission receipt: it only
/// ever learns that work completed through the future the work itself
/// resolves, never through the executor.
pub trait Executor: Send + Sync {
    /// Submits `task` for execution. Must not block the caller waiting for
    /// `task` to run.
    fn submit(&self, task: Box<dyn FnOnce() + Send + 'static>);
}

/// Spawns one OS thread per submitted task.
///
/// This is deliberately the simplest possible `Executor`: no queueing, no
/// bounded concurrency, no thread reuse. It exists so `Framework::with_defaults`
/// has *something* to inject; real deployments should bring their own pool
/// (rayon, a tokio runtime, a bespoke bounded queue) rather than rely on this.
#[derive(Debug, Default)]
pub struct SpawnPerTaskExecutor;

impl Executor for SpawnPerTaskExecutor {
    fn submit(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        thread::Builder::new()
            .name("resolvent-worker".to_string())
            .spawn(task)
            .expect("failed to spawn worker thread");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn spawn_per_task_runs_submitted_work() {
        let (tx, rx) = mpsc::channel();
        let executor = SpawnPerTaskExecutor;
        executor.submit(Box::new(move || {
            tx.send(42).unwrap();
        }));
        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap(), 42);
    }
}
