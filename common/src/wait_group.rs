//! Tracking of background tasks so teardown can wait for them

use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

/// Counter of outstanding work that can be waited on from threads or tasks.
///
/// Calling [`WaitGroup::done`] more times than [`WaitGroup::add`] accounted
/// for is a programming error and panics.
#[derive(Default)]
pub struct WaitGroup {
    counter: Mutex<i64>,
    zero: Condvar,
    zero_async: Notify,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adjust the counter by `delta`
    pub fn add(&self, delta: i64) {
        let mut counter = self.counter.lock();
        let updated = *counter + delta;
        if updated < 0 {
            panic!("negative values for wait group counter are not allowed");
        }
        *counter = updated;
        if updated == 0 {
            self.zero.notify_all();
            self.zero_async.notify_waiters();
        }
    }

    pub fn done(&self) {
        self.add(-1);
    }

    pub fn count(&self) -> i64 {
        *self.counter.lock()
    }

    /// Block the current thread until the counter reaches zero
    pub fn wait(&self) {
        let mut counter = self.counter.lock();
        while *counter != 0 {
            self.zero.wait(&mut counter);
        }
    }

    /// Wait asynchronously until the counter reaches zero
    pub async fn wait_async(&self) {
        loop {
            let notified = self.zero_async.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent `done` can't be missed
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Releases one count when dropped, including on panic unwind
struct DoneGuard(Arc<WaitGroup>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.0.done();
    }
}

/// Spawns tokio tasks and keeps count of those still running
#[derive(Clone, Default)]
pub struct TaskTracker {
    wait_group: Arc<WaitGroup>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a named task on the current runtime
    pub fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.wait_group.add(1);
        let guard = DoneGuard(self.wait_group.clone());
        let name = name.to_string();
        tokio::spawn(async move {
            let _guard = guard;
            debug!(task = %name, "Task started");
            future.await;
            debug!(task = %name, "Task finished");
        })
    }

    /// Number of tracked tasks still running
    pub fn active(&self) -> i64 {
        self.wait_group.count()
    }

    /// Resolve once every tracked task has finished
    pub async fn wait(&self) {
        self.wait_group.wait_async().await
    }
}
