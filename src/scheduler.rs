use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Run a future once, after a delay
///
/// Used for the randomized M-SEARCH response delay and the scanner's MX
/// timeout. The returned handle can be dropped; the task keeps running.
pub(crate) fn one_shot<F>(delay: Duration, task: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        task.await;
    })
}

/// A cancellable fixed-rate task
///
/// Drives the periodic re-announcement: first fire after `initial_delay`,
/// then every `period`. Cancelled cooperatively at node close (and on
/// drop, so a leaked node does not announce forever).
pub(crate) struct PeriodicTask {
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    pub(crate) fn spawn<M, F>(
        initial_delay: Duration,
        period: Duration,
        mut tick: M,
    ) -> Self
    where
        M: FnMut() -> F + Send + 'static,
        F: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(initial_delay).await;
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                tick().await;
            }
        });
        Self { handle }
    }

    pub(crate) fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
