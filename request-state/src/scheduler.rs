use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A spawned task that can be cancelled, optionally delayed before it starts.
///
/// Cancelling during the delay means the task body never runs. Dropping the
/// handle cancels the task.
pub struct ScheduledTask {
    token: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    pub fn spawn<F>(token: CancellationToken, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self::spawn_after(Duration::ZERO, token, task)
    }

    pub fn spawn_after<F>(delay: Duration, token: CancellationToken, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let join = tokio::spawn({
            let token = token.clone();
            async move {
                if !delay.is_zero() {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            log::debug!("Scheduled task cancelled during its {:?} delay", delay);
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                task.await;
            }
        });

        Self {
            token,
            join: Some(join),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait until the task has run to completion or observed its cancellation
    pub async fn join(&mut self) {
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                log::warn!("Scheduled task did not complete: {}", e);
            }
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_runs_after_delay() {
        let started = Instant::now();
        let ran_at = Arc::new(std::sync::Mutex::new(None));

        let mut task = ScheduledTask::spawn_after(Duration::from_millis(500), CancellationToken::new(), {
            let ran_at = ran_at.clone();
            async move {
                *ran_at.lock().unwrap() = Some(Instant::now());
            }
        });
        task.join().await;

        let ran_at = ran_at.lock().unwrap().unwrap();
        assert_eq!(ran_at - started, Duration::from_millis(500));
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_delay_skips_task() {
        let runs = Arc::new(AtomicUsize::new(0));

        let mut task = ScheduledTask::spawn_after(Duration::from_millis(500), CancellationToken::new(), {
            let runs = runs.clone();
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
            }
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        task.cancel();
        task.join().await;

        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(task.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let token = CancellationToken::new();
        let task = ScheduledTask::spawn_after(Duration::from_secs(1), token.clone(), async {});
        drop(task);
        assert!(token.is_cancelled());
    }
}
