//! Periodic token refresh task

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs a tick closure every `period` until stopped or the closure breaks.
///
/// Stopping only cancels; it never aborts a tick in flight, so a tick may stop
/// its own timer (a failed refresh logs out, which stops the timer).
pub struct RefreshTimer {
    period: Duration,
    running: Mutex<Option<Running>>,
}

impl RefreshTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            running: Mutex::new(None),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start ticking, replacing any running loop. The first tick fires one
    /// full period after start.
    pub fn start<F, Fut>(&self, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ControlFlow<()>> + Send + 'static,
    {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let period = self.period;

        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    () = cancelled.cancelled() => break,
                    _ = interval.tick() => {
                        debug!("Refresh timer tick");
                        if tick().await.is_break() {
                            break;
                        }
                    }
                }
            }
            debug!("Refresh timer stopped");
        });

        let previous = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(Running { token, handle });
        if let Some(previous) = previous {
            previous.token.cancel();
        }
    }

    pub fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = running {
            running.token.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|r| !r.token.is_cancelled() && !r.handle.is_finished())
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for RefreshTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshTimer")
            .field("period", &self.period)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(
        count: &Arc<AtomicUsize>,
        limit: usize,
    ) -> impl FnMut() -> std::future::Ready<ControlFlow<()>> + Send + 'static {
        let count = count.clone();
        move || {
            let n = count.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if n >= limit {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_tick_after_one_period() {
        let timer = RefreshTimer::new(Duration::from_secs(60));
        let count = Arc::new(AtomicUsize::new(0));
        timer.start(counting(&count, usize::MAX));

        time::sleep(Duration::from_secs(59)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_the_loop() {
        let timer = RefreshTimer::new(Duration::from_secs(10));
        let count = Arc::new(AtomicUsize::new(0));
        timer.start(counting(&count, usize::MAX));

        time::sleep(Duration::from_secs(15)).await;
        timer.stop();
        assert!(!timer.is_running());

        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn break_ends_the_loop() {
        let timer = RefreshTimer::new(Duration::from_secs(10));
        let count = Arc::new(AtomicUsize::new(0));
        timer.start(counting(&count, 2));

        time::sleep(Duration::from_secs(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_loop() {
        let timer = RefreshTimer::new(Duration::from_secs(10));
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        timer.start(counting(&first, usize::MAX));
        time::sleep(Duration::from_secs(5)).await;
        timer.start(counting(&second, usize::MAX));

        time::sleep(Duration::from_secs(12)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
