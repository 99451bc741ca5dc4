use parking_lot::Mutex;
use std::{future::Future, time::Duration};
use tokio::task::JoinHandle;
use tracing::debug;

/// Refresh this long before the access token expires.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Shortest wait between two scheduled refreshes.
pub const MIN_REFRESH_DELAY: Duration = Duration::from_secs(1);

/// `expires_in - margin`, or half the remaining lifetime (at least
/// [`MIN_REFRESH_DELAY`]) when the token already lives inside the margin.
#[must_use]
pub fn refresh_delay(expires_in: Duration, margin: Duration) -> Duration {
    match expires_in.checked_sub(margin) {
        Some(delay) if !delay.is_zero() => delay,
        _ => (expires_in / 2).max(MIN_REFRESH_DELAY),
    }
}

/// A single pending refresh task. Scheduling replaces (and aborts) the previous
/// task; dropping the timer aborts whatever is pending.
#[derive(Debug)]
pub struct RefreshTimer {
    margin: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Default for RefreshTimer {
    fn default() -> Self {
        Self::new(DEFAULT_REFRESH_MARGIN)
    }
}

impl RefreshTimer {
    #[must_use]
    pub fn new(margin: Duration) -> Self {
        Self {
            margin,
            pending: Mutex::new(None),
        }
    }

    /// Run `task` after [`refresh_delay`]. Must be called from within a tokio
    /// runtime.
    pub fn schedule<F, Fut>(&self, expires_in: Duration, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = refresh_delay(expires_in, self.margin);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task().await;
        });

        if let Some(previous) = self.pending.lock().replace(handle) {
            previous.abort();
        }
        debug!(?delay, "Refresh scheduled");
    }

    /// Abort the pending task. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        match self.pending.lock().take() {
            Some(handle) => {
                let was_pending = !handle.is_finished();
                handle.abort();
                was_pending
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn counting_task(counter: &Arc<AtomicUsize>) -> impl FnOnce() -> std::future::Ready<()> + Send + use<> {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test]
    async fn fires_after_expiry_minus_margin() {
        let timer = RefreshTimer::new(Duration::from_millis(20));
        let fired = Arc::new(AtomicUsize::new(0));

        timer.schedule(Duration::from_millis(50), counting_task(&fired));
        assert!(timer.is_scheduled());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_scheduled());
    }

    #[tokio::test]
    async fn cancel_prevents_firing() {
        let timer = RefreshTimer::new(Duration::ZERO);
        let fired = Arc::new(AtomicUsize::new(0));

        timer.schedule(Duration::from_millis(40), counting_task(&fired));
        assert!(timer.cancel());
        assert!(!timer.cancel());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rescheduling_replaces_pending_task() {
        let timer = RefreshTimer::new(Duration::ZERO);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        timer.schedule(Duration::from_millis(40), counting_task(&first));
        timer.schedule(Duration::from_millis(40), counting_task(&second));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn delay_inside_margin_is_floored() {
        let margin = DEFAULT_REFRESH_MARGIN;
        assert_eq!(
            refresh_delay(Duration::from_secs(90), margin),
            Duration::from_secs(60)
        );
        assert_eq!(
            refresh_delay(Duration::from_secs(20), margin),
            Duration::from_secs(10)
        );
        assert_eq!(refresh_delay(margin, margin), Duration::from_secs(15));
        assert_eq!(refresh_delay(Duration::from_secs(1), margin), MIN_REFRESH_DELAY);
        assert_eq!(refresh_delay(Duration::ZERO, margin), MIN_REFRESH_DELAY);
        assert_eq!(refresh_delay(Duration::ZERO, Duration::ZERO), MIN_REFRESH_DELAY);
    }

    #[tokio::test]
    async fn expiry_inside_margin_does_not_fire_immediately() {
        let timer = RefreshTimer::default();
        let fired = Arc::new(AtomicUsize::new(0));

        timer.schedule(Duration::from_secs(5), counting_task(&fired));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(timer.is_scheduled());
    }
}
