//! Delayed, repeating and background task execution.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::warn;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub type RepeatingTask = Box<dyn FnMut() + Send + 'static>;

/// Shortest period a repeating task runs at.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Cancellation handle for a scheduled task. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

pub trait TaskProvider: Send + Sync {
    /// Runs `task` once after `delay` unless cancelled first.
    fn schedule_delayed(&self, delay: Duration, task: BoxFuture) -> TaskHandle;

    /// Runs `task` after `delay`, then every `period`.
    fn schedule_repeating(&self, delay: Duration, period: Duration, task: RepeatingTask) -> TaskHandle;

    /// Runs `task` in the background, off the caller's stack.
    fn run_async(&self, task: BoxFuture);
}

/// [`TaskProvider`] backed by a tokio runtime.
pub struct TokioTaskProvider {
    runtime: Handle,
}

impl TokioTaskProvider {
    /// Uses the runtime of the calling context.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn current() -> Self {
        Self {
            runtime: Handle::current(),
        }
    }

    #[must_use]
    pub fn with_handle(runtime: Handle) -> Self {
        Self { runtime }
    }
}

impl TaskProvider for TokioTaskProvider {
    fn schedule_delayed(&self, delay: Duration, task: BoxFuture) -> TaskHandle {
        let handle = TaskHandle::new();
        let flag = handle.clone();

        self.runtime.spawn(async move {
            time::sleep(delay).await;
            if !flag.is_cancelled() {
                task.await;
            }
        });

        handle
    }

    fn schedule_repeating(&self, delay: Duration, period: Duration, mut task: RepeatingTask) -> TaskHandle {
        let handle = TaskHandle::new();
        let flag = handle.clone();
        if period.is_zero() {
            warn!("Zero period for a repeating task, using {:?}", MIN_PERIOD);
        }
        let period = period.max(MIN_PERIOD);

        self.runtime.spawn(async move {
            let mut interval = time::interval_at(Instant::now() + delay, period);
            // a late tick pushes the schedule back instead of bursting
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if flag.is_cancelled() {
                    break;
                }
                task();
            }
        });

        handle
    }

    fn run_async(&self, task: BoxFuture) {
        self.runtime.spawn(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, RepeatingTask) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, Box::new(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_task_waits_for_its_delay() {
        let tasks = TokioTaskProvider::current();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        tasks.schedule_delayed(
            Duration::from_secs(3),
            Box::pin(async move { flag.store(true, Ordering::SeqCst) }),
        );

        time::sleep(Duration::from_millis(2_900)).await;
        assert!(!fired.load(Ordering::SeqCst));
        time::sleep(Duration::from_millis(200)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_delayed_task_never_runs() {
        let tasks = TokioTaskProvider::current();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        let handle = tasks.schedule_delayed(
            Duration::from_secs(1),
            Box::pin(async move { flag.store(true, Ordering::SeqCst) }),
        );
        handle.cancel();
        handle.cancel();

        time::sleep(Duration::from_secs(5)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_task_keeps_its_period_until_cancelled() {
        let tasks = TokioTaskProvider::current();
        let (count, task) = counter();

        let handle = tasks.schedule_repeating(Duration::from_secs(10), Duration::from_secs(10), task);

        time::sleep(Duration::from_millis(9_999)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        time::sleep(Duration::from_millis(20_002)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        handle.cancel();
        time::sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_still_ticks() {
        let tasks = TokioTaskProvider::current();
        let (count, task) = counter();

        let handle = tasks.schedule_repeating(Duration::ZERO, Duration::ZERO, task);
        time::sleep(Duration::from_millis(10)).await;
        handle.cancel();

        assert!(count.load(Ordering::SeqCst) >= 5);
    }
}
