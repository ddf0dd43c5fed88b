// ── Visibility-gated polling ──
//
// Periodic background work that pauses while the consumer is hidden and
// refreshes immediately when it becomes visible again.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default polling period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Whether the consumer of polled data is currently looking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// Handle to a polling task. Dropping it stops polling.
#[derive(Debug)]
pub struct Poller {
    cancel: CancellationToken,
    polling: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Poller {
    /// Run `task` now, then every `interval` while `visibility` is
    /// [`Visible`](Visibility::Visible).
    ///
    /// Errors from `task` are logged and polling continues. If the
    /// visibility sender is dropped, the last value holds.
    pub fn spawn<F, Fut, E>(
        interval: Duration,
        visibility: watch::Receiver<Visibility>,
        task: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + 'static,
    {
        let cancel = CancellationToken::new();
        let polling = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(poll_loop(
            interval,
            visibility,
            task,
            Arc::clone(&polling),
            cancel.clone(),
        ));
        Self {
            cancel,
            polling,
            task: handle,
        }
    }

    /// Whether the interval is currently armed.
    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::SeqCst)
    }

    /// Stop polling for good.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.polling.store(false, Ordering::SeqCst);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop<F, Fut, E>(
    interval: Duration,
    mut visibility: watch::Receiver<Visibility>,
    mut task: F,
    polling: Arc<AtomicBool>,
    cancel: CancellationToken,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), E>> + Send + 'static,
    E: Display + 'static,
{
    // Cleared once the visibility sender is gone; the last value then holds.
    let mut signal_open = true;

    loop {
        let visible = *visibility.borrow_and_update() == Visibility::Visible;

        if !visible {
            polling.store(false, Ordering::SeqCst);
            debug!("poller paused");
            if !signal_open {
                return;
            }
            tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                changed = visibility.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
            continue;
        }

        polling.store(true, Ordering::SeqCst);
        if !run_once(&mut task, &cancel).await {
            break;
        }

        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    polling.store(false, Ordering::SeqCst);
                    return;
                }
                changed = visibility.changed(), if signal_open => {
                    if changed.is_err() {
                        signal_open = false;
                    } else if *visibility.borrow() == Visibility::Hidden {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if !run_once(&mut task, &cancel).await {
                        polling.store(false, Ordering::SeqCst);
                        return;
                    }
                }
            }
        }
    }

    polling.store(false, Ordering::SeqCst);
}

/// Run the task once. `false` if cancelled meanwhile.
async fn run_once<F, Fut, E>(task: &mut F, cancel: &CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        result = task() => {
            if let Err(e) = result {
                warn!(error = %e, "polling task failed");
            }
            true
        }
    }
}
