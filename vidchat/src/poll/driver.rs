//! Runs a poll loop on a tokio task.
//!
//! The loop is strictly sequential: wait, tick, wait, tick. A tick is never
//! started while the previous one is still running, however slow the
//! network is. Waiting ends early when the handle is [kicked](PollHandle::kick),
//! and the whole loop ends on [`PollHandle::stop`], when the handle is
//! dropped, or when the ticker asks to stop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Whether the loop should keep going after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    /// Wait and tick again.
    Continue,
    /// End the loop.
    Stop,
}

/// One poll target.
pub trait Ticker: Send + Sync + 'static {
    /// Wait before the next tick; `None` ends the loop.
    fn next_delay(&self) -> Option<Duration>;

    /// Run one fetch cycle.
    fn tick(&self) -> impl Future<Output = TickControl> + Send;
}

/// Owner of a running poll loop.
///
/// Dropping the handle cancels the loop.
#[derive(Debug)]
pub struct PollHandle {
    cancel: CancellationToken,
    kick: Arc<Notify>,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Starts polling `ticker` on the current runtime.
    pub fn spawn<T: Ticker>(ticker: T) -> Self {
        let cancel = CancellationToken::new();
        let kick = Arc::new(Notify::new());
        let task = tokio::spawn(run(ticker, cancel.clone(), Arc::clone(&kick)));
        Self { cancel, kick, task }
    }

    /// Skips the current wait. A kick during a tick makes the next tick
    /// start right after it.
    pub fn kick(&self) {
        self.kick.notify_one();
    }

    /// Ends the loop. An in-flight tick is abandoned at its next await.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Whether the loop has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<T: Ticker>(ticker: T, cancel: CancellationToken, kick: Arc<Notify>) {
    loop {
        let Some(delay) = ticker.next_delay() else {
            break;
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = kick.notified() => {}
            () = tokio::time::sleep(delay) => {}
        }

        let control = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            control = ticker.tick() => control,
        };
        if control == TickControl::Stop {
            break;
        }
    }
    tracing::debug!("poll loop exited");
}
