//! Remedy callbacks and the per-`(alarm_id, callback)` state machine that
//! drives them (SPEC_FULL.md §4.7).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, info, warn};

use crate::id::AlarmId;

pub const DEFAULT_CALLBACK_TIMEOUT_MS: u64 = 60_000;

pub type RemedyFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A user-supplied remedy callback plus its timing policy (SPEC_FULL.md §6).
#[derive(Clone)]
pub struct RemedySpec {
    pub callback: Arc<dyn Fn(AlarmId) -> RemedyFuture + Send + Sync>,
    pub callback_timeout_ms: u64,
    /// `None` means retry is disabled: the callback runs once per `Set` edge.
    pub retry_timeout_ms: Option<u64>,
}

impl RemedySpec {
    pub fn new(callback: Arc<dyn Fn(AlarmId) -> RemedyFuture + Send + Sync>) -> Self {
        RemedySpec {
            callback,
            callback_timeout_ms: DEFAULT_CALLBACK_TIMEOUT_MS,
            retry_timeout_ms: None,
        }
    }
}

impl fmt::Debug for RemedySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemedySpec")
            .field("callback_timeout_ms", &self.callback_timeout_ms)
            .field("retry_timeout_ms", &self.retry_timeout_ms)
            .finish_non_exhaustive()
    }
}

/// A message delivered to a running [`RemedyWorker`] loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemedyEvent {
    AlarmSet,
    AlarmCleared,
    CallbackFinished,
    CallbackTimedOut,
    RetryTimerFired,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Clear,
    Running,
    Finishing,
    WaitingToRetry,
}

/// Drives the state machine described in SPEC_FULL.md §4.7. `run` owns the
/// worker's mailbox and supervises the callback task directly; external
/// callers talk to it only through the returned `mpsc::Sender`.
pub struct RemedyWorker {
    pub alarm_id: AlarmId,
    spec: RemedySpec,
    state: WorkerState,
    events: mpsc::Receiver<RemedyEvent>,
    sender: mpsc::Sender<RemedyEvent>,
    callback_abort: Option<AbortHandle>,
    supervisor_task: Option<JoinHandle<()>>,
}

impl RemedyWorker {
    pub fn new(alarm_id: AlarmId, spec: RemedySpec) -> (Self, mpsc::Sender<RemedyEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let worker = RemedyWorker {
            alarm_id,
            spec,
            state: WorkerState::Clear,
            events: rx,
            sender: tx.clone(),
            callback_abort: None,
            supervisor_task: None,
        };
        (worker, tx)
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Reconfigure the callback/timeouts. Takes effect on the next `Set`
    /// edge; a timer already live for the old `callback_timeout_ms` keeps
    /// running to completion rather than being retroactively rescheduled.
    pub fn reconfigure(&mut self, spec: RemedySpec) {
        self.spec = spec;
    }

    /// The worker's event loop. Runs until a [`RemedyEvent::Stop`] is
    /// received, at which point any live task is killed unconditionally.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            if event == RemedyEvent::Stop {
                break;
            }
            self.apply(event);
        }
        if let Some(abort) = self.callback_abort.take() {
            abort.abort();
        }
        if let Some(h) = self.supervisor_task.take() {
            h.abort();
        }
    }

    fn apply(&mut self, event: RemedyEvent) {
        use RemedyEvent::*;
        use WorkerState::*;
        match (self.state, event) {
            (Clear, AlarmSet) => {
                self.state = Running;
                info!(id = %self.alarm_id, "remedy worker entering Running");
                self.spawn_callback();
            }
            (Running, AlarmCleared) => {
                self.state = Finishing;
                info!(id = %self.alarm_id, "remedy worker entering Finishing (alarm cleared mid-callback)");
            }
            (Running, CallbackFinished) | (Running, CallbackTimedOut) => {
                if event == CallbackTimedOut {
                    error!(id = %self.alarm_id, "remedy callback timed out");
                }
                self.state = WaitingToRetry;
                self.start_retry_timer();
            }
            (Finishing, AlarmSet) => {
                self.state = Running;
                info!(id = %self.alarm_id, "remedy worker re-entering Running (set/clear/set glitch absorbed)");
            }
            (Finishing, CallbackFinished) | (Finishing, CallbackTimedOut) => {
                if event == CallbackTimedOut {
                    error!(id = %self.alarm_id, "remedy callback timed out while finishing");
                }
                self.state = Clear;
            }
            (WaitingToRetry, RetryTimerFired) => {
                self.state = Running;
                info!(id = %self.alarm_id, "remedy worker retrying");
                self.spawn_callback();
            }
            (WaitingToRetry, AlarmCleared) => {
                self.state = Clear;
                if let Some(h) = self.supervisor_task.take() {
                    h.abort();
                }
            }
            _ => {
                warn!(id = %self.alarm_id, ?event, state = ?self.state, "ignored remedy event for current state");
            }
        }
    }

    /// Spawns the callback, then a supervisor task that races it against the
    /// callback timeout and reports the outcome back to this worker's
    /// mailbox. The supervisor owns the callback's `JoinHandle` so a timeout
    /// can forcefully abort it; `callback_abort` keeps an independent handle
    /// so worker shutdown can abort the callback even if the supervisor is
    /// itself killed first.
    fn spawn_callback(&mut self) {
        let callback = self.spec.callback.clone();
        let alarm_id = self.alarm_id.clone();
        let mut handle = tokio::spawn(async move { callback(alarm_id).await });
        self.callback_abort = Some(handle.abort_handle());

        let sender = self.sender.clone();
        let timeout = Duration::from_millis(self.spec.callback_timeout_ms);
        self.supervisor_task = Some(tokio::spawn(async move {
            tokio::select! {
                res = &mut handle => {
                    let _ = res;
                    let _ = sender.send(RemedyEvent::CallbackFinished).await;
                }
                _ = tokio::time::sleep(timeout) => {
                    handle.abort();
                    let _ = sender.send(RemedyEvent::CallbackTimedOut).await;
                }
            }
        }));
    }

    fn start_retry_timer(&mut self) {
        let Some(retry_ms) = self.spec.retry_timeout_ms else {
            return;
        };
        let sender = self.sender.clone();
        self.supervisor_task = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(retry_ms)).await;
            let _ = sender.send(RemedyEvent::RetryTimerFired).await;
        }));
    }
}
