//! Worker supervision
//!
//! Every pipeline stage runs as its own tokio task. The supervisor starts
//! them in order, polls their liveness on a short fixed interval, and on the
//! first exit, failure report or interrupt drives a uniform two-phase
//! shutdown: a termination request to every live worker, a bounded wait, then
//! a forced abort of whatever is still running.
//!
//! A panicking worker only takes down its own task. The panic is observed
//! through its join handle and turned into a failure report, so it can never
//! leave another stage running on corrupted state.

use std::any::Any;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::transport::{
    failure_channel, FailureReceiver, FailureReport, FailureSender, FAILURE_CHANNEL_CAPACITY,
};

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Interval between liveness polls
    pub poll_interval: Duration,

    /// How long workers get to exit after a termination request
    pub termination_timeout: Duration,

    /// How long to wait for an aborted worker to unwind
    pub kill_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            termination_timeout: Duration::from_secs(3),
            kill_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

/// What moved the supervisor out of `Running`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
    /// A worker stopped on its own without reporting a failure
    WorkerExited(String),
    /// At least one failure report arrived
    Failure,
    /// Operator interrupt
    Interrupt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Returned on its own before any termination request
    Completed,
    /// Returned an error
    Failed(String),
    /// Panicked
    Panicked(String),
    /// Exited after a termination request
    Terminated,
    /// Aborted after ignoring the termination request
    Killed,
    /// Did not even unwind after being aborted
    Unresponsive,
}

type WorkerResult = anyhow::Result<()>;

/// A worker's view of its supervisor: its name, its cancellation token and
/// the failure side-channel.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    name: String,
    cancel: CancellationToken,
    failures: FailureSender,
}

impl WorkerContext {
    pub fn new(name: impl Into<String>, cancel: CancellationToken, failures: FailureSender) -> Self {
        Self {
            name: name.into(),
            cancel,
            failures,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once a termination request was issued for this worker.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn report_failure(&self, error: &anyhow::Error) {
        self.failures.report(FailureReport::from_error(&self.name, error));
    }
}

/// One supervised worker. Owned and mutated only by the supervisor.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    alive: bool,
    last_checked: Instant,
    exit: Option<ExitReason>,
    cancel: CancellationToken,
    task: Option<JoinHandle<WorkerResult>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// When liveness was last confirmed.
    pub fn last_checked(&self) -> Instant {
        self.last_checked
    }

    pub fn exit_reason(&self) -> Option<&ExitReason> {
        self.exit.as_ref()
    }

    fn mark_exited(&mut self, reason: ExitReason) {
        self.alive = false;
        self.task = None;
        self.exit = Some(reason);
    }
}

/// Outcome of a supervised run.
#[derive(Debug)]
pub struct SupervisorReport {
    pub cause: ShutdownCause,
    pub failures: Vec<FailureReport>,
    pub exits: Vec<(String, ExitReason)>,
}

impl SupervisorReport {
    /// Zero for an operator interrupt or a clean end of input, one when any
    /// worker failed.
    pub fn exit_code(&self) -> i32 {
        match self.cause {
            ShutdownCause::Interrupt => 0,
            ShutdownCause::Failure => 1,
            ShutdownCause::WorkerExited(_) if self.failures.is_empty() => 0,
            ShutdownCause::WorkerExited(_) => 1,
        }
    }

    pub fn exit_reason(&self, worker: &str) -> Option<&ExitReason> {
        self.exits
            .iter()
            .find(|(name, _)| name == worker)
            .map(|(_, reason)| reason)
    }
}

pub struct Supervisor {
    config: SupervisorConfig,
    state: SupervisorState,
    workers: Vec<WorkerHandle>,
    failures_tx: FailureSender,
    failures_rx: FailureReceiver,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let (failures_tx, failures_rx) = failure_channel(FAILURE_CHANNEL_CAPACITY);
        Self {
            config,
            state: SupervisorState::Starting,
            workers: Vec::new(),
            failures_tx,
            failures_rx,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    /// Start a worker. Workers start in the order they are spawned.
    ///
    /// An `Err` returned by the worker is turned into a failure report before
    /// the task finishes.
    pub fn spawn<F, Fut>(&mut self, name: &str, worker: F)
    where
        F: FnOnce(WorkerContext) -> Fut,
        Fut: Future<Output = WorkerResult> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let ctx = WorkerContext::new(name, cancel.clone(), self.failures_tx.clone());
        let reporter = ctx.clone();
        let work = worker(ctx);

        let task = tokio::spawn(async move {
            let result = work.await;
            if let Err(e) = &result {
                error!("Worker '{}' failed: {:#}", reporter.name(), e);
                reporter.report_failure(e);
            }
            result
        });

        info!("Started worker '{}'", name);
        self.workers.push(WorkerHandle {
            name: name.to_string(),
            alive: true,
            last_checked: Instant::now(),
            exit: None,
            cancel,
            task: Some(task),
        });
    }

    /// Supervise until the first exit, failure or interrupt, then shut every
    /// worker down.
    pub async fn run(mut self, mut interrupts: mpsc::Receiver<()>) -> SupervisorReport {
        self.state = SupervisorState::Running;
        info!("Supervising {} workers", self.workers.len());

        // a zero period would panic inside tokio
        let mut ticker = tokio::time::interval(self.config.poll_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let cause = loop {
            tokio::select! {
                Some(()) = interrupts.recv() => {
                    info!("Interrupt received, cleaning up...");
                    break ShutdownCause::Interrupt;
                }
                _ = ticker.tick() => {
                    if let Some(cause) = self.poll_liveness().await {
                        break cause;
                    }
                }
            }
        };

        self.shutdown(&cause).await;

        let mut ignored = 0;
        while interrupts.try_recv().is_ok() {
            ignored += 1;
        }
        if ignored > 0 {
            info!("Ignored {} interrupt(s) received during shutdown", ignored);
        }

        self.state = SupervisorState::Stopped;
        let failures = self.failures_rx.drain();
        for failure in &failures {
            error!("{}", failure);
        }

        let exits = self
            .workers
            .iter()
            .map(|w| (w.name.clone(), w.exit.clone().unwrap_or(ExitReason::Completed)))
            .collect();

        SupervisorReport {
            cause,
            failures,
            exits,
        }
    }

    async fn poll_liveness(&mut self) -> Option<ShutdownCause> {
        let now = Instant::now();
        let mut first_exited = None;

        for worker in self.workers.iter_mut().filter(|w| w.alive) {
            let finished = worker.task.as_ref().map_or(true, |task| task.is_finished());
            if !finished {
                worker.last_checked = now;
                continue;
            }

            let reason = match worker.task.take() {
                Some(task) => exit_reason(task.await, false),
                None => ExitReason::Completed,
            };
            if let ExitReason::Panicked(message) = &reason {
                self.failures_tx.report(FailureReport::new(
                    worker.name.clone(),
                    format!("panicked: {}", message),
                ));
            }

            warn!("Worker '{}' is no longer alive ({:?})", worker.name, reason);
            worker.mark_exited(reason);
            first_exited.get_or_insert_with(|| worker.name.clone());
        }

        if self.failures_rx.has_pending() {
            return Some(ShutdownCause::Failure);
        }
        first_exited.map(ShutdownCause::WorkerExited)
    }

    async fn shutdown(&mut self, cause: &ShutdownCause) {
        self.state = SupervisorState::ShuttingDown;
        info!("Shutting down ({:?})", cause);

        // Phase one: every live worker is asked to stop before anyone is killed
        for worker in self.workers.iter().filter(|w| w.alive) {
            debug!("Requesting termination of worker '{}'", worker.name);
            worker.cancel.cancel();
        }

        let deadline = tokio::time::Instant::now() + self.config.termination_timeout;
        for worker in self.workers.iter_mut().filter(|w| w.alive) {
            let Some(task) = worker.task.as_mut() else {
                worker.mark_exited(ExitReason::Terminated);
                continue;
            };
            if let Ok(result) = tokio::time::timeout_at(deadline, task).await {
                let reason = exit_reason(result, true);
                debug!("Worker '{}' exited ({:?})", worker.name, reason);
                worker.mark_exited(reason);
            }
        }

        // Phase two: force the stragglers
        for worker in self.workers.iter_mut().filter(|w| w.alive) {
            warn!(
                "Worker '{}' did not exit within {:?}, killing",
                worker.name, self.config.termination_timeout
            );
            let Some(mut task) = worker.task.take() else {
                worker.mark_exited(ExitReason::Killed);
                continue;
            };
            task.abort();

            let reason = match tokio::time::timeout(self.config.kill_timeout, &mut task).await {
                Ok(Err(e)) if e.is_cancelled() => ExitReason::Killed,
                Ok(result) => exit_reason(result, true),
                Err(_) => {
                    error!("Worker '{}' is unresponsive even after abort", worker.name);
                    ExitReason::Unresponsive
                }
            };
            worker.mark_exited(reason);
        }

        info!("All workers stopped");
    }
}

fn exit_reason(
    result: Result<WorkerResult, tokio::task::JoinError>,
    terminating: bool,
) -> ExitReason {
    match result {
        Ok(Ok(())) if terminating => ExitReason::Terminated,
        Ok(Ok(())) => ExitReason::Completed,
        Ok(Err(e)) => ExitReason::Failed(format!("{:#}", e)),
        Err(e) if e.is_panic() => ExitReason::Panicked(panic_message(e.into_panic())),
        Err(_) => ExitReason::Killed,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Interrupts from Ctrl+C and, on Unix, SIGTERM.
pub fn interrupt_channel() -> mpsc::Receiver<()> {
    let (tx, rx) = mpsc::channel(8);

    let ctrl_c_tx = tx.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if ctrl_c_tx.send(()).await.is_err() {
                break;
            }
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                warn!("Could not install SIGTERM handler: {}", e);
                return;
            }
        };
        while sigterm.recv().await.is_some() {
            if tx.send(()).await.is_err() {
                break;
            }
        }
    });

    #[cfg(not(unix))]
    drop(tx);

    rx
}
