// ABOUTME: Deferred teardown of instances handed from a prepare step to a run step
// ABOUTME: Best-effort delete with a delayed spinner; failures become warnings, never errors

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::console::Console;
use crate::error::CliError;
use crate::remote::models::DeleteResponse;
use crate::remote::EngineApi;

/// No spinner for deletes that finish faster than this.
pub const PROGRESS_GRACE: Duration = Duration::from_millis(300);
const TICK_INTERVAL: Duration = Duration::from_millis(100);
const CONFLICT: u16 = 409;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Deleted,
    Blocked {
        reason: Option<String>,
        connections: Option<u32>,
    },
    Failed(String),
}

/// Sorts a delete reply: 409 or an outcome of "blocked" (any case) means the
/// engine refused because the instance is in use.
pub fn classify_delete(reply: Result<DeleteResponse, CliError>) -> CleanupOutcome {
    match reply {
        Ok(response) => {
            let blocked_outcome = response
                .result
                .as_ref()
                .map(|r| r.outcome.eq_ignore_ascii_case("blocked"))
                .unwrap_or(false);
            if response.http_status == CONFLICT || blocked_outcome {
                let root = response.result.map(|r| r.root);
                CleanupOutcome::Blocked {
                    reason: root.as_ref().and_then(|n| n.blocked.clone()),
                    connections: root.and_then(|n| n.connections),
                }
            } else {
                CleanupOutcome::Deleted
            }
        }
        Err(CliError::Remote {
            status: Some(CONFLICT),
            message,
        }) => CleanupOutcome::Blocked {
            reason: Some(message),
            connections: None,
        },
        Err(e) => CleanupOutcome::Failed(e.to_string()),
    }
}

/// Writes at most one stderr line describing a cleanup that did not delete.
pub fn report_cleanup(console: &Console, instance_id: &str, outcome: &CleanupOutcome) {
    match outcome {
        CleanupOutcome::Deleted => debug!("Deleted instance {}", instance_id),
        CleanupOutcome::Blocked {
            reason,
            connections,
        } => {
            let connections = connections
                .map(|n| format!(" ({} active connection(s))", n))
                .unwrap_or_default();
            console.err_line(format_args!(
                "warning: cleanup of instance {} blocked: {}{}",
                instance_id,
                reason.as_deref().unwrap_or("instance is in use"),
                connections
            ));
        }
        CleanupOutcome::Failed(message) => console.err_line(format_args!(
            "warning: cleanup of instance {} failed: {}. Remove it later with `sqlrs rm {}`",
            instance_id, message, instance_id
        )),
    }
}

/// An instance produced by a prepare step for the next run step. Must be
/// released exactly once; a handoff dropped unreleased is reported.
#[must_use = "a handed-off instance must be released"]
pub struct PreparedHandoff {
    instance_id: String,
    released: bool,
}

impl PreparedHandoff {
    pub fn new(instance_id: String) -> Self {
        Self {
            instance_id,
            released: false,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Deletes the instance, reporting blocked or failed deletes as warnings.
    pub async fn release(
        mut self,
        api: &dyn EngineApi,
        console: &Console,
        verbose: bool,
    ) -> CleanupOutcome {
        let label = format!("Deleting instance {}", self.instance_id);
        let delete = api.delete_instance(&self.instance_id);
        let reply = with_progress(console, verbose, &label, PROGRESS_GRACE, delete).await;
        self.released = true;
        let outcome = classify_delete(reply);
        report_cleanup(console, &self.instance_id, &outcome);
        outcome
    }
}

impl Drop for PreparedHandoff {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                "Instance {} was not cleaned up; remove it with `sqlrs rm {}`",
                self.instance_id, self.instance_id
            );
        }
    }
}

/// Runs `step`, then releases `handoff` whatever the step's outcome (error
/// or panic included). The step's result is returned untouched.
pub async fn run_with_cleanup<F>(
    handoff: PreparedHandoff,
    api: &dyn EngineApi,
    console: &Console,
    verbose: bool,
    step: F,
) -> Result<i32, CliError>
where
    F: Future<Output = Result<i32, CliError>>,
{
    let outcome = AssertUnwindSafe(step).catch_unwind().await;
    handoff.release(api, console, verbose).await;
    match outcome {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// Awaits `fut` while showing progress: a spinner on an interactive
/// terminal, otherwise a single static line.
pub async fn with_progress<F: Future>(
    console: &Console,
    verbose: bool,
    label: &str,
    grace: Duration,
    fut: F,
) -> F::Output {
    if verbose || !console.is_interactive() {
        console.err_line(format_args!("{}...", label));
        return fut.await;
    }

    let indicator = ProgressIndicator::start(label.to_string(), grace);
    let output = fut.await;
    let painted = indicator.stop().await;
    debug!("{} finished (spinner shown: {})", label, painted);
    output
}

/// Background spinner coordinated by two one-shot channels: `done` from the
/// caller, `painted` from the task once it first draws. The guard owns the
/// bar, so the line is erased before `stop` returns or `drop` finishes.
pub struct ProgressIndicator {
    done: Option<oneshot::Sender<()>>,
    painted: oneshot::Receiver<()>,
    bar: ProgressBar,
    task: Option<JoinHandle<()>>,
}

impl ProgressIndicator {
    pub fn start(label: String, grace: Duration) -> Self {
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template("{msg} {spinner}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("|/-\\ ");
        bar.set_style(style);
        bar.set_message(label);

        let (done_tx, done_rx) = oneshot::channel();
        let (painted_tx, painted_rx) = oneshot::channel();
        let task = tokio::spawn(animate(bar.clone(), grace, done_rx, painted_tx));
        Self {
            done: Some(done_tx),
            painted: painted_rx,
            bar,
            task: Some(task),
        }
    }

    /// Signals completion and waits until the spinner line is erased.
    /// Returns whether the spinner was ever drawn.
    pub async fn stop(mut self) -> bool {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                debug!("Progress indicator task ended abnormally: {}", e);
            }
        }
        self.bar.finish_and_clear();
        self.painted.try_recv().is_ok()
    }
}

impl Drop for ProgressIndicator {
    fn drop(&mut self) {
        // Cancelled before `stop`: the task may never run again, so erase here.
        if let Some(task) = self.task.take() {
            self.done.take();
            task.abort();
            self.bar.finish_and_clear();
        }
    }
}

async fn animate(
    bar: ProgressBar,
    grace: Duration,
    mut done: oneshot::Receiver<()>,
    painted: oneshot::Sender<()>,
) {
    tokio::select! {
        _ = &mut done => return,
        _ = tokio::time::sleep(grace) => {}
    }

    bar.tick();
    let _ = painted.send(());

    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    loop {
        tokio::select! {
            _ = &mut done => break,
            _ = ticker.tick() => bar.tick(),
        }
    }
}
