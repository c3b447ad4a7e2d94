// ABOUTME: Prepare job lifecycle: submit, then observe to a terminal state
// ABOUTME: Event stream first, status polling as fallback, detached outcome on timeout

use std::future::Future;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, info};

use crate::config::ExecutionContext;
use crate::console::Console;
use crate::error::CliError;
use crate::remote::models::{
    JobError, JobEvent, JobStatus, PrepareAccepted, PrepareJob, PrepareRequest, PrepareResult,
};
use crate::remote::EngineApi;

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct WatchOptions {
    /// Give up watching (detach) after this long. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
    /// Longest silence tolerated on the event stream before falling back to
    /// polling. Also bounds opening the stream.
    pub idle_timeout: Duration,
    /// Echo job log events to stderr.
    pub echo_logs: bool,
}

impl WatchOptions {
    pub fn from_context(ctx: &ExecutionContext) -> Self {
        Self {
            timeout: ctx.watch_timeout,
            poll_interval: POLL_INTERVAL,
            idle_timeout: ctx.request_timeout,
            echo_logs: ctx.verbose,
        }
    }
}

/// How a watch ended, short of the job failing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Succeeded(PrepareResult),
    /// The job is still pending or running server-side.
    Detached(PrepareAccepted),
}

/// A terminal observation from either the event stream or a status fetch.
struct Terminal {
    status: JobStatus,
    result: Option<PrepareResult>,
    error: Option<JobError>,
}

impl From<PrepareJob> for Terminal {
    fn from(job: PrepareJob) -> Self {
        Self {
            status: job.status,
            result: job.result,
            error: job.error,
        }
    }
}

enum StreamEnd {
    Terminal(Terminal),
    /// Stream unavailable or ended before a terminal status.
    Inconclusive,
    TimedOut,
}

struct Deadline(Option<Instant>);

impl Deadline {
    fn after(timeout: Option<Duration>) -> Self {
        Deadline(timeout.map(|t| Instant::now() + t))
    }

    fn expired(&self) -> bool {
        matches!(self.0, Some(at) if Instant::now() >= at)
    }

    /// Runs `fut` to completion unless the deadline passes first.
    async fn run<F: Future>(&self, fut: F) -> Option<F::Output> {
        match self.0 {
            Some(at) => timeout_at(at, fut).await.ok(),
            None => Some(fut.await),
        }
    }
}

pub struct PrepareJobClient<'a> {
    api: &'a dyn EngineApi,
    console: &'a Console,
    options: WatchOptions,
}

impl<'a> PrepareJobClient<'a> {
    pub fn new(api: &'a dyn EngineApi, console: &'a Console, options: WatchOptions) -> Self {
        Self {
            api,
            console,
            options,
        }
    }

    pub async fn submit(&self, request: &PrepareRequest) -> Result<PrepareAccepted, CliError> {
        let accepted = self.api.submit_prepare(request).await?;
        info!(
            "Submitted prepare:{} job {} on image {}",
            request.prepare_kind, accepted.job_id, request.image_id
        );
        Ok(accepted)
    }

    /// Submits and watches. Job failure is `CliError::JobFailed`.
    pub async fn run(&self, request: &PrepareRequest) -> Result<WatchOutcome, CliError> {
        let accepted = self.submit(request).await?;
        self.watch(&accepted).await
    }

    /// Observes an already submitted job until it is terminal or the watch
    /// timeout passes.
    pub async fn watch(&self, job: &PrepareAccepted) -> Result<WatchOutcome, CliError> {
        let deadline = Deadline::after(self.options.timeout);

        match self.follow_events(job, &deadline).await {
            StreamEnd::Terminal(terminal) => return self.finish(job, terminal).await,
            StreamEnd::TimedOut => return Ok(self.detach(job)),
            StreamEnd::Inconclusive => {}
        }

        // The stream is not reopened once polling starts.
        loop {
            if deadline.expired() {
                return Ok(self.detach(job));
            }
            let current = match deadline.run(self.api.get_job(&job.status_url)).await {
                Some(current) => current?,
                None => return Ok(self.detach(job)),
            };
            debug!("Job {} polled: {}", job.job_id, current.status.as_str());
            if current.status.is_terminal() {
                return self.finish(job, current.into()).await;
            }
            if deadline.run(sleep(self.options.poll_interval)).await.is_none() {
                return Ok(self.detach(job));
            }
        }
    }

    async fn follow_events(&self, job: &PrepareAccepted, deadline: &Deadline) -> StreamEnd {
        let idle = self.options.idle_timeout;
        let opened = deadline
            .run(timeout(idle, self.api.open_events(&job.events_url)))
            .await;
        let mut events = match opened {
            None => return StreamEnd::TimedOut,
            Some(Err(_)) => {
                debug!("Event stream for job {} did not open within {:?}; polling", job.job_id, idle);
                return StreamEnd::Inconclusive;
            }
            Some(Ok(Err(e))) => {
                debug!("Event stream for job {} unavailable ({}); polling", job.job_id, e);
                return StreamEnd::Inconclusive;
            }
            Some(Ok(Ok(events))) => events,
        };

        loop {
            let event = match deadline.run(timeout(idle, events.next())).await {
                None => return StreamEnd::TimedOut,
                Some(Err(_)) => {
                    debug!("Event stream for job {} silent for {:?}; polling", job.job_id, idle);
                    return StreamEnd::Inconclusive;
                }
                Some(Ok(None)) => {
                    debug!("Event stream for job {} ended before completion; polling", job.job_id);
                    return StreamEnd::Inconclusive;
                }
                Some(Ok(Some(Err(e)))) => {
                    debug!("Skipping unreadable event for job {}: {}", job.job_id, e);
                    continue;
                }
                Some(Ok(Some(Ok(event)))) => event,
            };

            match event.kind.as_str() {
                "status" => {
                    let Some(status) = event.status else { continue };
                    debug!(
                        "Job {} status {} at {}",
                        job.job_id,
                        status.as_str(),
                        event.ts.as_deref().unwrap_or("-")
                    );
                    if status.is_terminal() {
                        return StreamEnd::Terminal(Terminal {
                            status,
                            result: event.result,
                            error: event.error,
                        });
                    }
                }
                "log" => self.log_event(&job.job_id, &event),
                other => debug!("Ignoring {} event for job {}", other, job.job_id),
            }
        }
    }

    fn log_event(&self, job_id: &str, event: &JobEvent) {
        let message = event.message.as_deref().unwrap_or_default();
        debug!("[{}] {}", job_id, message);
        if self.options.echo_logs {
            self.console.err_line(format_args!(
                "{} {}",
                event.ts.as_deref().unwrap_or("-"),
                message
            ));
        }
    }

    async fn finish(&self, job: &PrepareAccepted, terminal: Terminal) -> Result<WatchOutcome, CliError> {
        match terminal.status {
            JobStatus::Succeeded => {
                let result = match terminal.result {
                    Some(result) => result,
                    None => self.api.get_job(&job.status_url).await?.result.ok_or_else(|| {
                        CliError::remote(format!("job {} succeeded without a result", job.job_id))
                    })?,
                };
                info!("Job {} succeeded: instance {}", job.job_id, result.instance_id);
                Ok(WatchOutcome::Succeeded(result))
            }
            JobStatus::Failed => {
                let error = match terminal.error {
                    Some(error) => Some(error),
                    None => self.api.get_job(&job.status_url).await?.error,
                };
                let (message, details) = match error {
                    Some(JobError { message, details }) => (message, details),
                    None => ("no error reported by the engine".to_string(), None),
                };
                Err(CliError::JobFailed {
                    job_id: job.job_id.clone(),
                    message,
                    details,
                })
            }
            other => Err(CliError::remote(format!(
                "job {} reported non-terminal status {} as final",
                job.job_id,
                other.as_str()
            ))),
        }
    }

    fn detach(&self, job: &PrepareAccepted) -> WatchOutcome {
        info!("Stopped watching job {} before completion", job.job_id);
        WatchOutcome::Detached(job.clone())
    }
}

pub fn print_result(console: &Console, result: &PrepareResult) {
    console.out_line(format_args!("dsn: {}", result.dsn));
    console.out_line(format_args!("instance_id: {}", result.instance_id));
    console.out_line(format_args!("state_id: {}", result.state_id));
    console.out_line(format_args!("image_id: {}", result.image_id));
}

/// Follow-up instructions for a job left running, either by `--no-watch` or
/// by a watch timeout.
pub fn print_detached(console: &Console, job: &PrepareAccepted) {
    console.out_line(format_args!("Job {} is still running.", job.job_id));
    console.out_line(format_args!("  status: {}", job.status_url));
    console.out_line(format_args!("  events: {}", job.events_url));
    console.out_line(format_args!("Re-attach with: sqlrs watch {}", job.job_id));
}

/// `sqlrs watch <job-id>`.
pub async fn watch_job(
    api: &dyn EngineApi,
    console: &Console,
    options: WatchOptions,
    job_id: &str,
) -> Result<i32, CliError> {
    if job_id.trim().is_empty() {
        return Err(CliError::Usage("watch needs a job id".to_string()));
    }
    let job = api.job_urls(job_id)?;
    match PrepareJobClient::new(api, console, options).watch(&job).await? {
        WatchOutcome::Succeeded(result) => print_result(console, &result),
        WatchOutcome::Detached(job) => print_detached(console, &job),
    }
    Ok(0)
}
