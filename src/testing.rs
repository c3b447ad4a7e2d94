// ABOUTME: Scripted in-memory EngineApi used by unit tests
// ABOUTME: Records every call so tests can assert on ordering and on calls that never happened

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::error::CliError;
use crate::remote::models::{
    DeleteNode, DeleteResponse, DeleteResult, Health, Instance, JobError, JobEvent, JobStatus,
    PrepareAccepted, PrepareJob, PrepareRequest, PrepareResult, RunEvent, RunRequest,
};
use crate::remote::{EngineApi, EventStream};

pub enum EventScript {
    /// Opening the stream fails.
    Unavailable,
    /// Yields the events, then ends.
    Finite(Vec<JobEvent>),
    /// Yields the events, then stays open without sending anything.
    Hang(Vec<JobEvent>),
}

pub struct FakeEngine {
    accepted: PrepareAccepted,
    submit_error: Mutex<Option<CliError>>,
    events: Mutex<Option<EventScript>>,
    polls: Mutex<VecDeque<PrepareJob>>,
    run_events: Mutex<Vec<RunEvent>>,
    delete: Mutex<Option<Result<DeleteResponse, CliError>>>,
    instances: Vec<Instance>,
    calls: Mutex<Vec<String>>,
    submitted: Mutex<Vec<PrepareRequest>>,
    runs: Mutex<Vec<RunRequest>>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            accepted: urls("job-1"),
            submit_error: Mutex::new(None),
            events: Mutex::new(Some(EventScript::Unavailable)),
            polls: Mutex::new(VecDeque::new()),
            run_events: Mutex::new(vec![RunEvent::Exit { exit_code: 0 }]),
            delete: Mutex::new(Some(Ok(deleted()))),
            instances: Vec::new(),
            calls: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_events(self, script: EventScript) -> Self {
        *self.events.lock().unwrap() = Some(script);
        self
    }

    /// Status replies in order; the last one repeats.
    pub fn with_polls(self, jobs: Vec<PrepareJob>) -> Self {
        *self.polls.lock().unwrap() = jobs.into();
        self
    }

    pub fn with_run(self, events: Vec<RunEvent>) -> Self {
        *self.run_events.lock().unwrap() = events;
        self
    }

    pub fn with_delete(self, reply: Result<DeleteResponse, CliError>) -> Self {
        *self.delete.lock().unwrap() = Some(reply);
        self
    }

    pub fn with_instances(mut self, instances: Vec<Instance>) -> Self {
        self.instances = instances;
        self
    }

    pub fn failing_submit(self, err: CliError) -> Self {
        *self.submit_error.lock().unwrap() = Some(err);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn submitted(&self) -> Vec<PrepareRequest> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn runs(&self) -> Vec<RunRequest> {
        self.runs.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl EngineApi for FakeEngine {
    async fn submit_prepare(&self, request: &PrepareRequest) -> Result<PrepareAccepted, CliError> {
        self.record("submit");
        self.submitted.lock().unwrap().push(request.clone());
        match self.submit_error.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(self.accepted.clone()),
        }
    }

    async fn get_job(&self, _status_url: &str) -> Result<PrepareJob, CliError> {
        self.record("get_job");
        let mut polls = self.polls.lock().unwrap();
        match polls.len() {
            0 => Err(CliError::remote("no scripted job status")),
            1 => Ok(polls[0].clone()),
            _ => Ok(polls.pop_front().unwrap()),
        }
    }

    async fn open_events(&self, _events_url: &str) -> Result<EventStream<JobEvent>, CliError> {
        self.record("events");
        let script = self.events.lock().unwrap().take();
        match script {
            None | Some(EventScript::Unavailable) => {
                Err(CliError::remote_status(404, "events not available"))
            }
            Some(EventScript::Finite(events)) => Ok(stream::iter(events.into_iter().map(Ok)).boxed()),
            Some(EventScript::Hang(events)) => Ok(stream::iter(events.into_iter().map(Ok))
                .chain(stream::pending())
                .boxed()),
        }
    }

    async fn start_run(&self, request: &RunRequest) -> Result<EventStream<RunEvent>, CliError> {
        self.record("run");
        self.runs.lock().unwrap().push(request.clone());
        let events = self.run_events.lock().unwrap().clone();
        Ok(stream::iter(events.into_iter().map(Ok)).boxed())
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, CliError> {
        self.record("list");
        Ok(self.instances.clone())
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<DeleteResponse, CliError> {
        self.record(format!("delete:{}", instance_id));
        self.delete
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| Err(CliError::remote("delete already consumed")))
    }

    async fn health(&self) -> Result<Health, CliError> {
        self.record("health");
        Ok(Health {
            ok: true,
            version: Some("test".to_string()),
        })
    }

    fn job_urls(&self, job_id: &str) -> Result<PrepareAccepted, CliError> {
        Ok(urls(job_id))
    }
}

pub fn urls(job_id: &str) -> PrepareAccepted {
    PrepareAccepted {
        job_id: job_id.to_string(),
        status_url: format!("http://engine/v1/prepare-jobs/{}", job_id),
        events_url: format!("http://engine/v1/prepare-jobs/{}/events", job_id),
    }
}

pub fn sample_result() -> PrepareResult {
    PrepareResult {
        dsn: "postgres://sqlrs@127.0.0.1:55432/postgres".to_string(),
        instance_id: "inst-1".to_string(),
        state_id: "state-1".to_string(),
        image_id: "postgres:16".to_string(),
        prepare_kind: "psql".to_string(),
        prepare_args_normalized: "-f /ws/init.sql".to_string(),
    }
}

pub fn job(status: JobStatus) -> PrepareJob {
    PrepareJob {
        job_id: "job-1".to_string(),
        status,
        result: (status == JobStatus::Succeeded).then(sample_result),
        error: (status == JobStatus::Failed).then(|| JobError {
            message: "snapshot failed".to_string(),
            details: Some("disk full".to_string()),
        }),
    }
}

pub fn status_event(status: JobStatus) -> JobEvent {
    JobEvent {
        kind: "status".to_string(),
        ts: Some("2026-10-15T12:00:00Z".to_string()),
        status: Some(status),
        message: None,
        result: None,
        error: None,
    }
}

pub fn log_event(message: &str) -> JobEvent {
    JobEvent {
        kind: "log".to_string(),
        ts: Some("2026-10-15T12:00:00Z".to_string()),
        status: None,
        message: Some(message.to_string()),
        result: None,
        error: None,
    }
}

pub fn deleted() -> DeleteResponse {
    DeleteResponse {
        http_status: 200,
        result: Some(DeleteResult {
            outcome: "deleted".to_string(),
            root: DeleteNode {
                kind: Some("instance".to_string()),
                id: Some("inst-1".to_string()),
                blocked: None,
                connections: None,
            },
        }),
    }
}

pub fn blocked(http_status: u16, connections: Option<u32>) -> DeleteResponse {
    DeleteResponse {
        http_status,
        result: Some(DeleteResult {
            outcome: "Blocked".to_string(),
            root: DeleteNode {
                kind: Some("instance".to_string()),
                id: Some("inst-1".to_string()),
                blocked: Some("active connections".to_string()),
                connections,
            },
        }),
    }
}
