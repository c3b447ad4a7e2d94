// ABOUTME: Transport boundary to the provisioning engine
// ABOUTME: EngineApi is implemented over HTTP by RemoteClient and by a scripted fake in tests

pub mod client;
pub mod models;
pub mod ndjson;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::CliError;
use models::{
    DeleteResponse, Health, Instance, JobEvent, PrepareAccepted, PrepareJob, PrepareRequest,
    RunEvent, RunRequest,
};

pub use client::RemoteClient;

/// Decoded NDJSON events in arrival order.
pub type EventStream<T> = BoxStream<'static, Result<T, CliError>>;

/// Operations the client needs from the engine. Non-2xx replies are
/// `CliError::Remote`, except deletes answered with 409.
#[async_trait]
pub trait EngineApi: Send + Sync {
    async fn submit_prepare(&self, request: &PrepareRequest) -> Result<PrepareAccepted, CliError>;

    async fn get_job(&self, status_url: &str) -> Result<PrepareJob, CliError>;

    async fn open_events(&self, events_url: &str) -> Result<EventStream<JobEvent>, CliError>;

    async fn start_run(&self, request: &RunRequest) -> Result<EventStream<RunEvent>, CliError>;

    async fn list_instances(&self) -> Result<Vec<Instance>, CliError>;

    async fn delete_instance(&self, instance_id: &str) -> Result<DeleteResponse, CliError>;

    async fn health(&self) -> Result<Health, CliError>;

    /// Status and events URLs for an already submitted job.
    fn job_urls(&self, job_id: &str) -> Result<PrepareAccepted, CliError>;
}
