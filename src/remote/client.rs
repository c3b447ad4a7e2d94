// ABOUTME: HTTP client for the provisioning engine API
// ABOUTME: Handles job submission, status fetches, event streams, runs, and instance teardown

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::debug;

use super::models::{
    DeleteResponse, DeleteResult, Health, Instance, JobEvent, PrepareAccepted, PrepareJob,
    PrepareRequest, RunEvent, RunRequest,
};
use super::ndjson::decode_lines;
use super::{EngineApi, EventStream};
use crate::config::ExecutionContext;
use crate::error::CliError;

const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

pub struct RemoteClient {
    client: Client,
    api_base_url: String,
    auth_token: Option<String>,
    request_timeout: Duration,
}

/// Error body the engine sends with non-2xx replies.
#[derive(Deserialize)]
struct ErrorBody {
    message: String,
    details: Option<String>,
}

impl RemoteClient {
    pub fn new(ctx: &ExecutionContext) -> anyhow::Result<Self> {
        // No client-wide timeout: event and run streams stay open for as long
        // as the job runs. Unary calls set a per-request timeout instead.
        let client = Client::builder()
            .connect_timeout(ctx.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_base_url: ctx.endpoint.clone(),
            auth_token: ctx.auth_token.clone(),
            request_timeout: ctx.request_timeout,
        })
    }

    /// Waits for the engine's health endpoint to answer `ok`. Gives up once
    /// `startup_timeout` has passed, even in the middle of a health request.
    pub async fn wait_ready(&self, startup_timeout: Duration) -> Result<(), CliError> {
        let deadline = Instant::now() + startup_timeout;
        loop {
            match timeout_at(deadline, self.health()).await {
                Ok(Ok(health)) if health.ok => return Ok(()),
                Ok(Ok(_)) => debug!("Engine at {} reports not ready", self.api_base_url),
                Ok(Err(e)) => debug!("Engine at {} not reachable yet: {}", self.api_base_url, e),
                Err(_) => break,
            }
            if Instant::now() >= deadline {
                break;
            }
            sleep_until((Instant::now() + READY_POLL_INTERVAL).min(deadline)).await;
        }
        Err(CliError::remote(format!(
            "engine at {} did not become ready within {:?}. Is the engine running?",
            self.api_base_url, startup_timeout
        )))
    }

    fn api_url(&self, segments: &[&str]) -> Result<Url, CliError> {
        let mut url = Url::parse(&self.api_base_url)
            .map_err(|e| CliError::Config(format!("invalid endpoint {}: {}", self.api_base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| CliError::Config(format!("endpoint {} cannot be a base URL", self.api_base_url)))?
            .pop_if_empty()
            .push("v1")
            .extend(segments);
        Ok(url)
    }

    /// Status/events URLs may come back relative to the endpoint.
    fn absolute(&self, url: &str) -> Result<Url, CliError> {
        let base = Url::parse(&format!("{}/", self.api_base_url))
            .map_err(|e| CliError::Config(format!("invalid endpoint {}: {}", self.api_base_url, e)))?;
        base.join(url)
            .map_err(|e| CliError::remote(format!("engine returned invalid URL {}: {}", url, e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.auth_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn unary(&self, method: Method, url: Url) -> RequestBuilder {
        self.request(method, url).timeout(self.request_timeout)
    }
}

async fn ensure_success(response: Response, action: &str) -> Result<Response, CliError> {
    if response.status().is_success() {
        return Ok(response);
    }
    Err(error_from(response, action).await)
}

async fn error_from(response: Response, action: &str) -> CliError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let detail = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody {
            message,
            details: Some(details),
        }) => format!("{}: {}", message, details),
        Ok(ErrorBody { message, .. }) => message,
        Err(_) if body.trim().is_empty() => status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string(),
        Err(_) => body.trim().to_string(),
    };
    CliError::remote_status(status.as_u16(), format!("{} failed: {}", action, detail))
}

#[async_trait]
impl EngineApi for RemoteClient {
    async fn submit_prepare(&self, request: &PrepareRequest) -> Result<PrepareAccepted, CliError> {
        let url = self.api_url(&["prepare-jobs"])?;
        let response = self.unary(Method::POST, url).json(request).send().await?;
        let response = ensure_success(response, "Prepare job submission").await?;
        Ok(response.json().await?)
    }

    async fn get_job(&self, status_url: &str) -> Result<PrepareJob, CliError> {
        let url = self.absolute(status_url)?;
        let response = self.unary(Method::GET, url).send().await?;
        let response = ensure_success(response, "Fetching job status").await?;
        Ok(response.json().await?)
    }

    async fn open_events(&self, events_url: &str) -> Result<EventStream<JobEvent>, CliError> {
        let url = self.absolute(events_url)?;
        let response = self
            .request(Method::GET, url)
            .header(reqwest::header::ACCEPT, "application/x-ndjson")
            .send()
            .await?;
        let response = ensure_success(response, "Opening job events").await?;
        Ok(decode_lines(response.bytes_stream()))
    }

    async fn start_run(&self, request: &RunRequest) -> Result<EventStream<RunEvent>, CliError> {
        let url = self.api_url(&["runs"])?;
        let response = self.request(Method::POST, url).json(request).send().await?;
        let response = ensure_success(response, "Starting run").await?;
        Ok(decode_lines(response.bytes_stream()))
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, CliError> {
        let url = self.api_url(&["instances"])?;
        let response = self.unary(Method::GET, url).send().await?;
        let response = ensure_success(response, "Listing instances").await?;
        Ok(response.json().await?)
    }

    async fn delete_instance(&self, instance_id: &str) -> Result<DeleteResponse, CliError> {
        let url = self.api_url(&["instances", instance_id])?;
        let response = self.unary(Method::DELETE, url).send().await?;
        let status = response.status();
        if status != StatusCode::CONFLICT && !status.is_success() {
            return Err(error_from(response, "Deleting instance").await);
        }
        let body = response.text().await?;
        let result = if body.trim().is_empty() {
            None
        } else {
            Some(serde_json::from_str::<DeleteResult>(&body)?)
        };
        Ok(DeleteResponse {
            http_status: status.as_u16(),
            result,
        })
    }

    async fn health(&self) -> Result<Health, CliError> {
        let url = self.api_url(&["health"])?;
        let response = self.unary(Method::GET, url).send().await?;
        let response = ensure_success(response, "Health check").await?;
        Ok(response.json().await?)
    }

    fn job_urls(&self, job_id: &str) -> Result<PrepareAccepted, CliError> {
        Ok(PrepareAccepted {
            job_id: job_id.to_string(),
            status_url: self.api_url(&["prepare-jobs", job_id])?.to_string(),
            events_url: self.api_url(&["prepare-jobs", job_id, "events"])?.to_string(),
        })
    }
}
