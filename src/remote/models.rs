// ABOUTME: Wire types for the provisioning engine HTTP API
// ABOUTME: Serialized to and from JSON request/response bodies and NDJSON event lines

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PrepareRequest {
    pub prepare_kind: String, // "psql" or "lb"
    pub image_id: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
}

/// Reply to a prepare submission (HTTP 202).
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PrepareAccepted {
    pub job_id: String,
    pub status_url: String,
    pub events_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PrepareJob {
    pub job_id: String,
    pub status: JobStatus,
    pub result: Option<PrepareResult>,
    pub error: Option<JobError>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PrepareResult {
    pub dsn: String,
    pub instance_id: String,
    pub state_id: String,
    pub image_id: String,
    pub prepare_kind: String,
    pub prepare_args_normalized: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct JobError {
    pub message: String,
    pub details: Option<String>,
}

/// One line of a prepare job's event stream.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub kind: String, // "status", "log", ...
    pub ts: Option<String>,
    pub status: Option<JobStatus>,
    pub message: Option<String>,
    pub result: Option<PrepareResult>,
    pub error: Option<JobError>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Instance {
    #[serde(alias = "id")]
    pub instance_id: String,
    pub image_id: String,
    pub state_id: String,
    pub status: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DeleteResult {
    pub outcome: String, // "deleted" or "blocked"
    pub root: DeleteNode,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DeleteNode {
    pub kind: Option<String>,
    pub id: Option<String>,
    pub blocked: Option<String>,
    pub connections: Option<u32>,
}

/// A delete answered with 200 or 409. Other statuses surface as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteResponse {
    pub http_status: u16,
    pub result: Option<DeleteResult>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunRequest {
    pub kind: String, // "psql" or "pgbench"
    pub instance_ref: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RunEvent {
    Stdout { data: String },
    Stderr { data: String },
    Exit { exit_code: i32 },
    Error { message: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Health {
    pub ok: bool,
    pub version: Option<String>,
}
