//! Job envelope carried inside a record payload.

use serde_json::Value;

use crate::payload::Payload;

/// Stream that task jobs are routed to.
pub const DEFAULT_STREAM: &str = "jobs.process";

pub const JOB_TYPE_FIELD: &str = "job_type";

/// Duplicate of [`JOB_TYPE_FIELD`] kept for consumers that read `type`.
pub const TYPE_FIELD: &str = "type";

pub const WORKSPACE_ID_FIELD: &str = "workspace_id";

/// Well-known job types.
pub mod job_types {
    pub const TASK_PROCESS: &str = "task_process";
    pub const TASK_SYNC: &str = "task_sync";
}

/// Stamp the task envelope onto a payload.
///
/// `None` is treated as an empty payload. Envelope fields overwrite any
/// same-named keys already present.
pub fn task_payload(job_type: &str, workspace_id: &str, payload: Option<Payload>) -> Payload {
    let mut payload = payload.unwrap_or_default();
    payload.insert(JOB_TYPE_FIELD.to_string(), Value::from(job_type));
    payload.insert(TYPE_FIELD.to_string(), Value::from(job_type));
    payload.insert(WORKSPACE_ID_FIELD.to_string(), Value::from(workspace_id));
    payload
}

/// A decoded job.
///
/// Only lives in the caller's memory; its identity is the record it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    payload: Payload,
}

impl Job {
    pub fn new(payload: Payload) -> Self {
        Self { payload }
    }

    /// `job_type`, falling back to `type` for producers that only set that.
    pub fn job_type(&self) -> Option<&str> {
        self.str_field(JOB_TYPE_FIELD)
            .or_else(|| self.str_field(TYPE_FIELD))
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.str_field(WORKSPACE_ID_FIELD)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    /// Fields other than the envelope.
    pub fn extra(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.payload.iter().filter(|(k, _)| {
            !matches!(k.as_str(), JOB_TYPE_FIELD | TYPE_FIELD | WORKSPACE_ID_FIELD)
        })
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn into_payload(self) -> Payload {
        self.payload
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

impl From<Payload> for Job {
    fn from(payload: Payload) -> Self {
        Self::new(payload)
    }
}
