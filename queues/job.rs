use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// `-2` on a job's `retry_threshold` means "never give up".
pub const UNLIMITED_RETRY_THRESHOLD: i32 = -2;
pub const DEFAULT_RETRY_THRESHOLD: i32 = 3;
pub const MAX_EXCEPTION_HISTORY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Delayed,
    Running,
    Complete,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Cancelled | JobStatus::Failed
        )
    }

    fn as_str(self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Delayed => "delayed",
            JobStatus::Running => "running",
            JobStatus::Complete => "complete",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Result<JobStatus> {
        match s {
            "waiting" => Ok(JobStatus::Waiting),
            "delayed" => Ok(JobStatus::Delayed),
            "running" => Ok(JobStatus::Running),
            "complete" => Ok(JobStatus::Complete),
            "cancelled" => Ok(JobStatus::Cancelled),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Protocol(format!("unknown job status {}", other))),
        }
    }
}

/// The stable, deterministic encoding of a job's identity and arguments. Written once
/// at creation time into the `job:<id>` hash's `payload` field and never rewritten, so
/// that requeues (direct or delayed) always replay the exact original bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub id: String,
    pub class: String,
    pub data: serde_json::Value,
}

impl Payload {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Payload> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobException {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Append to a bounded ring, keeping only the most recent [`MAX_EXCEPTION_HISTORY`]
/// entries.
pub fn push_exception_history(history: &mut Vec<JobException>, exc: JobException) {
    history.push(exc);
    if history.len() > MAX_EXCEPTION_HISTORY {
        let overflow = history.len() - MAX_EXCEPTION_HISTORY;
        history.drain(0..overflow);
    }
}

/// Arguments accepted by [`crate::Queue::enqueue`].
#[derive(Debug, Clone)]
pub struct NewJob {
    pub class: String,
    pub data: serde_json::Value,
    pub run_at: Option<DateTime<Utc>>,
    pub retry_threshold: Option<i32>,
    pub series_id: Option<String>,
    pub signature: Option<String>,
}

impl NewJob {
    pub fn new(class: impl Into<String>, data: serde_json::Value) -> NewJob {
        NewJob {
            class: class.into(),
            data,
            run_at: None,
            retry_threshold: None,
            series_id: None,
            signature: None,
        }
    }

    pub fn run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    pub fn retry_threshold(mut self, threshold: i32) -> Self {
        self.retry_threshold = Some(threshold);
        self
    }

    pub fn series_id(mut self, series_id: impl Into<String>) -> Self {
        self.series_id = Some(series_id.into());
        self
    }

    /// Uniqueness signature (§4.3). When set, [`crate::Queue::enqueue`] acquires
    /// `unique:job:<signature>` before admitting the job, the same check a handler's
    /// `signature(data)` capability re-asserts at perform time.
    pub fn signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }
}

/// A fully materialized job record, as read back from its `job:<id>` hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub queue: String,
    pub class: String,
    pub data: serde_json::Value,
    pub status: JobStatus,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub delayed_until: Option<DateTime<Utc>>,
    pub failed_count: u32,
    pub progress: u8,
    pub latest_line: Option<String>,
    pub output: Option<String>,
    pub exception: Vec<JobException>,
    pub worker: Option<String>,
    pub override_status: Option<JobStatus>,
    pub override_reason: Option<String>,
    pub series_id: Option<String>,
    pub retry_threshold: i32,
}

impl Job {
    pub(crate) fn new(id: String, queue: String, job: &NewJob, now: DateTime<Utc>) -> Job {
        Job {
            id,
            queue,
            class: job.class.clone(),
            data: job.data.clone(),
            status: if job.run_at.is_some() {
                JobStatus::Delayed
            } else {
                JobStatus::Waiting
            },
            created: now,
            updated: now,
            started: None,
            finished: None,
            delayed_until: job.run_at,
            failed_count: 0,
            progress: 0,
            latest_line: None,
            output: None,
            exception: Vec::new(),
            worker: None,
            override_status: None,
            override_reason: None,
            series_id: job.series_id.clone(),
            retry_threshold: job.retry_threshold.unwrap_or(DEFAULT_RETRY_THRESHOLD),
        }
    }

    pub fn payload(&self) -> Payload {
        Payload {
            id: self.id.clone(),
            class: self.class.clone(),
            data: self.data.clone(),
        }
    }

    pub(crate) fn to_hash_fields(&self) -> Result<Vec<(&'static str, String)>> {
        let mut fields = vec![
            ("queue", self.queue.clone()),
            ("class", self.class.clone()),
            ("data", serde_json::to_string(&self.data)?),
            ("payload", String::from_utf8_lossy(&self.payload().encode()?).into_owned()),
            ("status", self.status.as_str().to_string()),
            ("created", self.created.timestamp_millis().to_string()),
            ("updated", self.updated.timestamp_millis().to_string()),
            ("failed_count", self.failed_count.to_string()),
            ("progress", self.progress.to_string()),
            ("exception", serde_json::to_string(&self.exception)?),
            ("retry_threshold", self.retry_threshold.to_string()),
        ];

        if let Some(started) = self.started {
            fields.push(("started", started.timestamp_millis().to_string()));
        }
        if let Some(finished) = self.finished {
            fields.push(("finished", finished.timestamp_millis().to_string()));
        }
        if let Some(delayed_until) = self.delayed_until {
            fields.push(("delayed_until", delayed_until.timestamp_millis().to_string()));
        }
        if let Some(line) = &self.latest_line {
            fields.push(("latest_line", line.clone()));
        }
        if let Some(output) = &self.output {
            fields.push(("output", output.clone()));
        }
        if let Some(worker) = &self.worker {
            fields.push(("worker", worker.clone()));
        }
        if let Some(series_id) = &self.series_id {
            fields.push(("series_id", series_id.clone()));
        }

        Ok(fields)
    }

    pub(crate) fn from_hash(id: &str, queue: &str, map: HashMap<String, String>) -> Result<Job> {
        let get = |k: &str| map.get(k).cloned();
        let millis = |k: &str| -> Result<Option<DateTime<Utc>>> {
            match map.get(k) {
                Some(v) if !v.is_empty() => Ok(Some(Utc.timestamp_millis(v.parse::<i64>()?))),
                _ => Ok(None),
            }
        };

        let status = get("status")
            .map(|s| JobStatus::parse(&s))
            .transpose()?
            .ok_or_else(|| Error::JobNotFound(id.to_string()))?;

        let override_status = get("override_status")
            .filter(|s| !s.is_empty())
            .map(|s| JobStatus::parse(&s))
            .transpose()?;

        let exception = get("exception")
            .map(|s| serde_json::from_str(&s))
            .transpose()?
            .unwrap_or_default();

        let data = get("data")
            .map(|s| serde_json::from_str(&s))
            .transpose()?
            .unwrap_or(serde_json::Value::Null);

        Ok(Job {
            id: id.to_string(),
            queue: queue.to_string(),
            class: get("class").unwrap_or_default(),
            data,
            status,
            created: millis("created")?.ok_or_else(|| Error::JobNotFound(id.to_string()))?,
            updated: millis("updated")?.unwrap_or_else(Utc::now),
            started: millis("started")?,
            finished: millis("finished")?,
            delayed_until: millis("delayed_until")?,
            failed_count: get("failed_count")
                .map(|s| s.parse())
                .transpose()?
                .unwrap_or(0),
            progress: get("progress").map(|s| s.parse()).transpose()?.unwrap_or(0),
            latest_line: get("latest_line"),
            output: get("output"),
            exception,
            worker: get("worker").filter(|s| !s.is_empty()),
            override_status,
            override_reason: get("override_reason").filter(|s| !s.is_empty()),
            series_id: get("series_id").filter(|s| !s.is_empty()),
            retry_threshold: get("retry_threshold")
                .map(|s| s.parse())
                .transpose()?
                .unwrap_or(DEFAULT_RETRY_THRESHOLD),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_history_is_bounded() {
        let mut history = Vec::new();
        for i in 0..10 {
            push_exception_history(
                &mut history,
                JobException {
                    message: format!("error {}", i),
                    at: Utc::now(),
                },
            );
        }
        assert_eq!(history.len(), MAX_EXCEPTION_HISTORY);
        assert_eq!(history.last().unwrap().message, "error 9");
        assert_eq!(history.first().unwrap().message, "error 5");
    }

    #[test]
    fn payload_round_trips() {
        let payload = Payload {
            id: "abc".to_string(),
            class: "Echo".to_string(),
            data: serde_json::json!({"x": 1}),
        };
        let bytes = payload.encode().unwrap();
        let decoded = Payload::decode(&bytes).unwrap();
        assert_eq!(payload, decoded);
    }
}
