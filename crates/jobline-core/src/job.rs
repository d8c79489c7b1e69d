use crate::{CoreError, Result, MAX_PAYLOAD_SIZE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Job payload (opaque bytes, schema owned by the application)
pub type JobPayload = Vec<u8>;

/// Correlation token assigned by the broker to one outstanding job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    pub fn new(value: u64) -> Self {
        JobId(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for JobId {
    fn from(value: u64) -> Self {
        JobId(value)
    }
}

/// Outcome category carried by a job result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// The callback returned a payload
    Success,
    /// The callback reported an error of its own
    ApplicationError,
    /// The callback faulted, timed out or the runtime could not run it
    InternalError,
}

impl JobStatus {
    pub fn as_u8(&self) -> u8 {
        match self {
            JobStatus::Success => 0,
            JobStatus::ApplicationError => 1,
            JobStatus::InternalError => 2,
        }
    }

    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(JobStatus::Success),
            1 => Ok(JobStatus::ApplicationError),
            2 => Ok(JobStatus::InternalError),
            other => Err(CoreError::UnknownStatus(other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::ApplicationError => "application_error",
            JobStatus::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work received from the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Correlation token echoed back in the result
    pub job_id: JobId,

    /// Application-defined input (max 10MB)
    pub payload: JobPayload,

    /// When the request frame was decoded
    pub received_at: DateTime<Utc>,
}

impl JobEnvelope {
    /// Create an envelope stamped with the current time
    pub fn new(job_id: JobId, payload: JobPayload) -> Result<Self> {
        Self::received_at(job_id, payload, Utc::now())
    }

    pub fn received_at(
        job_id: JobId,
        payload: JobPayload,
        received_at: DateTime<Utc>,
    ) -> Result<Self> {
        check_payload(&payload)?;
        Ok(JobEnvelope {
            job_id,
            payload,
            received_at,
        })
    }

    /// Time spent since the request was decoded
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.received_at
    }
}

/// Outcome of executing one `JobEnvelope`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    /// Matches the originating `JobEnvelope::job_id`
    pub job_id: JobId,

    pub status: JobStatus,

    /// Result bytes on success, diagnostic text otherwise
    pub payload: JobPayload,
}

impl ResultEnvelope {
    pub fn success(job_id: JobId, payload: JobPayload) -> Self {
        ResultEnvelope {
            job_id,
            status: JobStatus::Success,
            payload,
        }
    }

    pub fn application_error(job_id: JobId, message: impl Into<String>) -> Self {
        ResultEnvelope {
            job_id,
            status: JobStatus::ApplicationError,
            payload: diagnostic(message.into()),
        }
    }

    pub fn internal_error(job_id: JobId, message: impl Into<String>) -> Self {
        ResultEnvelope {
            job_id,
            status: JobStatus::InternalError,
            payload: diagnostic(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }

    /// Diagnostic text of a failed result (lossy for non-UTF-8 payloads)
    pub fn message(&self) -> Option<String> {
        if self.is_success() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.payload).into_owned())
        }
    }
}

/// Error text as a payload, clipped on a char boundary to fit a frame
fn diagnostic(mut message: String) -> JobPayload {
    if message.len() > MAX_PAYLOAD_SIZE {
        let mut end = MAX_PAYLOAD_SIZE;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message.into_bytes()
}

fn check_payload(payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(CoreError::PayloadTooLarge {
            max: MAX_PAYLOAD_SIZE,
            actual: payload.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        for status in [JobStatus::Success, JobStatus::ApplicationError, JobStatus::InternalError] {
            assert_eq!(JobStatus::from_u8(status.as_u8()).unwrap(), status);
        }
        assert_eq!(JobStatus::from_u8(9), Err(CoreError::UnknownStatus(9)));
        assert_eq!(JobStatus::InternalError.to_string(), "internal_error");
    }

    #[test]
    fn test_envelope_creation() {
        let job = JobEnvelope::new(JobId::new(7), b"6*7".to_vec()).unwrap();
        assert_eq!(job.job_id.value(), 7);
        assert_eq!(job.payload, b"6*7");
        assert!(job.age() >= chrono::Duration::zero());
    }

    #[test]
    fn test_payload_size_limit() {
        let large_payload = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        match JobEnvelope::new(JobId::new(1), large_payload) {
            Err(CoreError::PayloadTooLarge { actual, .. }) => {
                assert_eq!(actual, MAX_PAYLOAD_SIZE + 1)
            }
            other => panic!("Expected PayloadTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_result_messages() {
        let ok = ResultEnvelope::success(JobId::new(1), b"42".to_vec());
        assert!(ok.is_success());
        assert_eq!(ok.message(), None);

        let failed = ResultEnvelope::internal_error(JobId::new(2), "timeout");
        assert_eq!(failed.status, JobStatus::InternalError);
        assert_eq!(failed.message().as_deref(), Some("timeout"));
    }

    #[test]
    fn test_oversized_error_message_clipped() {
        let huge = "é".repeat(MAX_PAYLOAD_SIZE / 2 + 10);
        let failed = ResultEnvelope::application_error(JobId::new(3), huge);

        assert_eq!(failed.status, JobStatus::ApplicationError);
        assert!(failed.payload.len() <= MAX_PAYLOAD_SIZE);
        assert!(failed.payload.len() >= MAX_PAYLOAD_SIZE - 1);
        assert!(String::from_utf8(failed.payload.clone()).is_ok());

        let panicked = ResultEnvelope::internal_error(JobId::new(4), "x".repeat(MAX_PAYLOAD_SIZE + 1));
        assert_eq!(panicked.payload.len(), MAX_PAYLOAD_SIZE);
    }
}
