mod job;
mod error;

pub use job::{JobId, JobPayload, JobEnvelope, ResultEnvelope, JobStatus};
pub use error::{CoreError, Result};

pub const MAX_PAYLOAD_SIZE: usize = 10 * 1024 * 1024; // 10MB
