use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Payload size exceeds maximum allowed size of {max} bytes (got {actual})")]
    PayloadTooLarge { max: usize, actual: usize },

    #[error("Unknown job status code: {0}")]
    UnknownStatus(u8),
}

pub type Result<T> = std::result::Result<T, CoreError>;
