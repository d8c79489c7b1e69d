use async_trait::async_trait;
use jobline_core::JobId;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Result type for job handlers
pub type HandlerResult = Result<Vec<u8>, HandlerError>;

/// Error reported by the application callback. Sent back to the broker as
/// an `application_error` result carrying the message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        HandlerError::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        HandlerError::new(message)
    }
}

/// What a handler knows about the job it is running
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,
    pub identity: Arc<str>,
    /// Point after which the result is no longer awaited
    pub deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(
        job_id: JobId,
        identity: Arc<str>,
        deadline: Option<Instant>,
        cancel: CancellationToken,
    ) -> Self {
        JobContext {
            job_id,
            identity,
            deadline,
            cancel,
        }
    }

    /// True once the worker is shutting down or the job was abandoned.
    /// Long-running handlers should poll this and return early.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Application callback invoked once per job
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Execute the job with the given payload
    async fn handle(&self, ctx: JobContext, payload: Vec<u8>) -> HandlerResult;
}

#[async_trait]
impl<H: JobHandler + ?Sized> JobHandler for Arc<H> {
    async fn handle(&self, ctx: JobContext, payload: Vec<u8>) -> HandlerResult {
        (**self).handle(ctx, payload).await
    }
}

/// Adapts a synchronous closure into a [`JobHandler`]. The closure runs on
/// the blocking thread pool so it may take as long as it needs.
pub struct FnHandler<F> {
    f: Arc<F>,
}

impl<F> FnHandler<F>
where
    F: Fn(&JobContext, &[u8]) -> HandlerResult + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        FnHandler { f: Arc::new(f) }
    }
}

#[async_trait]
impl<F> JobHandler for FnHandler<F>
where
    F: Fn(&JobContext, &[u8]) -> HandlerResult + Send + Sync + 'static,
{
    async fn handle(&self, ctx: JobContext, payload: Vec<u8>) -> HandlerResult {
        let f = Arc::clone(&self.f);
        match tokio::task::spawn_blocking(move || f(&ctx, &payload)).await {
            Ok(result) => result,
            // Re-raise so the executor reports it as an internal error
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(HandlerError::new(format!("blocking task failed: {}", e))),
        }
    }
}

/// Handler that echoes the payload
pub struct EchoHandler;

#[async_trait]
impl JobHandler for EchoHandler {
    async fn handle(&self, _ctx: JobContext, payload: Vec<u8>) -> HandlerResult {
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> JobContext {
        JobContext::new(JobId::new(1), Arc::from("test"), None, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_echo_handler() {
        let payload = b"test data".to_vec();
        let result = EchoHandler.handle(context(), payload.clone()).await.unwrap();
        assert_eq!(result, payload);
    }

    #[tokio::test]
    async fn test_fn_handler() {
        let handler = FnHandler::new(|ctx: &JobContext, payload: &[u8]| {
            let n: u64 = std::str::from_utf8(payload)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| HandlerError::new("not a number"))?;
            Ok(format!("{}:{}", ctx.job_id, n * n).into_bytes())
        });

        assert_eq!(handler.handle(context(), b"12".to_vec()).await.unwrap(), b"1:144");
        assert_eq!(
            handler.handle(context(), b"twelve".to_vec()).await,
            Err(HandlerError::new("not a number"))
        );
    }

    #[tokio::test]
    async fn test_context_cancellation() {
        let parent = CancellationToken::new();
        let ctx = JobContext::new(JobId::new(5), Arc::from("w"), None, parent.child_token());
        assert!(!ctx.is_cancelled());

        parent.cancel();
        assert!(ctx.is_cancelled());
        ctx.cancelled().await;
    }

    #[tokio::test]
    async fn test_arc_handler() {
        let handler: Arc<dyn JobHandler> = Arc::new(EchoHandler);
        assert_eq!(handler.handle(context(), b"x".to_vec()).await.unwrap(), b"x");
    }
}
