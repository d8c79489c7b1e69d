use crate::handler::{JobContext, JobHandler};
use jobline_core::{JobEnvelope, ResultEnvelope, MAX_PAYLOAD_SIZE};
use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Diagnostic payload of a result produced by an expired deadline
pub const TIMEOUT_MESSAGE: &str = "timeout";

/// One unit of execution capacity. The slot is released when dropped.
#[derive(Debug)]
pub struct ExecutionSlot {
    _permit: OwnedSemaphorePermit,
}

/// Runs the application handler against decoded jobs.
///
/// Concurrency is bounded by a fixed number of execution slots; callers
/// must hold a slot before handing a job over, which is how backpressure
/// reaches the receive side.
#[derive(Clone)]
pub struct JobExecutor {
    handler: Arc<dyn JobHandler>,
    slots: Arc<Semaphore>,
    capacity: usize,
    deadline: Option<Duration>,
    identity: Arc<str>,
    cancel: CancellationToken,
}

impl JobExecutor {
    pub fn new(
        handler: Arc<dyn JobHandler>,
        capacity: usize,
        deadline: Option<Duration>,
        identity: Arc<str>,
        cancel: CancellationToken,
    ) -> Self {
        let capacity = capacity.max(1);
        JobExecutor {
            handler,
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
            deadline,
            identity,
            cancel,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }

    /// Claim a free slot, if any
    pub fn try_acquire_slot(&self) -> Option<ExecutionSlot> {
        self.slots
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| ExecutionSlot { _permit: permit })
    }

    /// Execute a job and turn every outcome into a result envelope.
    ///
    /// Handler errors become `application_error`; panics, cancellation and an
    /// expired deadline become `internal_error`. Nothing escapes.
    pub async fn execute(&self, job: JobEnvelope) -> ResultEnvelope {
        let job_id = job.job_id;
        let ctx = JobContext::new(
            job_id,
            self.identity.clone(),
            self.deadline.map(|d| Instant::now() + d),
            self.cancel.child_token(),
        );
        let job_cancel = ctx.cancellation_token().clone();

        debug!("Executing job {} ({} bytes)", job_id, job.payload.len());

        let handler = self.handler.clone();
        let payload = job.payload;
        let mut task = tokio::spawn(async move { handler.handle(ctx, payload).await });

        let joined = match self.deadline {
            Some(deadline) => match timeout(deadline, &mut task).await {
                Ok(joined) => joined,
                Err(_) => {
                    // Blocking handlers keep running until they notice the
                    // cancellation; their output is ignored.
                    job_cancel.cancel();
                    task.abort();
                    error!("Job {} timed out after {:?}", job_id, deadline);
                    return ResultEnvelope::internal_error(job_id, TIMEOUT_MESSAGE);
                }
            },
            None => task.await,
        };

        match joined {
            Ok(Ok(payload)) if payload.len() > MAX_PAYLOAD_SIZE => {
                error!("Job {} produced {} bytes, over the payload limit", job_id, payload.len());
                ResultEnvelope::internal_error(
                    job_id,
                    format!(
                        "result payload of {} bytes exceeds maximum of {} bytes",
                        payload.len(),
                        MAX_PAYLOAD_SIZE
                    ),
                )
            }
            Ok(Ok(payload)) => {
                debug!("Job {} completed successfully", job_id);
                ResultEnvelope::success(job_id, payload)
            }
            Ok(Err(e)) => {
                warn!("Job {} failed: {}", job_id, e);
                ResultEnvelope::application_error(job_id, e.message())
            }
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                error!("Job {} panicked: {}", job_id, message);
                ResultEnvelope::internal_error(job_id, format!("job panicked: {}", message))
            }
            Err(_) => {
                error!("Job {} was cancelled", job_id);
                ResultEnvelope::internal_error(job_id, "job was cancelled")
            }
        }
    }

    /// Run `job` in the background while holding `slot`. The slot is
    /// released before the result is pushed to `completions`.
    pub fn dispatch(
        &self,
        job: JobEnvelope,
        slot: ExecutionSlot,
        completions: mpsc::UnboundedSender<ResultEnvelope>,
    ) -> JoinHandle<()> {
        let executor = self.clone();
        tokio::spawn(async move {
            let result = executor.execute(job).await;
            drop(slot);
            if completions.send(result).is_err() {
                warn!("Session gone, dropping job result");
            }
        })
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
