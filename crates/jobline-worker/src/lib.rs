//! Worker-side runtime for jobline.
//!
//! A host process supplies a [`JobHandler`] and a [`WorkerConfig`]; the
//! runtime connects to the broker, registers, receives jobs, runs them on a
//! bounded set of execution slots and sends the results back, reconnecting
//! with backoff whenever the channel breaks.
//!
//! ```no_run
//! use jobline_worker::{run_blocking, FnHandler, HandlerError, JobContext, WorkerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let square = FnHandler::new(|_ctx: &JobContext, payload: &[u8]| {
//!     let n: i64 = std::str::from_utf8(payload)
//!         .ok()
//!         .and_then(|s| s.trim().parse().ok())
//!         .ok_or_else(|| HandlerError::new("expected an integer"))?;
//!     Ok((n * n).to_string().into_bytes())
//! });
//!
//! let stats = run_blocking(WorkerConfig::default(), square, CancellationToken::new())?;
//! println!("{:?}", stats);
//! # Ok::<(), jobline_worker::ConfigError>(())
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
pub mod ledger;
pub mod runtime;
pub mod session;
pub mod transport;

pub use backoff::{backoff_delay, BackoffPolicy};
pub use config::WorkerConfig;
pub use error::{ConfigError, TransportError};
pub use executor::JobExecutor;
pub use handler::{EchoHandler, FnHandler, HandlerError, HandlerResult, JobContext, JobHandler};
pub use runtime::{run, run_blocking, run_with_transport};
pub use session::{Phase, Session, SessionStats};
