//! Worker session state machine.
//!
//! ```text
//! DISCONNECTED -> CONNECTING -> READY <-> EXECUTING
//!                     ^           |          |
//!                     +-----------+----------+   (connection lost)
//!
//! READY | EXECUTING | CONNECTING --(shutdown)--> DRAINING -> DISCONNECTED
//! ```
//!
//! The session task is the only one that touches the transport. Jobs run on
//! the executor's slots and hand their results back over a channel; the
//! session sends them in completion order.

use crate::backoff::BackoffPolicy;
use crate::config::WorkerConfig;
use crate::error::{ConfigError, TransportError};
use crate::executor::{ExecutionSlot, JobExecutor};
use crate::handler::JobHandler;
use crate::ledger::JobLedger;
use crate::transport::{Received, Transport};
use bytes::Bytes;
use jobline_core::ResultEnvelope;
use jobline_protocol::{decode_job, encode_result, Frame};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No channel held (initial and terminal)
    Disconnected,
    /// Acquiring the channel and registering
    Connecting,
    /// Registered with a free execution slot, waiting for work
    Ready,
    /// Every slot busy; waiting for a job to finish
    Executing,
    /// Shutdown requested; finishing in-flight jobs
    Draining,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Disconnected => "DISCONNECTED",
            Phase::Connecting => "CONNECTING",
            Phase::Ready => "READY",
            Phase::Executing => "EXECUTING",
            Phase::Draining => "DRAINING",
        };
        f.write_str(name)
    }
}

/// Counters reported when a session ends
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub jobs_accepted: u64,
    pub results_sent: u64,
    /// Frames that failed to decode as a job request
    pub frames_rejected: u64,
    pub duplicates_ignored: u64,
    /// Results lost because the connection broke
    pub results_discarded: u64,
    pub reconnects: u64,
    pub heartbeats_sent: u64,
}

struct SessionSettings {
    address: String,
    receive_timeout: Duration,
    heartbeat_interval: Duration,
    backoff: BackoffPolicy,
    initial_connect_attempts: u32,
}

pub struct Session<T: Transport> {
    settings: SessionSettings,
    identity: Arc<str>,
    transport: T,
    executor: JobExecutor,
    ledger: JobLedger,
    shutdown: CancellationToken,
    completions_tx: mpsc::UnboundedSender<ResultEnvelope>,
    completions_rx: mpsc::UnboundedReceiver<ResultEnvelope>,
    phase: Phase,
    phase_observer: Option<mpsc::UnboundedSender<Phase>>,
    connected: bool,
    registered_once: bool,
    in_flight: usize,
    last_sent: Instant,
    stats: SessionStats,
}

impl<T: Transport> Session<T> {
    pub fn new(
        config: &WorkerConfig,
        handler: Arc<dyn JobHandler>,
        transport: T,
        shutdown: CancellationToken,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let identity: Arc<str> = Arc::from(config.identity());
        let executor = JobExecutor::new(
            handler,
            config.execution_concurrency,
            config.execution_deadline(),
            identity.clone(),
            shutdown.clone(),
        );
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        Ok(Session {
            settings: SessionSettings {
                address: config.broker_address.clone(),
                receive_timeout: config.receive_timeout(),
                heartbeat_interval: config.heartbeat_interval(),
                backoff: config.backoff(),
                initial_connect_attempts: config.initial_connect_attempts,
            },
            identity,
            transport,
            executor,
            ledger: JobLedger::new(config.ledger_capacity),
            shutdown,
            completions_tx,
            completions_rx,
            phase: Phase::Disconnected,
            phase_observer: None,
            connected: false,
            registered_once: false,
            in_flight: 0,
            last_sent: Instant::now(),
            stats: SessionStats::default(),
        })
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Stream of every phase the session enters from now on
    pub fn observe_phases(&mut self) -> mpsc::UnboundedReceiver<Phase> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.phase_observer = Some(tx);
        rx
    }

    /// Drive the session until shutdown completes.
    ///
    /// Returns `ConfigError` only when the broker cannot be reached before the
    /// first registration; later faults are retried or turned into results.
    pub async fn run(mut self) -> Result<SessionStats, ConfigError> {
        info!(
            "Starting worker {} (concurrency: {}, broker: {})",
            self.identity,
            self.executor.capacity(),
            self.settings.address
        );

        self.set_phase(Phase::Connecting);

        loop {
            let next = match self.phase {
                Phase::Disconnected => break,
                Phase::Connecting => match self.connect().await {
                    Ok(next) => next,
                    Err(e) => {
                        self.transport.close().await;
                        return Err(e);
                    }
                },
                Phase::Ready | Phase::Executing if self.shutdown.is_cancelled() => Phase::Draining,
                Phase::Ready => self.ready().await,
                Phase::Executing => self.executing().await,
                Phase::Draining => self.drain().await,
            };
            self.set_phase(next);
        }

        info!("Worker {} stopped: {:?}", self.identity, self.stats);
        Ok(self.stats)
    }

    fn set_phase(&mut self, next: Phase) {
        if next == self.phase {
            return;
        }
        debug!("Session phase {} -> {}", self.phase, next);
        self.phase = next;
        if let Some(observer) = &self.phase_observer {
            let _ = observer.send(next);
        }
    }

    async fn connect(&mut self) -> Result<Phase, ConfigError> {
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                return Ok(Phase::Draining);
            }

            match self.establish().await {
                Ok(()) => {
                    if self.registered_once {
                        self.stats.reconnects += 1;
                        info!("Re-registered with broker as {}", self.identity);
                    } else {
                        info!("Registered with broker as {}", self.identity);
                    }
                    self.registered_once = true;
                    self.connected = true;
                    return Ok(Phase::Ready);
                }
                Err(e) => {
                    attempt = attempt.saturating_add(1);

                    if !self.registered_once && attempt >= self.settings.initial_connect_attempts {
                        error!(
                            "Giving up on broker at {} after {} attempts: {}",
                            self.settings.address, attempt, e
                        );
                        return Err(ConfigError::BrokerUnreachable {
                            address: self.settings.address.clone(),
                            attempts: attempt,
                            last_error: e.to_string(),
                        });
                    }

                    let delay = self.settings.backoff.delay(attempt - 1);
                    warn!(
                        "Connection attempt {} to {} failed: {}; retrying in {:?}",
                        attempt, self.settings.address, e, delay
                    );

                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Ok(Phase::Draining),
                        _ = sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn establish(&mut self) -> Result<(), TransportError> {
        self.transport
            .connect(&self.settings.address, &self.identity)
            .await?;
        self.send_frame(Frame::register(&*self.identity).encode()).await
    }

    async fn ready(&mut self) -> Phase {
        if self.heartbeat_due() {
            if let Err(e) = self.send_heartbeat().await {
                return self.connection_lost(e);
            }
        }

        // Backpressure: nothing is read from the broker without a free slot
        let Some(slot) = self.executor.try_acquire_slot() else {
            return Phase::Executing;
        };

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Phase::Draining,
            Some(result) = self.completions_rx.recv() => {
                drop(slot);
                self.deliver(result).await
            }
            received = self.transport.receive(self.settings.receive_timeout) => match received {
                Ok(Received::Timeout) => Phase::Ready,
                Ok(Received::Frame(bytes)) => self.accept(bytes, slot),
                Err(e) => self.connection_lost(e),
            },
        }
    }

    fn accept(&mut self, bytes: Bytes, slot: ExecutionSlot) -> Phase {
        let job = match decode_job(&bytes) {
            Ok(job) => job,
            Err(e) => {
                warn!("Rejected frame from broker ({} bytes): {}", bytes.len(), e);
                self.stats.frames_rejected += 1;
                return Phase::Ready;
            }
        };

        if !self.ledger.admit(job.job_id) {
            warn!("Ignoring duplicate job {}", job.job_id);
            self.stats.duplicates_ignored += 1;
            return Phase::Ready;
        }

        debug!("Accepted job {} ({} bytes)", job.job_id, job.payload.len());
        self.stats.jobs_accepted += 1;
        self.in_flight += 1;
        self.executor.dispatch(job, slot, self.completions_tx.clone());

        if self.executor.available_slots() == 0 {
            Phase::Executing
        } else {
            Phase::Ready
        }
    }

    async fn executing(&mut self) -> Phase {
        let heartbeat_at = self.last_sent + self.settings.heartbeat_interval;

        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Phase::Draining,
            Some(result) = self.completions_rx.recv() => self.deliver(result).await,
            _ = sleep_until(heartbeat_at) => match self.send_heartbeat().await {
                Ok(()) => Phase::Executing,
                Err(e) => self.connection_lost(e),
            },
        }
    }

    /// Send a finished job's result; a broken channel discards it.
    async fn deliver(&mut self, result: ResultEnvelope) -> Phase {
        self.in_flight = self.in_flight.saturating_sub(1);
        match self.send_result(&result).await {
            Ok(()) => Phase::Ready,
            Err(e) => self.connection_lost(e),
        }
    }

    async fn send_result(&mut self, result: &ResultEnvelope) -> Result<(), TransportError> {
        match self.send_frame(encode_result(result)).await {
            Ok(()) => {
                debug!("Sent result for job {} ({})", result.job_id, result.status);
                self.stats.results_sent += 1;
                Ok(())
            }
            Err(e) => {
                warn!("Discarding result for job {}: {}", result.job_id, e);
                self.stats.results_discarded += 1;
                Err(e)
            }
        }
    }

    async fn drain(&mut self) -> Phase {
        info!("Shutting down, waiting for {} in-flight job(s)", self.in_flight);

        while self.in_flight > 0 {
            let Some(result) = self.completions_rx.recv().await else {
                break;
            };
            self.in_flight -= 1;

            if self.connected {
                if self.send_result(&result).await.is_err() {
                    self.connected = false;
                }
            } else {
                warn!("Discarding result for job {}: not connected", result.job_id);
                self.stats.results_discarded += 1;
            }
        }

        if self.connected {
            match self.send_frame(Frame::deregister(&*self.identity).encode()).await {
                Ok(()) => info!("Deregistered {} from broker", self.identity),
                Err(e) => warn!("Failed to deregister from broker: {}", e),
            }
        }

        self.transport.close().await;
        self.connected = false;
        Phase::Disconnected
    }

    fn connection_lost(&mut self, e: TransportError) -> Phase {
        warn!("Connection to broker lost: {}", e);
        self.connected = false;
        Phase::Connecting
    }

    fn heartbeat_due(&self) -> bool {
        self.last_sent.elapsed() >= self.settings.heartbeat_interval
    }

    async fn send_heartbeat(&mut self) -> Result<(), TransportError> {
        self.send_frame(Frame::heartbeat(&*self.identity).encode()).await?;
        self.stats.heartbeats_sent += 1;
        debug!("Heartbeat sent");
        Ok(())
    }

    async fn send_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.transport.send(frame).await?;
        self.last_sent = Instant::now();
        Ok(())
    }
}
