use super::{Received, Transport};
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use jobline_protocol::{DecodeError, Frame};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

/// Create an in-process transport and the broker end that drives it.
///
/// Every successful `connect` on the transport yields a fresh
/// [`MemoryConnection`] from [`MemoryBroker::accept`]; dropping that
/// connection breaks the worker's channel.
pub fn memory_transport() -> (MemoryTransport, MemoryBroker) {
    let (connector, incoming) = mpsc::unbounded_channel();
    let counters = Arc::new(Counters::default());

    let transport = MemoryTransport {
        connector,
        counters: counters.clone(),
        link: None,
    };
    let broker = MemoryBroker { incoming, counters };

    (transport, broker)
}

#[derive(Default)]
struct Counters {
    refusals: AtomicU32,
    attempts: AtomicU32,
}

struct Link {
    to_broker: mpsc::UnboundedSender<Bytes>,
    from_broker: mpsc::UnboundedReceiver<Bytes>,
}

/// Worker side of the in-memory channel
pub struct MemoryTransport {
    connector: mpsc::UnboundedSender<MemoryConnection>,
    counters: Arc<Counters>,
    link: Option<Link>,
}

/// Broker side: accepts connections and injects connect failures
pub struct MemoryBroker {
    incoming: mpsc::UnboundedReceiver<MemoryConnection>,
    counters: Arc<Counters>,
}

/// One accepted worker connection, seen from the broker
pub struct MemoryConnection {
    pub address: String,
    pub identity: String,
    to_worker: mpsc::UnboundedSender<Bytes>,
    from_worker: mpsc::UnboundedReceiver<Bytes>,
}

impl MemoryBroker {
    /// Wait for the worker's next successful connect
    pub async fn accept(&mut self) -> Option<MemoryConnection> {
        self.incoming.recv().await
    }

    /// Make the next `count` connect attempts fail
    pub fn refuse_next(&self, count: u32) {
        self.counters.refusals.store(count, Ordering::SeqCst);
    }

    /// Connect attempts seen so far, refused ones included
    pub fn connect_attempts(&self) -> u32 {
        self.counters.attempts.load(Ordering::SeqCst)
    }
}

impl MemoryConnection {
    /// Push a raw frame to the worker. Returns `false` if the worker end is gone.
    pub fn send_raw(&self, frame: Bytes) -> bool {
        self.to_worker.send(frame).is_ok()
    }

    pub fn send_frame(&self, frame: &Frame) -> bool {
        self.send_raw(frame.encode())
    }

    /// Next raw frame from the worker, `None` once the worker closed the channel
    pub async fn recv_raw(&mut self) -> Option<Bytes> {
        self.from_worker.recv().await
    }

    pub async fn recv_frame(&mut self) -> Option<Result<Frame, DecodeError>> {
        self.recv_raw().await.map(|bytes| Frame::decode(&bytes))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&mut self, address: &str, identity: &str) -> Result<(), TransportError> {
        self.close().await;
        self.counters.attempts.fetch_add(1, Ordering::SeqCst);

        let refused = self
            .counters
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Connect {
                address: address.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let (to_worker, from_broker) = mpsc::unbounded_channel();
        let (to_broker, from_worker) = mpsc::unbounded_channel();
        let connection = MemoryConnection {
            address: address.to_string(),
            identity: identity.to_string(),
            to_worker,
            from_worker,
        };

        self.connector
            .send(connection)
            .map_err(|_| TransportError::Connect {
                address: address.to_string(),
                reason: "broker is gone".to_string(),
            })?;

        debug!("In-memory connection to {} opened", address);
        self.link = Some(Link {
            to_broker,
            from_broker,
        });
        Ok(())
    }

    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        if link.to_broker.send(frame).is_err() {
            self.link = None;
            return Err(TransportError::Broken("broker closed the connection".to_string()));
        }
        Ok(())
    }

    async fn receive(&mut self, wait: Duration) -> Result<Received, TransportError> {
        let link = self.link.as_mut().ok_or(TransportError::NotConnected)?;
        let outcome = timeout(wait, link.from_broker.recv()).await;

        match outcome {
            Err(_) => Ok(Received::Timeout),
            Ok(Some(frame)) => Ok(Received::Frame(frame)),
            Ok(None) => {
                self.link = None;
                Err(TransportError::Broken("broker closed the connection".to_string()))
            }
        }
    }

    async fn close(&mut self) {
        self.link = None;
    }

    fn is_connected(&self) -> bool {
        self.link.is_some()
    }
}
