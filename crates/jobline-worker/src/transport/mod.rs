//! Message channel to the broker.
//!
//! The session only ever talks to the broker through [`Transport`], so the
//! TCP adapter can be swapped for the in-memory one in tests.

mod memory;
mod tcp;

pub use memory::{memory_transport, MemoryBroker, MemoryConnection, MemoryTransport};
pub use tcp::TcpTransport;

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;

/// Outcome of a successful receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Frame(Bytes),
    Timeout,
}

/// Bidirectional frame channel to the broker.
///
/// Frames are opaque here: decoding belongs to the protocol layer, so a
/// malformed frame is delivered like any other and never reported as an
/// error. Errors always mean the channel itself failed.
#[async_trait]
pub trait Transport: Send {
    /// Open the channel. Any previous channel is closed first.
    async fn connect(&mut self, address: &str, identity: &str) -> Result<(), TransportError>;

    /// Send one frame. Blocks at most for the adapter's send timeout.
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next frame.
    ///
    /// Must be cancel-safe: if the returned future is dropped before it
    /// completes, no frame may be lost.
    async fn receive(&mut self, timeout: Duration) -> Result<Received, TransportError>;

    /// Release the channel. Idempotent.
    async fn close(&mut self);

    fn is_connected(&self) -> bool;
}
