use super::{Received, Transport};
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use jobline_protocol::FrameCodec;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info};

/// Transport over a TCP stream with length-prefixed frames
pub struct TcpTransport {
    framed: Option<Framed<TcpStream, FrameCodec>>,
    send_timeout: Duration,
}

impl TcpTransport {
    pub fn new(send_timeout: Duration) -> Self {
        TcpTransport {
            framed: None,
            send_timeout,
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self, address: &str, identity: &str) -> Result<(), TransportError> {
        self.close().await;

        let addr = lookup_host(address)
            .await
            .map_err(|e| TransportError::Resolve {
                address: address.to_string(),
                reason: e.to_string(),
            })?
            .next()
            .ok_or_else(|| TransportError::Resolve {
                address: address.to_string(),
                reason: "no addresses found".to_string(),
            })?;

        let stream = match timeout(self.send_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::Connect {
                    address: address.to_string(),
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(TransportError::Connect {
                    address: address.to_string(),
                    reason: format!("timed out after {:?}", self.send_timeout),
                })
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY: {}", e);
        }

        info!("Connected to broker at {} ({}) as {}", address, addr, identity);
        self.framed = Some(Framed::new(stream, FrameCodec));
        Ok(())
    }

    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let framed = self.framed.as_mut().ok_or(TransportError::NotConnected)?;
        let outcome = timeout(self.send_timeout, framed.send(frame)).await;

        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.framed = None;
                Err(TransportError::Broken(e.to_string()))
            }
            Err(_) => {
                self.framed = None;
                Err(TransportError::Broken(format!(
                    "send timed out after {:?}",
                    self.send_timeout
                )))
            }
        }
    }

    async fn receive(&mut self, wait: Duration) -> Result<Received, TransportError> {
        let framed = self.framed.as_mut().ok_or(TransportError::NotConnected)?;
        let outcome = timeout(wait, framed.next()).await;

        match outcome {
            Err(_) => Ok(Received::Timeout),
            Ok(Some(Ok(frame))) => Ok(Received::Frame(frame)),
            Ok(Some(Err(e))) => {
                self.framed = None;
                Err(TransportError::Broken(e.to_string()))
            }
            Ok(None) => {
                self.framed = None;
                Err(TransportError::Broken("connection closed by broker".to_string()))
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut framed) = self.framed.take() {
            if let Ok(Err(e)) = timeout(self.send_timeout, SinkExt::<Bytes>::close(&mut framed)).await {
                debug!("Error while closing broker connection: {}", e);
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.framed.is_some()
    }
}
