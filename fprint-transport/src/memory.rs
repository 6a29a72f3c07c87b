//! In-memory transport
//!
//! Two connected endpoints exchanging whole transfers over Tokio channels.
//! Used to attach drivers to a sensor emulator and in tests.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::{error::*, Transport};

/// Number of transfers that may be queued in each direction
const CHANNEL_DEPTH: usize = 64;

/// One end of an in-memory link
pub struct MemoryTransport {
    name: String,
    tx: mpsc::Sender<Bytes>,
    rx: mpsc::Receiver<Bytes>,
    connected: bool,
}

impl MemoryTransport {
    /// Create a connected pair of endpoints
    ///
    /// Whatever one side sends, the other side receives, one transfer at a time.
    pub fn pair(a: impl Into<String>, b: impl Into<String>) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(CHANNEL_DEPTH);
        let (b_tx, a_rx) = mpsc::channel(CHANNEL_DEPTH);

        let left = Self {
            name: a.into(),
            tx: a_tx,
            rx: a_rx,
            connected: false,
        };
        let right = Self {
            name: b.into(),
            tx: b_tx,
            rx: b_rx,
            connected: false,
        };

        (left, right)
    }

    /// Name of this endpoint
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Err(Error::AlreadyConnected);
        }

        if self.tx.is_closed() {
            return Err(Error::ConnectionClosed);
        }

        debug!("{}: link up", self.name);
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if self.connected {
            debug!("{}: link down", self.name);
        }
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        trace!("{}: sending {} bytes: {:02X?}", self.name, data.len(), &data[..data.len().min(16)]);

        self.tx
            .send(Bytes::copy_from_slice(data))
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    async fn receive(&mut self, timeout_duration: Duration) -> Result<BytesMut> {
        if !self.connected {
            return Err(Error::NotConnected);
        }

        let data = timeout(timeout_duration, self.rx.recv())
            .await
            .map_err(|_| Error::ReadTimeout)?
            .ok_or(Error::ConnectionClosed)?;

        trace!("{}: received {} bytes: {:02X?}", self.name, data.len(), &data[..data.len().min(16)]);

        Ok(BytesMut::from(&data[..]))
    }

    fn endpoint(&self) -> String {
        format!("memory:{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pair_exchange() {
        let (mut host, mut sensor) = MemoryTransport::pair("host", "sensor");
        host.connect().await.unwrap();
        sensor.connect().await.unwrap();

        host.send(&[1, 2, 3]).await.unwrap();
        let got = sensor.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(&got[..], &[1, 2, 3]);

        sensor.send(&[9]).await.unwrap();
        let got = host.receive(Duration::from_secs(1)).await.unwrap();
        assert_eq!(&got[..], &[9]);
    }

    #[tokio::test]
    async fn test_send_requires_connect() {
        let (mut host, _sensor) = MemoryTransport::pair("host", "sensor");
        assert!(matches!(host.send(&[1]).await, Err(Error::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_timeout() {
        let (mut host, _sensor) = MemoryTransport::pair("host", "sensor");
        host.connect().await.unwrap();

        let result = host.receive(Duration::from_millis(200)).await;
        assert!(matches!(result, Err(Error::ReadTimeout)));
    }

    #[tokio::test]
    async fn test_peer_dropped() {
        let (mut host, sensor) = MemoryTransport::pair("host", "sensor");
        host.connect().await.unwrap();
        drop(sensor);

        assert!(matches!(host.send(&[1]).await, Err(Error::ConnectionClosed)));
        assert!(matches!(
            host.receive(Duration::from_millis(10)).await,
            Err(Error::ConnectionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_drops_queued_input() {
        let (mut host, mut sensor) = MemoryTransport::pair("host", "sensor");
        host.connect().await.unwrap();
        sensor.connect().await.unwrap();

        sensor.send(&[1, 2]).await.unwrap();
        sensor.send(&[3]).await.unwrap();

        assert_eq!(host.drain().await.unwrap(), 3);
        assert!(matches!(
            host.receive(Duration::from_millis(5)).await,
            Err(Error::ReadTimeout)
        ));
    }
}
