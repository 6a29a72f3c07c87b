//! Transport layer for fingerprint sensors
//!
//! Sensors speak a packetized protocol over some byte link (USB bulk
//! endpoints, a serial line, a socket to an emulator). Drivers only see the
//! [`Transport`] trait; enumeration and link setup live outside this crate.

pub mod error;
pub mod memory;

pub use error::{Error, Result};
pub use memory::MemoryTransport;

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;

/// Receive timeout used while draining stale input
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);

/// Transport trait for different communication methods
#[async_trait]
pub trait Transport: Send + Sync {
    /// Claim the link
    async fn connect(&mut self) -> Result<()>;

    /// Release the link
    async fn disconnect(&mut self) -> Result<()>;

    /// Check if connected
    fn is_connected(&self) -> bool;

    /// Send raw bytes
    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive raw bytes (with timeout)
    async fn receive(&mut self, timeout: Duration) -> Result<BytesMut>;

    /// Human readable name of the other end
    fn endpoint(&self) -> String;

    /// Throw away anything still queued on the receive side
    ///
    /// Returns the number of bytes dropped.
    async fn drain(&mut self) -> Result<usize> {
        let mut dropped = 0;
        loop {
            match self.receive(DRAIN_TIMEOUT).await {
                Ok(buf) => dropped += buf.len(),
                Err(Error::ReadTimeout) => return Ok(dropped),
                Err(e) => return Err(e),
            }
        }
    }
}
