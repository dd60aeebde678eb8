//! Trait abstraction for the serial link to enable testing.
//!
//! The session engine never blocks on the port: writes complete promptly
//! and reads return whatever bytes are already pending.

use async_trait::async_trait;

use crate::error::TransportError;

/// I/O boundary between the session engine and a serial device.
#[async_trait]
pub trait Transport: Send {
    /// Write a complete frame to the device
    async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Return pending inbound bytes without waiting; empty when nothing
    /// has arrived
    async fn read_available(&mut self) -> Result<Vec<u8>, TransportError>;

    /// Whether the underlying port is still usable
    fn is_open(&self) -> bool;
}
