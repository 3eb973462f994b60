//! Byte sinks for finished wire buffers.
//!
//! A transport is opened lazily, written once per frame, and closed on the
//! first write error. Reopening is left to the driver, which retries closed
//! transports at the throttle interval, never in a loop here.

mod opc;
mod serial;

pub use opc::{OpcConnection, OpcPool};
pub use serial::{SerialPort, discover};

use crate::error::TransportError;

pub trait Transport: Send {
    /// Open the connection. Succeeds immediately if already open.
    fn open(&mut self) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    /// Write one whole frame. A failed write closes the transport.
    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    fn close(&mut self);

    /// Human-readable endpoint for logs and status.
    fn describe(&self) -> String;
}
