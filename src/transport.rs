//! Seam between the protocol engine and a BLE stack.
//!
//! A stack adapter implements [`Transport`] for the outbound primitives and
//! feeds [`TransportEvent`]s into a [`TransportEventChannel`] from its
//! callbacks. Events must be delivered in order on a single stream.

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Channel};
use std::fmt;

pub type TransportEventChannel<P> = Channel<CriticalSectionRawMutex, TransportEvent<P>, 16>;

#[derive(Debug)]
pub enum TransportError {
    ScanFailed(String),
    ConnectionFailed(String),
    NotifyFailed(String),
    WriteFailed(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransportError::ScanFailed(msg) => write!(f, "Scan failed: {}", msg),
            TransportError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            TransportError::NotifyFailed(msg) => write!(f, "Enabling notifications failed: {}", msg),
            TransportError::WriteFailed(msg) => write!(f, "Write failed: {}", msg),
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent<P> {
    Discovered { peripheral: P, address: String },
    Connected(P),
    Disconnected(P),
    Notification(Vec<u8>),
}

/// Outbound BLE primitives. Writes are write-without-response: success only
/// means the stack accepted the bytes.
pub trait Transport {
    type Peripheral: Clone + PartialEq + fmt::Debug;
    type Characteristic: Clone + fmt::Debug;

    fn start_scan(&mut self, address: &str) -> Result<(), TransportError>;

    fn stop_scan(&mut self);

    fn connect(&mut self, peripheral: &Self::Peripheral) -> Result<(), TransportError>;

    fn cancel_connection(&mut self, peripheral: &Self::Peripheral);

    fn characteristic(
        &mut self,
        peripheral: &Self::Peripheral,
        service: uuid::Uuid,
        characteristic: uuid::Uuid,
    ) -> Option<Self::Characteristic>;

    fn set_notify(
        &mut self,
        peripheral: &Self::Peripheral,
        characteristic: &Self::Characteristic,
        enabled: bool,
    ) -> Result<(), TransportError>;

    fn write(
        &mut self,
        peripheral: &Self::Peripheral,
        characteristic: &Self::Characteristic,
        data: &[u8],
    ) -> Result<(), TransportError>;
}
