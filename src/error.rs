//! Error types for the USB MIDI host.

use thiserror::Error;

use crate::usb::DeviceId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("USB error: {0}")]
    Usb(String),

    /// No data arrived before the read timeout elapsed
    #[error("USB transfer timed out")]
    Timeout,

    #[error("USB device disconnected")]
    Disconnected,

    #[error("USB device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("No MIDI endpoint on device {0}")]
    NoMidiEndpoint(DeviceId),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid hex dump: {0}")]
    InvalidDump(String),
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::InvalidDump(e.to_string())
    }
}

#[cfg(feature = "rusb")]
impl From<rusb::Error> for Error {
    fn from(e: rusb::Error) -> Self {
        match e {
            rusb::Error::Timeout => Error::Timeout,
            rusb::Error::NoDevice => Error::Disconnected,
            rusb::Error::NotFound => Error::Usb("entity not found".to_string()),
            other => Error::Usb(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
