//! Error type shared by the device client, the session and the CSV sink.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// BlueZ reported an error while talking to the adapter or the headset.
    #[error("bluetooth error: {0}")]
    Bluetooth(#[from] bluer::Error),

    #[error("no device named {prefix}* was discovered within {timeout_secs}s")]
    DeviceNotFound { prefix: String, timeout_secs: u64 },

    #[error("headset does not expose characteristic {0}")]
    MissingCharacteristic(bluer::Uuid),

    #[error("headset is not connected")]
    NotConnected,

    #[error("stream has already been subscribed to")]
    AlreadySubscribed,

    /// Establishing the session failed. Wraps the cause.
    #[error("failed to connect to headset")]
    Connect(#[source] Box<Error>),

    /// Starting the data stream failed. Wraps the cause.
    #[error("failed to start streaming")]
    Start(#[source] Box<Error>),

    #[error("failed to open {}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write record")]
    Write(#[source] io::Error),

    #[error("failed to listen for OSC on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Failure raised by a non-Bluetooth headset implementation.
    #[error("device error: {0}")]
    Device(String),
}

impl Error {
    /// Returns the innermost cause of a `Connect` or `Start` failure.
    pub fn root(&self) -> &Error {
        match self {
            Error::Connect(inner) | Error::Start(inner) => inner.root(),
            other => other,
        }
    }
}
