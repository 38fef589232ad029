//! Error types for the call engine
//!
//! Only configuration problems propagate to the caller; everything that can
//! happen per frame or per session while a call is running is absorbed
//! locally (logged) so the other active streams keep flowing.

use thiserror::Error;

use crate::types::SessionId;

/// Result type alias for rtpcall operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the call engine
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid call setup: bad channel ordering, channel added after start,
    /// missing transport. Fatal to the call being configured.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A decode chain could not be bound to an arrived network pad. The
    /// session stays non-functional, the call continues.
    #[error("failed to link session {session}: {details}")]
    Link {
        /// Session that failed to link
        session: SessionId,
        /// What went wrong
        details: String,
    },

    /// A corrupt OSC packet or depth frame. Converted into an empty result
    /// at the API surface, never fatal.
    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    /// A frame or audio quantum failed to enter the pipeline (downstream
    /// full or closed). The frame is dropped, processing continues.
    #[error("transient push failure: {0}")]
    TransientPush(String),

    /// The remote peer disconnected. Recoverable: triggers a full reset.
    #[error("remote peer disconnected")]
    RemoteDisconnect,

    /// Socket level failure while setting up a transport
    #[error("transport error: {0}")]
    Transport(String),

    /// I/O error from the underlying sockets
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }
}
