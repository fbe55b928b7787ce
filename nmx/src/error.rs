//! Error types for nmx transactions.

use std::io;

use crate::xact::Kind;

/// Alias for `Result<T, nmx::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by sessions and transactions.
///
/// A nonzero device return code is not an error; it is reported through
/// the transaction result's `status()`.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Sending a request or receiving its response failed.
    #[error("transport: {0}")]
    Transport(#[source] io::Error),

    /// The MTU cannot carry any payload once framing overhead is paid.
    #[error("MTU too low to fit any data; mtu={mtu}, overhead={overhead}")]
    InsufficientMtu {
        /// Outbound MTU of the session.
        mtu: usize,
        /// Framed size of the request without payload.
        overhead: usize,
    },

    /// A framed request does not fit the session MTU.
    #[error("request of {len} bytes exceeds MTU {mtu}")]
    Oversize {
        /// Framed request size.
        len: usize,
        /// Outbound MTU of the session.
        mtu: usize,
    },

    /// A message could not be framed or unframed.
    #[error(transparent)]
    Codec(#[from] nmx_proto::CodecError),

    /// The device answered with a response of the wrong kind.
    #[error("unexpected response to {expected} request")]
    UnexpectedResponse {
        /// Transaction that received the response.
        expected: Kind,
    },

    /// A length or offset does not fit the 32-bit wire field.
    #[error("length {0} exceeds the 32-bit offset field")]
    TooLarge(usize),
}

impl Error {
    /// Returns `true` for failures of the link rather than the device or encoding.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Builds a transport error for an operation on a closed session.
    pub(crate) fn not_connected() -> Self {
        Self::Transport(io::Error::new(
            io::ErrorKind::NotConnected,
            "session is closed",
        ))
    }
}
