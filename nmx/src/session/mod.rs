//! Session abstraction consumed by transactions.
//!
//! A session is a stateful link to one device. Transactions only ever use
//! it through [`Session`]; opening, closing, framing and retransmission are
//! the session's business.

mod stream;

use std::time::Duration;

use nmx_proto::{ProtocolVariant, Request, Response};

use crate::error::Result;

pub use stream::{DEFAULT_MTU, Endpoint, SessionConfig, StreamSession};

/// Default time to wait for a response before retransmitting.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-request transmit configuration.
///
/// Owned by the transaction, interpreted by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOptions {
    /// Time to wait for each response.
    pub timeout: Duration,
    /// Total transmissions of a request before giving up (at least one).
    pub tries: u32,
}

impl Default for TxOptions {
    /// 10 second timeout, a single try.
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            tries: 1,
        }
    }
}

/// A link to a device carrying one request at a time.
pub trait Session {
    /// Returns `true` while the link is usable.
    fn is_open(&self) -> bool;

    /// Opens (or reopens) the link. Opening an open session is a no-op.
    fn open(&mut self) -> Result<()>;

    /// Closes the link. Closing a closed session is a no-op.
    fn close(&mut self);

    /// Maximum size of one framed outbound message.
    fn mtu_out(&self) -> usize;

    /// Wire encoding used by this session.
    fn proto(&self) -> ProtocolVariant;

    /// Framed size of `req` as this session would send it.
    fn encoded_len(&self, req: &Request) -> Result<usize> {
        Ok(nmx_proto::frame(self.proto(), &req.header(0), req)?.len())
    }

    /// Sends `req` and blocks until the matching response arrives.
    fn tx(&mut self, req: &Request, opts: &TxOptions) -> Result<Response>;
}
