//! Device management transactions.
//!
//! A transaction is one logical operation (upload an image, read slot
//! state, ...) that may take several request/response round trips. It is
//! built with its parameters, consumed by [`Xact::run`] against an open
//! [`Session`], and yields a [`Responses`] record of every response the
//! device sent.
//!
//! Transactions never retry: a transport failure ends `run` with an error.
//! Retrying is left to the caller, or to [`ImageUpgrade`] which rescues
//! dropped links itself.

mod chunk;
mod coredump;
mod fs;
mod image;
#[cfg(test)]
mod sim;
mod stat;
mod upgrade;

use std::fmt;

use nmx_proto::{RC_UNKNOWN, Request, Response, ReturnCode};

use crate::error::{Error, Result};
use crate::session::{Session, TxOptions};

pub use self::chunk::next_chunk;
pub use self::coredump::{CoreErase, CoreList, CoreLoad};
pub use self::fs::{FsDownload, FsUpload};
pub use self::image::{ImageErase, ImageStateRead, ImageStateWrite, ImageUpload};
pub use self::stat::TaskStat;
pub use self::upgrade::{ImageUpgrade, UpgradeResult};

/// Progress callback, invoked once per received response.
pub type Progress<'a, R> = Box<dyn FnMut(&R) + 'a>;

/// Kind of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Kind {
    /// Chunked firmware image upload.
    ImageUpload,
    /// Secondary slot erase.
    ImageErase,
    /// Slot state query.
    ImageStateRead,
    /// Slot state change.
    ImageStateWrite,
    /// Erase followed by upload, with disconnect rescue.
    ImageUpgrade,
    /// Core dump presence query.
    CoreList,
    /// Chunked core dump download.
    CoreLoad,
    /// Core dump erase.
    CoreErase,
    /// Chunked file upload.
    FsUpload,
    /// Chunked file download.
    FsDownload,
    /// Task statistics query.
    TaskStat,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ImageUpload => "image upload",
            Self::ImageErase => "image erase",
            Self::ImageStateRead => "image state read",
            Self::ImageStateWrite => "image state write",
            Self::ImageUpgrade => "image upgrade",
            Self::CoreList => "core list",
            Self::CoreLoad => "core load",
            Self::CoreErase => "core erase",
            Self::FsUpload => "fs upload",
            Self::FsDownload => "fs download",
            Self::TaskStat => "task stat",
        })
    }
}

/// A device management transaction.
pub trait Xact {
    /// Result of a completed run.
    type Output;

    /// Which operation this is.
    fn kind(&self) -> Kind;

    /// Performs the transaction, blocking until it completes or fails.
    fn run(self, s: &mut dyn Session) -> Result<Self::Output>;
}

/// Responses recorded during one transaction run, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Responses<R> {
    /// Recorded responses.
    rsps: Vec<R>,
}

impl<R> Default for Responses<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Responses<R> {
    /// Creates an empty record.
    pub const fn new() -> Self {
        Self { rsps: Vec::new() }
    }

    /// Creates a record holding exactly one response.
    pub(crate) fn single(rsp: R) -> Self {
        Self { rsps: vec![rsp] }
    }

    /// Appends a response.
    pub(crate) fn push(&mut self, rsp: R) {
        self.rsps.push(rsp);
    }

    /// Returns the most recent response.
    pub fn last(&self) -> Option<&R> {
        self.rsps.last()
    }

    /// Returns all responses in arrival order.
    pub fn as_slice(&self) -> &[R] {
        &self.rsps
    }

    /// Iterates over responses in arrival order.
    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.rsps.iter()
    }

    /// Number of recorded responses.
    pub fn len(&self) -> usize {
        self.rsps.len()
    }

    /// Returns `true` if the device never answered.
    pub fn is_empty(&self) -> bool {
        self.rsps.is_empty()
    }

    /// Consumes the record, returning the responses.
    pub fn into_vec(self) -> Vec<R> {
        self.rsps
    }
}

impl<R: ReturnCode> Responses<R> {
    /// Return code of the last response, or [`RC_UNKNOWN`] if there is none.
    pub fn status(&self) -> i32 {
        self.rsps.last().map_or(RC_UNKNOWN, ReturnCode::rc)
    }
}

/// Performs a single request/response round trip.
fn round_trip<R>(
    s: &mut dyn Session,
    kind: Kind,
    req: &Request,
    opts: &TxOptions,
    parse: fn(Response) -> Option<R>,
) -> Result<Responses<R>> {
    let rsp = s.tx(req, opts)?;
    let rsp = parse(rsp).ok_or(Error::UnexpectedResponse { expected: kind })?;
    Ok(Responses::single(rsp))
}

impl<'a, R> IntoIterator for &'a Responses<R> {
    type Item = &'a R;
    type IntoIter = std::slice::Iter<'a, R>;

    fn into_iter(self) -> Self::IntoIter {
        self.rsps.iter()
    }
}

impl<R> IntoIterator for Responses<R> {
    type Item = R;
    type IntoIter = std::vec::IntoIter<R>;

    fn into_iter(self) -> Self::IntoIter {
        self.rsps.into_iter()
    }
}
