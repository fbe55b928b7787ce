//! Core dump retrieval and removal.

use std::fmt;

use nmx_proto::{DownloadReq, DownloadRsp, RcRsp, Request, Response};

use super::chunk::download;
use super::{Kind, Progress, Responses, Xact, round_trip};
use crate::error::Result;
use crate::session::{Session, TxOptions};

/// Asks whether the device holds a core dump.
///
/// Status is zero when a core dump is present.
#[derive(Debug, Clone, Copy, Default)]
#[must_use = "a transaction does nothing until .run() is called"]
pub struct CoreList {
    /// Transmit options.
    opts: TxOptions,
}

impl CoreList {
    /// Creates a core dump query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transmit options.
    pub const fn tx_options(mut self, opts: TxOptions) -> Self {
        self.opts = opts;
        self
    }
}

impl Xact for CoreList {
    type Output = Responses<RcRsp>;

    fn kind(&self) -> Kind {
        Kind::CoreList
    }

    fn run(self, s: &mut dyn Session) -> Result<Self::Output> {
        round_trip(s, Kind::CoreList, &Request::CoreList, &self.opts, |rsp| {
            match rsp {
                Response::CoreList(r) => Some(r),
                _ => None,
            }
        })
    }
}

/// Downloads the core dump, chunk by chunk, from offset zero.
#[derive(Default)]
#[must_use = "a transaction does nothing until .run() is called"]
pub struct CoreLoad<'a> {
    /// Transmit options.
    opts: TxOptions,
    /// Receives every chunk in offset order.
    progress: Option<Progress<'a, DownloadRsp>>,
}

impl<'a> CoreLoad<'a> {
    /// Creates a core dump download.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transmit options.
    pub fn tx_options(mut self, opts: TxOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Sets a callback invoked once per received chunk.
    pub fn on_progress(mut self, f: impl FnMut(&DownloadRsp) + 'a) -> Self {
        self.progress = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for CoreLoad<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoreLoad")
            .field("opts", &self.opts)
            .finish_non_exhaustive()
    }
}

impl Xact for CoreLoad<'_> {
    type Output = Responses<DownloadRsp>;

    fn kind(&self) -> Kind {
        Kind::CoreLoad
    }

    fn run(self, s: &mut dyn Session) -> Result<Self::Output> {
        download(
            s,
            Kind::CoreLoad,
            &self.opts,
            self.progress,
            &|off| Request::CoreLoad(DownloadReq { off }),
            |rsp| match rsp {
                Response::CoreLoad(r) => Some(r),
                _ => None,
            },
        )
    }
}

/// Erases the core dump.
#[derive(Debug, Clone, Copy, Default)]
#[must_use = "a transaction does nothing until .run() is called"]
pub struct CoreErase {
    /// Transmit options.
    opts: TxOptions,
}

impl CoreErase {
    /// Creates a core dump erase.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transmit options.
    pub const fn tx_options(mut self, opts: TxOptions) -> Self {
        self.opts = opts;
        self
    }
}

impl Xact for CoreErase {
    type Output = Responses<RcRsp>;

    fn kind(&self) -> Kind {
        Kind::CoreErase
    }

    fn run(self, s: &mut dyn Session) -> Result<Self::Output> {
        round_trip(s, Kind::CoreErase, &Request::CoreErase, &self.opts, |rsp| {
            match rsp {
                Response::CoreErase(r) => Some(r),
                _ => None,
            }
        })
    }
}
