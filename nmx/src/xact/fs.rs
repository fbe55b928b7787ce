//! File transfer to and from the device file system.

use std::fmt;

use nmx_proto::{DownloadRsp, FileDownloadReq, FileUploadReq, Request, Response, UploadReq, UploadRsp};

use super::chunk::{Upload, download};
use super::{Kind, Progress, Responses, Xact};
use crate::error::Result;
use crate::session::{Session, TxOptions};

/// Writes a file on the device in MTU-sized chunks.
///
/// Defaults: start at offset 0, no progress callback.
#[must_use = "a transaction does nothing until .run() is called"]
pub struct FsUpload<'a> {
    /// Transmit options.
    opts: TxOptions,
    /// Destination path on the device.
    name: String,
    /// File contents.
    data: &'a [u8],
    /// Offset already confirmed by the device.
    start_off: usize,
    /// Called once per acknowledged chunk.
    progress: Option<Progress<'a, UploadRsp>>,
}

impl<'a> FsUpload<'a> {
    /// Creates an upload of `data` to `name`.
    pub fn new(name: impl Into<String>, data: &'a [u8]) -> Self {
        Self {
            opts: TxOptions::default(),
            name: name.into(),
            data,
            start_off: 0,
            progress: None,
        }
    }

    /// Resumes from `off`, which the device has already confirmed.
    pub fn start_off(mut self, off: usize) -> Self {
        self.start_off = off;
        self
    }

    /// Sets the transmit options.
    pub fn tx_options(mut self, opts: TxOptions) -> Self {
        self.opts = opts;
        self
    }

    /// Sets a callback invoked once per chunk acknowledgement.
    pub fn on_progress(mut self, f: impl FnMut(&UploadRsp) + 'a) -> Self {
        self.progress = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for FsUpload<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsUpload")
            .field("opts", &self.opts)
            .field("name", &self.name)
            .field("len", &self.data.len())
            .field("start_off", &self.start_off)
            .finish_non_exhaustive()
    }
}

impl Xact for FsUpload<'_> {
    type Output = Responses<UploadRsp>;

    fn kind(&self) -> Kind {
        Kind::FsUpload
    }

    fn run(self, s: &mut dyn Session) -> Result<Self::Output> {
        let name = self.name;
        let upload = Upload {
            kind: Kind::FsUpload,
            opts: self.opts,
            data: self.data,
            start_off: self.start_off,
            progress: self.progress,
        };
        upload.run(
            s,
            &|off, len, data| {
                Request::FsUpload(FileUploadReq {
                    name: name.clone(),
                    chunk: UploadReq {
                        off,
                        len,
                        data: data.to_vec(),
                    },
                })
            },
            |rsp| match rsp {
                Response::FsUpload(r) => Some(r),
                _ => None,
            },
        )
    }
}

/// Reads a file from the device, chunk by chunk, from offset zero.
#[must_use = "a transaction does nothing until .run() is called"]
pub struct FsDownload<'a> {
    /// Transmit options.
    opts: TxOptions,
    /// Source path on the device.
    name: String,
    /// Receives every chunk in offset order.
    progress: Option<Progress<'a, DownloadRsp>>,
}

impl<'a> FsDownload<'a> {
    /// Creates a download of `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            opts: TxOptions::default(),
            name: name.into(),
            progress: None,
        }
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

impl fmt::Debug for FsDownload<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsDownload")
            .field("opts", &self.opts)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Xact for FsDownload<'_> {
    type Output = Responses<DownloadRsp>;

    fn kind(&self) -> Kind {
        Kind::FsDownload
    }

    fn run(self, s: &mut dyn Session) -> Result<Self::Output> {
        let name = self.name;
        download(
            s,
            Kind::FsDownload,
            &self.opts,
            self.progress,
            &|off| {
                Request::FsDownload(FileDownloadReq {
                    name: name.clone(),
                    off,
                })
            },
            |rsp| match rsp {
                Response::FsDownload(r) => Some(r),
                _ => None,
            },
        )
    }
}
