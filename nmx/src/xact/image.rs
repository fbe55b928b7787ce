//! Image management: upload, erase, and slot state.

use std::fmt;

use nmx_proto::{ImageStateRsp, RcRsp, Request, Response, StateWriteReq, UploadReq, UploadRsp};

use super::chunk::Upload;
use super::{Kind, Progress, Responses, Xact, round_trip};
use crate::error::Result;
use crate::session::{Session, TxOptions};

/// Uploads a firmware image to the secondary slot in MTU-sized chunks.
///
/// Defaults: start at offset 0, no progress callback.
#[must_use = "a transaction does nothing until .run() is called"]
pub struct ImageUpload<'a> {
    /// Transmit options.
    opts: TxOptions,
    /// Whole image.
    data: &'a [u8],
    /// Offset already confirmed by the device.
    start_off: usize,
    /// Called once per acknowledged chunk.
    progress: Option<Progress<'a, UploadRsp>>,
}

impl<'a> ImageUpload<'a> {
    /// Creates an upload of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            opts: TxOptions::default(),
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

impl fmt::Debug for ImageUpload<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageUpload")
            .field("opts", &self.opts)
            .field("len", &self.data.len())
            .field("start_off", &self.start_off)
            .finish_non_exhaustive()
    }
}

/// Builds an image upload chunk request.
fn upload_req(off: u32, len: Option<u32>, data: &[u8]) -> Request {
    Request::ImageUpload(UploadReq {
        off,
        len,
        data: data.to_vec(),
    })
}

impl Xact for ImageUpload<'_> {
    type Output = Responses<UploadRsp>;

    fn kind(&self) -> Kind {
        Kind::ImageUpload
    }

    fn run(self, s: &mut dyn Session) -> Result<Self::Output> {
        let upload = Upload {
            kind: Kind::ImageUpload,
            opts: self.opts,
            data: self.data,
            start_off: self.start_off,
            progress: self.progress,
        };
        upload.run(s, &upload_req, |rsp| match rsp {
            Response::ImageUpload(r) => Some(r),
            _ => None,
        })
    }
}

/// Erases the secondary image slot.
#[derive(Debug, Clone, Copy, Default)]
#[must_use = "a transaction does nothing until .run() is called"]
pub struct ImageErase {
    /// Transmit options.
    opts: TxOptions,
}

impl ImageErase {
    /// Creates an erase transaction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transmit options.
    pub const fn tx_options(mut self, opts: TxOptions) -> Self {
        self.opts = opts;
        self
    }
}

impl Xact for ImageErase {
    type Output = Responses<RcRsp>;

    fn kind(&self) -> Kind {
        Kind::ImageErase
    }

    fn run(self, s: &mut dyn Session) -> Result<Self::Output> {
        round_trip(s, Kind::ImageErase, &Request::ImageErase, &self.opts, |rsp| {
            match rsp {
                Response::ImageErase(r) => Some(r),
                _ => None,
            }
        })
    }
}

/// Parses an image state response.
fn image_state(rsp: Response) -> Option<ImageStateRsp> {
    match rsp {
        Response::ImageState(r) => Some(r),
        _ => None,
    }
}

/// Reads the state of every image slot.
#[derive(Debug, Clone, Copy, Default)]
#[must_use = "a transaction does nothing until .run() is called"]
pub struct ImageStateRead {
    /// Transmit options.
    opts: TxOptions,
}

impl ImageStateRead {
    /// Creates a state query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transmit options.
    pub const fn tx_options(mut self, opts: TxOptions) -> Self {
        self.opts = opts;
        self
    }
}

impl Xact for ImageStateRead {
    type Output = Responses<ImageStateRsp>;

    fn kind(&self) -> Kind {
        Kind::ImageStateRead
    }

    fn run(self, s: &mut dyn Session) -> Result<Self::Output> {
        round_trip(
            s,
            Kind::ImageStateRead,
            &Request::ImageStateRead,
            &self.opts,
            image_state,
        )
    }
}

/// Marks an image for test boot, or confirms one.
///
/// Without a hash the running image is confirmed. With a hash, the matching
/// image boots on next reset, once (`confirm = false`) or permanently.
/// Defaults: no hash, `confirm = false`.
#[derive(Debug, Clone, Default)]
#[must_use = "a transaction does nothing until .run() is called"]
pub struct ImageStateWrite {
    /// Transmit options.
    opts: TxOptions,
    /// Target image hash.
    hash: Option<Vec<u8>>,
    /// Make the change permanent.
    confirm: bool,
}

impl ImageStateWrite {
    /// Creates a state change targeting the running image.
    pub fn new() -> Self {
        Self::default()
    }

    /// Targets the image with `hash`.
    pub fn hash(mut self, hash: impl Into<Vec<u8>>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    /// Sets whether the change is permanent.
    pub fn confirm(mut self, confirm: bool) -> Self {
        self.confirm = confirm;
        self
    }

    /// Sets the transmit options.
    pub fn tx_options(mut self, opts: TxOptions) -> Self {
        self.opts = opts;
        self
    }
}

impl Xact for ImageStateWrite {
    type Output = Responses<ImageStateRsp>;

    fn kind(&self) -> Kind {
        Kind::ImageStateWrite
    }

    fn run(self, s: &mut dyn Session) -> Result<Self::Output> {
        let req = Request::ImageStateWrite(StateWriteReq {
            hash: self.hash,
            confirm: self.confirm,
        });
        round_trip(s, Kind::ImageStateWrite, &req, &self.opts, image_state)
    }
}
