//! Image upgrade: erase followed by upload, surviving dropped links.
//!
//! Some devices drop the link while flash is being erased or written. The
//! upgrade runs this sequence:
//!
//! 1. Erase the secondary slot (skipped with `no_erase`).
//! 2. If the erase failed because the session closed, reopen it. If the
//!    reopen fails, abort. Otherwise continue without retrying the erase; its
//!    outcome is unknown and recorded as an empty result.
//! 3. Upload the image. If the session closes mid-upload, reopen it and
//!    resume from the last offset the device acknowledged. There is no retry
//!    limit; the session's own timeouts bound each attempt.
//!
//! Only transport errors are rescued. Anything else, including a transport
//! error on a session that still reports itself open, aborts the upgrade.

use std::fmt;

use nmx_proto::{RcRsp, ReturnCode, UploadRsp};
use tracing::{info, warn};

use super::{ImageErase, ImageUpload, Kind, Progress, Responses, Xact};
use crate::error::{Error, Result};
use crate::session::{Session, TxOptions};

/// Erases the secondary slot and uploads a new image.
///
/// Defaults: erase first, no progress callback.
#[must_use = "a transaction does nothing until .run() is called"]
pub struct ImageUpgrade<'a> {
    /// Transmit options for both phases.
    opts: TxOptions,
    /// Whole image.
    data: &'a [u8],
    /// Skip the erase phase.
    no_erase: bool,
    /// Called once per acknowledged chunk, across all upload attempts.
    progress: Option<Progress<'a, UploadRsp>>,
}

/// Outcome of a completed upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeResult {
    /// Erase phase; `None` when skipped, empty when its response was lost.
    pub erase: Option<Responses<RcRsp>>,
    /// Responses of the final, successful upload attempt.
    pub upload: Responses<UploadRsp>,
}

impl ReturnCode for UpgradeResult {
    /// Status of the upload phase.
    fn rc(&self) -> i32 {
        self.upload.status()
    }
}

impl UpgradeResult {
    /// Return code of the last upload response, or `RC_UNKNOWN` if none.
    pub fn status(&self) -> i32 {
        self.rc()
    }
}

impl<'a> ImageUpgrade<'a> {
    /// Creates an upgrade to `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            opts: TxOptions::default(),
            data,
            no_erase: false,
            progress: None,
        }
    }

    /// Skips the erase phase.
    pub fn no_erase(mut self, skip: bool) -> Self {
        self.no_erase = skip;
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

    fn run_erase(&self, s: &mut dyn Session) -> Result<Responses<RcRsp>> {
        info!("erasing secondary slot");
        match ImageErase::new().tx_options(self.opts).run(s) {
            Ok(res) => Ok(res),
            Err(e) => {
                rescue(s, e)?;
                // Reconnected, but the erase response never arrived.
                Ok(Responses::new())
            }
        }
    }

    fn run_upload(&mut self, s: &mut dyn Session) -> Result<Responses<UploadRsp>> {
        let mut confirmed = 0;
        loop {
            info!(off = confirmed, len = self.data.len(), "uploading image");
            let user = &mut self.progress;
            let resume = confirmed;
            let attempt = ImageUpload::new(self.data)
                .start_off(resume)
                .tx_options(self.opts)
                .on_progress(|rsp| {
                    if rsp.rc == 0 {
                        confirmed = rsp.off as usize;
                    }
                    if let Some(cb) = user.as_mut() {
                        cb(rsp);
                    }
                })
                .run(s);

            match attempt {
                Ok(res) => return Ok(res),
                Err(e) => rescue(s, e)?,
            }
        }
    }
}

/// Recovers from a dropped link by reopening the session.
///
/// Returns `err` unchanged when it is not a transport failure, when the
/// session is still open, or when reopening fails.
fn rescue(s: &mut dyn Session, err: Error) -> Result<()> {
    if !err.is_transport() {
        return Err(err);
    }
    if s.is_open() {
        warn!(error = %err, "transport failed on an open session; aborting");
        return Err(err);
    }
    warn!(error = %err, "session closed; reconnecting");
    match s.open() {
        Ok(()) => {
            info!("session reopened");
            Ok(())
        }
        Err(reopen) => {
            warn!(error = %reopen, "reconnect failed");
            Err(err)
        }
    }
}

impl fmt::Debug for ImageUpgrade<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageUpgrade")
            .field("opts", &self.opts)
            .field("len", &self.data.len())
            .field("no_erase", &self.no_erase)
            .finish_non_exhaustive()
    }
}

impl Xact for ImageUpgrade<'_> {
    type Output = UpgradeResult;

    fn kind(&self) -> Kind {
        Kind::ImageUpgrade
    }

    fn run(mut self, s: &mut dyn Session) -> Result<Self::Output> {
        let erase = if self.no_erase {
            None
        } else {
            Some(self.run_erase(s)?)
        };
        let upload = self.run_upload(s)?;
        info!(status = upload.status(), "upgrade finished");
        Ok(UpgradeResult { erase, upload })
    }
}
