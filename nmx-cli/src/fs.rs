//! File system commands: upload, download.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nmx::{
    DownloadRsp, FsDownload, FsUpload, Progress, Responses, StreamSession, TxOptions, Xact,
};

use crate::report;

/// Subcommands for `nmx fs`.
#[derive(clap::Subcommand)]
pub enum FsCmd {
    /// Upload a local file to the device.
    Upload {
        /// Local file to send.
        src: PathBuf,
        /// Destination path on the device.
        dst: String,
    },
    /// Download a file from the device.
    Download {
        /// Source path on the device.
        src: String,
        /// Local file to write (created or truncated).
        dst: PathBuf,
    },
}

pub fn run(cmd: FsCmd, s: &mut StreamSession, opts: TxOptions) -> Result<()> {
    match cmd {
        FsCmd::Upload { src, dst } => {
            let data = std::fs::read(&src).with_context(|| format!("read {}", src.display()))?;
            let res = FsUpload::new(dst, &data)
                .tx_options(opts)
                .on_progress(|r| println!("{}", r.off))
                .run(s)?;
            report(res.status());
        }
        FsCmd::Download { src, dst } => {
            let res = save_chunks(&dst, |sink| {
                FsDownload::new(src).tx_options(opts).on_progress(sink).run(s)
            })?;
            report(res.status());
        }
    }
    Ok(())
}

/// Runs a chunked download, writing each chunk to `dst` as it arrives.
///
/// `start` receives the per-chunk callback and runs the transaction.
pub(crate) fn save_chunks(
    dst: &Path,
    start: impl for<'x> FnOnce(Progress<'x, DownloadRsp>) -> nmx::Result<Responses<DownloadRsp>>,
) -> Result<Responses<DownloadRsp>> {
    let mut file = File::create(dst).with_context(|| format!("create {}", dst.display()))?;
    let mut failed: Option<io::Error> = None;

    let res = start(Box::new(|r: &DownloadRsp| {
        println!("{}", r.off);
        if failed.is_none()
            && let Err(e) = file.write_all(&r.data)
        {
            failed = Some(e);
        }
    }))?;

    if let Some(e) = failed {
        return Err(e).with_context(|| format!("write {}", dst.display()));
    }
    file.flush()?;
    Ok(res)
}
