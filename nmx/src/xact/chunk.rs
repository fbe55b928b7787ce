//! Chunk sizing and the chunked upload/download loops.
//!
//! Upload requests carry as much payload as fits the session MTU once the
//! request is framed. Framing overhead depends on the offset (variable-width
//! integers) and on whether the total length is present (first chunk only),
//! so every chunk is sized against an empty request framed at its own offset.

use nmx_proto::{DownloadRsp, Request, Response, UploadRsp};
use tracing::{debug, warn};

use super::{Kind, Progress, Responses};
use crate::error::{Error, Result};
use crate::session::{Session, TxOptions};

/// Converts a length or offset to its 32-bit wire form.
pub(crate) fn wire_u32(n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|_| Error::TooLarge(n))
}

/// Computes the largest prefix of `remaining` that fits one request at `off`.
///
/// `build(off, len, data)` creates the request for this transfer; `len` is
/// `Some(total_len)` only at offset zero. The payload is first sized to the
/// room left by an empty request, then shrunk once by however many bytes the
/// framed request overshoots the MTU. Encodings whose overhead grows at a
/// length boundary may leave the chunk one byte short of the true maximum.
///
/// Fails with [`Error::InsufficientMtu`] if no payload fits at all.
pub fn next_chunk<'d>(
    s: &dyn Session,
    total_len: usize,
    remaining: &'d [u8],
    off: usize,
    build: &dyn Fn(u32, Option<u32>, &[u8]) -> Request,
) -> Result<&'d [u8]> {
    let off32 = wire_u32(off)?;
    let len = if off == 0 {
        Some(wire_u32(total_len)?)
    } else {
        None
    };
    let mtu = s.mtu_out();

    let overhead = s.encoded_len(&build(off32, len, &[]))?;
    let room = mtu.saturating_sub(overhead);
    if room == 0 {
        return Err(Error::InsufficientMtu { mtu, overhead });
    }

    let mut n = room.min(remaining.len());
    let framed = s.encoded_len(&build(off32, len, &remaining[..n]))?;
    if framed > mtu {
        n = n.saturating_sub(framed - mtu);
    }
    if n == 0 && !remaining.is_empty() {
        return Err(Error::InsufficientMtu { mtu, overhead });
    }
    Ok(&remaining[..n])
}

/// Shared state of a chunked upload.
pub(crate) struct Upload<'a, 'p> {
    /// Transaction kind, for error reporting.
    pub kind: Kind,
    /// Transmit options.
    pub opts: TxOptions,
    /// Whole object being uploaded.
    pub data: &'a [u8],
    /// Offset of the first chunk to send.
    pub start_off: usize,
    /// Caller progress callback.
    pub progress: Option<Progress<'p, UploadRsp>>,
}

impl Upload<'_, '_> {
    /// Sends chunks until the device has acknowledged everything or rejects one.
    ///
    /// The cursor follows the offset reported by the device, never the offset
    /// of the request, so partially accepted chunks are resent.
    pub(crate) fn run(
        mut self,
        s: &mut dyn Session,
        build: &dyn Fn(u32, Option<u32>, &[u8]) -> Request,
        parse: fn(Response) -> Option<UploadRsp>,
    ) -> Result<Responses<UploadRsp>> {
        let mut res = Responses::new();
        let mut off = self.start_off;

        while let Some(remaining) = self.data.get(off..).filter(|r| !r.is_empty()) {
            let chunk = next_chunk(&*s, self.data.len(), remaining, off, build)?;
            let off32 = wire_u32(off)?;
            let len = if off == 0 {
                Some(wire_u32(self.data.len())?)
            } else {
                None
            };
            debug!(kind = %self.kind, off, len = chunk.len(), "sending chunk");

            let rsp = s.tx(&build(off32, len, chunk), &self.opts)?;
            let rsp = parse(rsp).ok_or(Error::UnexpectedResponse {
                expected: self.kind,
            })?;

            if let Some(cb) = self.progress.as_mut() {
                cb(&rsp);
            }
            let next = rsp.off as usize;
            if rsp.rc == 0 && next <= off {
                warn!(kind = %self.kind, off, "device did not advance the offset");
            }
            off = next;
            res.push(rsp);

            if rsp.rc != 0 {
                debug!(kind = %self.kind, rc = rsp.rc, off, "device rejected chunk");
                break;
            }
        }
        Ok(res)
    }
}

/// Runs a chunked download from offset zero.
///
/// Stops at the first nonzero return code or at an empty chunk, which the
/// device sends once the whole object has been read.
pub(crate) fn download(
    s: &mut dyn Session,
    kind: Kind,
    opts: &TxOptions,
    mut progress: Option<Progress<'_, DownloadRsp>>,
    build: &dyn Fn(u32) -> Request,
    parse: fn(Response) -> Option<DownloadRsp>,
) -> Result<Responses<DownloadRsp>> {
    let mut res = Responses::new();
    let mut off: u32 = 0;

    loop {
        let rsp = s.tx(&build(off), opts)?;
        let rsp = parse(rsp).ok_or(Error::UnexpectedResponse { expected: kind })?;
        debug!(%kind, off = rsp.off, len = rsp.data.len(), rc = rsp.rc, "received chunk");

        if let Some(cb) = progress.as_mut() {
            cb(&rsp);
        }
        let done = rsp.rc != 0 || rsp.data.is_empty();
        let end = rsp.off as usize + rsp.data.len();
        res.push(rsp);
        if done {
            break;
        }
        off = wire_u32(end)?;
    }
    Ok(res)
}
