//! Scripted in-memory device used by transaction tests.

use std::collections::BTreeMap;
use std::io;

use nmx_proto::{
    DownloadRsp, FileUploadReq, ImageSlot, ImageStateRsp, ProtocolVariant, RcRsp, Request,
    Response, TaskStatRsp, UploadReq, UploadRsp,
};

use crate::error::{Error, Result};
use crate::session::{Session, TxOptions};

/// Device return code: invalid argument.
pub(crate) const EINVAL: i32 = 3;
/// Device return code: no such entry.
pub(crate) const ENOENT: i32 = 5;
/// Device return code: not supported.
pub(crate) const ENOTSUP: i32 = 8;

/// A device behind a session, with fault injection.
#[derive(Debug)]
pub(crate) struct SimDevice {
    pub mtu: usize,
    pub proto: ProtocolVariant,
    pub open: bool,
    /// Synthetic framing cost `(first chunk, later chunks)` replacing the codec.
    pub overhead: Option<(usize, usize)>,
    pub image: Vec<u8>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub core: Option<Vec<u8>>,
    pub slots: Vec<ImageSlot>,
    /// Accept at most this many bytes of each upload chunk.
    pub accept_limit: Option<usize>,
    /// Bytes served per download response.
    pub download_chunk: usize,
    /// Reject upload chunks at or past an offset with a return code.
    pub reject_upload_at: Option<(usize, i32)>,
    pub erase_rc: i32,
    /// Answer an erase with the wrong response variant.
    pub bogus_erase: bool,
    /// Zero-based `tx` calls at which the link drops before the device sees the request.
    pub drop_at: Vec<usize>,
    /// A dropped request leaves the session open (a fault that is not a disconnect).
    pub stay_open_on_drop: bool,
    pub refuse_reopen: bool,
    /// Every request passed to `tx`, delivered or not.
    pub attempts: Vec<Request>,
    /// Requests the device processed.
    pub handled: Vec<Request>,
    /// Calls to `open`.
    pub opens: usize,
}

impl SimDevice {
    pub(crate) fn new(mtu: usize) -> Self {
        Self {
            mtu,
            proto: ProtocolVariant::Nmp,
            open: true,
            overhead: None,
            image: Vec::new(),
            files: BTreeMap::new(),
            core: None,
            slots: vec![
                ImageSlot {
                    slot: 0,
                    version: "1.0.0".into(),
                    hash: vec![0xaa; 32],
                    bootable: true,
                    confirmed: true,
                    active: true,
                    ..ImageSlot::default()
                },
                ImageSlot {
                    slot: 1,
                    version: "1.1.0".into(),
                    hash: vec![0xbb; 32],
                    bootable: true,
                    ..ImageSlot::default()
                },
            ],
            accept_limit: None,
            download_chunk: 64,
            reject_upload_at: None,
            erase_rc: 0,
            bogus_erase: false,
            drop_at: Vec::new(),
            stay_open_on_drop: false,
            refuse_reopen: false,
            attempts: Vec::new(),
            handled: Vec::new(),
            opens: 0,
        }
    }

    /// Counts `tx` attempts matching `pred`.
    pub(crate) fn attempted(&self, pred: impl Fn(&Request) -> bool) -> usize {
        self.attempts.iter().filter(|r| pred(r)).count()
    }

    /// Upload chunks the device processed, in order.
    pub(crate) fn upload_chunks(&self) -> Vec<&UploadReq> {
        self.handled
            .iter()
            .filter_map(|r| match r {
                Request::ImageUpload(u) | Request::FsUpload(FileUploadReq { chunk: u, .. }) => {
                    Some(u)
                }
                _ => None,
            })
            .collect()
    }

    fn handle(&mut self, req: &Request) -> Response {
        let limit = self.accept_limit;
        let reject = self.reject_upload_at;
        match req {
            Request::ImageUpload(u) => {
                Response::ImageUpload(accept(&mut self.image, u, limit, reject))
            }
            Request::FsUpload(f) => {
                let buf = self.files.entry(f.name.clone()).or_default();
                Response::FsUpload(accept(buf, &f.chunk, limit, reject))
            }
            Request::ImageErase if self.bogus_erase => Response::CoreErase(RcRsp { rc: 0 }),
            Request::ImageErase => {
                self.image.clear();
                Response::ImageErase(RcRsp { rc: self.erase_rc })
            }
            Request::ImageStateRead => Response::ImageState(self.state(0)),
            Request::ImageStateWrite(w) => {
                let target = match &w.hash {
                    Some(h) => self.slots.iter_mut().find(|s| &s.hash == h),
                    None => self.slots.iter_mut().find(|s| s.active),
                };
                let rc = match target {
                    Some(slot) if w.hash.is_none() || w.confirm => {
                        slot.confirmed = true;
                        slot.permanent = w.hash.is_some();
                        slot.pending = w.hash.is_some();
                        0
                    }
                    Some(slot) => {
                        slot.pending = true;
                        0
                    }
                    None => ENOENT,
                };
                Response::ImageState(self.state(rc))
            }
            Request::CoreList => Response::CoreList(RcRsp {
                rc: if self.core.is_some() { 0 } else { ENOENT },
            }),
            Request::CoreLoad(d) => {
                Response::CoreLoad(serve(self.core.as_deref(), d.off, self.download_chunk))
            }
            Request::CoreErase => {
                self.core = None;
                Response::CoreErase(RcRsp { rc: 0 })
            }
            Request::FsDownload(f) => Response::FsDownload(serve(
                self.files.get(&f.name).map(Vec::as_slice),
                f.off,
                self.download_chunk,
            )),
            Request::TaskStat => {
                let mut tasks = BTreeMap::new();
                tasks.insert(
                    "idle".to_owned(),
                    BTreeMap::from([("prio".to_owned(), 255), ("runtime".to_owned(), 9000)]),
                );
                tasks.insert(
                    "main".to_owned(),
                    BTreeMap::from([("prio".to_owned(), 127), ("runtime".to_owned(), 120)]),
                );
                Response::TaskStat(TaskStatRsp { rc: 0, tasks })
            }
            _ => Response::CoreErase(RcRsp { rc: ENOTSUP }),
        }
    }

    fn state(&self, rc: i32) -> ImageStateRsp {
        ImageStateRsp {
            rc,
            images: self.slots.clone(),
            split_status: 0,
        }
    }
}

/// Applies an upload chunk to `buf`, returning the acknowledgement.
fn accept(
    buf: &mut Vec<u8>,
    u: &UploadReq,
    limit: Option<usize>,
    reject: Option<(usize, i32)>,
) -> UploadRsp {
    let off = u.off as usize;
    if let Some((at, rc)) = reject
        && off >= at
    {
        return UploadRsp { rc, off: ack(buf) };
    }
    if off == 0 {
        if u.len.is_none() {
            return UploadRsp {
                rc: EINVAL,
                off: 0,
            };
        }
        buf.clear();
    }
    if off == buf.len() {
        let take = limit.map_or(u.data.len(), |l| l.min(u.data.len()));
        buf.extend_from_slice(&u.data[..take]);
    }
    UploadRsp { rc: 0, off: ack(buf) }
}

fn ack(buf: &[u8]) -> u32 {
    u32::try_from(buf.len()).unwrap_or(u32::MAX)
}

/// Serves one download chunk of `obj` at `off`.
fn serve(obj: Option<&[u8]>, off: u32, chunk: usize) -> DownloadRsp {
    let Some(data) = obj else {
        return DownloadRsp {
            rc: ENOENT,
            off,
            len: None,
            data: Vec::new(),
        };
    };
    let start = (off as usize).min(data.len());
    let end = (start + chunk).min(data.len());
    DownloadRsp {
        rc: 0,
        off,
        len: (off == 0).then(|| ack(data)),
        data: data[start..end].to_vec(),
    }
}

impl Session for SimDevice {
    fn is_open(&self) -> bool {
        self.open
    }

    fn open(&mut self) -> Result<()> {
        self.opens += 1;
        if self.refuse_reopen {
            return Err(Error::Transport(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "peer unreachable",
            )));
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn mtu_out(&self) -> usize {
        self.mtu
    }

    fn proto(&self) -> ProtocolVariant {
        self.proto
    }

    fn encoded_len(&self, req: &Request) -> Result<usize> {
        let Some((first, later)) = self.overhead else {
            return Ok(nmx_proto::frame(self.proto, &req.header(0), req)?.len());
        };
        Ok(match req {
            Request::ImageUpload(u) | Request::FsUpload(FileUploadReq { chunk: u, .. }) => {
                u.data.len() + if u.len.is_some() { first } else { later }
            }
            _ => later,
        })
    }

    fn tx(&mut self, req: &Request, _opts: &TxOptions) -> Result<Response> {
        let n = self.attempts.len();
        self.attempts.push(req.clone());
        if !self.open {
            return Err(Error::not_connected());
        }
        let len = self.encoded_len(req)?;
        assert!(len <= self.mtu, "request of {len} bytes exceeds MTU {}", self.mtu);

        if self.drop_at.contains(&n) {
            if !self.stay_open_on_drop {
                self.open = false;
            }
            return Err(Error::Transport(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "link dropped",
            )));
        }
        self.handled.push(req.clone());
        Ok(self.handle(req))
    }
}
