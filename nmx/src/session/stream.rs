//! Session over a reliable byte stream (TCP or a Unix socket).
//!
//! Each framed message travels behind a 4-byte length prefix. The stream
//! itself is reliable, so the MTU is a configured budget that mirrors the
//! frame limit of the device behind it (e.g. a BLE or serial bridge).

use std::fmt;
use std::io::{self, Read, Write};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
#[cfg(unix)]
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use nmx_proto::{Header, ProtocolVariant, Request, Response};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{Session, TxOptions};
use crate::error::{Error, Result};

/// Default outbound MTU for stream sessions.
pub const DEFAULT_MTU: usize = 512;

/// Address of a device bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
#[non_exhaustive]
pub enum Endpoint {
    /// TCP `host:port`.
    Tcp(String),
    /// Unix domain socket path.
    #[cfg(unix)]
    Unix(PathBuf),
}

impl FromStr for Endpoint {
    type Err = String;

    /// Accepts `tcp:host:port`, `unix:/path`, or a bare `host:port`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("unix:") {
            #[cfg(unix)]
            {
                if path.is_empty() {
                    return Err("empty unix socket path".to_owned());
                }
                return Ok(Self::Unix(PathBuf::from(path)));
            }
            #[cfg(not(unix))]
            {
                let _ = path;
                return Err("unix sockets are not supported on this platform".to_owned());
            }
        }
        let addr = s.strip_prefix("tcp:").unwrap_or(s);
        match addr.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(Self::Tcp(addr.to_owned()))
            }
            _ => Err(format!("invalid endpoint {s:?}: expected host:port or unix:<path>")),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp:{addr}"),
            #[cfg(unix)]
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl TryFrom<String> for Endpoint {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Endpoint> for String {
    fn from(ep: Endpoint) -> Self {
        ep.to_string()
    }
}

/// Connection settings of a [`StreamSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Where the device bridge listens.
    pub endpoint: Endpoint,
    /// Outbound MTU in bytes (default: 512).
    pub mtu: usize,
    /// Wire encoding (default: NMP).
    pub proto: ProtocolVariant,
}

impl SessionConfig {
    /// Creates a configuration with the default MTU and encoding.
    pub const fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            mtu: DEFAULT_MTU,
            proto: ProtocolVariant::Nmp,
        }
    }
}

/// An open byte stream.
#[derive(Debug)]
enum Conn {
    /// TCP connection.
    Tcp(TcpStream),
    /// Unix socket connection.
    #[cfg(unix)]
    Unix(UnixStream),
}

impl Conn {
    /// Connects to `ep`.
    fn connect(ep: &Endpoint) -> io::Result<Self> {
        match ep {
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr)?;
                stream.set_nodelay(true)?;
                Ok(Self::Tcp(stream))
            }
            #[cfg(unix)]
            Endpoint::Unix(path) => Ok(Self::Unix(UnixStream::connect(path)?)),
        }
    }

    /// Sets the read timeout; `None` blocks forever.
    fn set_read_timeout(&self, dur: Option<Duration>) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.set_read_timeout(dur),
            #[cfg(unix)]
            Self::Unix(s) => s.set_read_timeout(dur),
        }
    }
}

impl Read for Conn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.read(buf),
        }
    }
}

impl Write for Conn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            Self::Unix(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush(),
            #[cfg(unix)]
            Self::Unix(s) => s.flush(),
        }
    }
}

/// A [`Session`] over TCP or a Unix socket.
#[derive(Debug)]
pub struct StreamSession {
    /// Connection settings.
    cfg: SessionConfig,
    /// Live stream; `None` while closed.
    conn: Option<Conn>,
    /// Sequence number of the last request sent.
    seq: u8,
    /// Received bytes not yet forming a whole frame.
    rx: Vec<u8>,
}

impl StreamSession {
    /// Creates a closed session.
    pub const fn new(cfg: SessionConfig) -> Self {
        Self {
            cfg,
            conn: None,
            seq: 0,
            rx: Vec::new(),
        }
    }

    /// Creates a session and opens it.
    pub fn connect(cfg: SessionConfig) -> Result<Self> {
        let mut s = Self::new(cfg);
        s.open()?;
        Ok(s)
    }

    /// Returns the connection settings.
    pub const fn config(&self) -> &SessionConfig {
        &self.cfg
    }

    /// Reads frames until the response carrying `seq` arrives.
    fn recv(
        conn: &mut Conn,
        rx: &mut Vec<u8>,
        proto: ProtocolVariant,
        seq: u8,
    ) -> Result<io::Result<Response>> {
        loop {
            let buf = match read_buffered(conn, rx) {
                Ok(b) => b,
                Err(e) => return Ok(Err(e)),
            };
            let (hdr, rsp): (Header, Response) = nmx_proto::unframe(proto, &buf)?;
            if hdr.seq == seq {
                return Ok(Ok(rsp));
            }
            trace!(expected = seq, got = hdr.seq, "dropping unmatched response");
        }
    }
}

/// Reads until `rx` holds a whole frame and returns it.
///
/// Bytes received before a timeout stay in `rx`, so the next call resumes the
/// same frame.
fn read_buffered(conn: &mut Conn, rx: &mut Vec<u8>) -> io::Result<Vec<u8>> {
    let mut chunk = [0u8; 1024];
    loop {
        if let Some(frame) = nmx_proto::take_frame(rx)? {
            return Ok(frame);
        }
        match conn.read(&mut chunk) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => rx.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

/// Returns `true` if `e` is a read timeout rather than a broken link.
fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

impl Session for StreamSession {
    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn open(&mut self) -> Result<()> {
        if self.conn.is_none() {
            let conn = Conn::connect(&self.cfg.endpoint).map_err(Error::Transport)?;
            debug!(endpoint = %self.cfg.endpoint, "session opened");
            self.conn = Some(conn);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.rx.clear();
        if self.conn.take().is_some() {
            debug!(endpoint = %self.cfg.endpoint, "session closed");
        }
    }

    fn mtu_out(&self) -> usize {
        self.cfg.mtu
    }

    fn proto(&self) -> ProtocolVariant {
        self.cfg.proto
    }

    fn tx(&mut self, req: &Request, opts: &TxOptions) -> Result<Response> {
        let proto = self.cfg.proto;
        let mtu = self.cfg.mtu;
        let seq = self.seq.wrapping_add(1);

        let frame = nmx_proto::frame(proto, &req.header(seq), req)?;
        if frame.len() > mtu {
            return Err(Error::Oversize {
                len: frame.len(),
                mtu,
            });
        }

        let conn = self.conn.as_mut().ok_or_else(Error::not_connected)?;
        self.seq = seq;
        conn.set_read_timeout(Some(opts.timeout).filter(|t| !t.is_zero()))
            .map_err(Error::Transport)?;

        let tries = opts.tries.max(1);
        let mut attempt = 1;
        let failure = loop {
            if let Err(e) = nmx_proto::write_frame(conn, &frame) {
                break e;
            }
            match Self::recv(conn, &mut self.rx, proto, seq)? {
                Ok(rsp) => return Ok(rsp),
                Err(e) if is_timeout(&e) && attempt < tries => {
                    debug!(seq, attempt, "response timed out; retransmitting");
                    attempt += 1;
                }
                Err(e) if is_timeout(&e) => {
                    return Err(Error::Transport(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("no response after {tries} attempt(s)"),
                    )));
                }
                Err(e) => break e,
            }
        };

        // The stream is unusable after anything but a timeout.
        self.close();
        Err(Error::Transport(failure))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use nmx_proto::{RcRsp, UploadReq, UploadRsp};

    use super::*;

    /// Answers every request on one connection with `reply`, until EOF.
    ///
    /// `reply` returning `None` leaves the request unanswered.
    fn serve_one(
        listener: &TcpListener,
        proto: ProtocolVariant,
        mut reply: impl FnMut(usize, &Header, Request) -> Option<Vec<(u8, Response)>>,
    ) {
        let (mut stream, _) = listener.accept().unwrap();
        let mut n = 0;
        while let Ok(buf) = nmx_proto::read_frame(&mut stream) {
            let (hdr, req): (Header, Request) = nmx_proto::unframe(proto, &buf).unwrap();
            for (seq, rsp) in reply(n, &hdr, req).unwrap_or_default() {
                let rsp_hdr = Header { seq, ..hdr.response() };
                let out = nmx_proto::frame(proto, &rsp_hdr, &rsp).unwrap();
                nmx_proto::write_frame(&mut stream, &out).unwrap();
            }
            n += 1;
        }
    }

    fn local(proto: ProtocolVariant) -> (TcpListener, SessionConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let mut cfg = SessionConfig::new(Endpoint::Tcp(addr));
        cfg.proto = proto;
        (listener, cfg)
    }

    #[test]
    fn parse_endpoints() {
        assert_eq!(
            "tcp:127.0.0.1:1337".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("127.0.0.1:1337".into())
        );
        assert_eq!(
            "localhost:9".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("localhost:9".into())
        );
        #[cfg(unix)]
        assert_eq!(
            "unix:/run/nmx.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix("/run/nmx.sock".into())
        );
        assert!("localhost".parse::<Endpoint>().is_err());
        assert!("tcp::80".parse::<Endpoint>().is_err());
        assert!("host:port".parse::<Endpoint>().is_err());
    }

    #[test]
    fn endpoint_serializes_as_string() {
        let ep: Endpoint = "tcp:10.0.0.2:1337".parse().unwrap();
        let json = serde_json::to_string(&ep).unwrap();
        assert_eq!(json, "\"tcp:10.0.0.2:1337\"");
        assert_eq!(serde_json::from_str::<Endpoint>(&json).unwrap(), ep);
    }

    #[test]
    fn roundtrip_over_tcp() {
        for proto in [ProtocolVariant::Nmp, ProtocolVariant::Omp] {
            let (listener, cfg) = local(proto);
            let device = thread::spawn(move || {
                serve_one(&listener, proto, |_, hdr, req| {
                    assert_eq!(req, Request::ImageErase);
                    Some(vec![(hdr.seq, Response::ImageErase(RcRsp { rc: 0 }))])
                });
            });

            let mut s = StreamSession::connect(cfg).unwrap();
            let rsp = s.tx(&Request::ImageErase, &TxOptions::default()).unwrap();
            assert_eq!(rsp, Response::ImageErase(RcRsp { rc: 0 }));
            s.close();
            device.join().unwrap();
        }
    }

    #[test]
    fn skips_responses_with_stale_sequence() {
        let (listener, cfg) = local(ProtocolVariant::Nmp);
        let device = thread::spawn(move || {
            serve_one(&listener, ProtocolVariant::Nmp, |_, hdr, _| {
                let stale = Response::ImageUpload(UploadRsp { rc: 0, off: 1 });
                let fresh = Response::ImageUpload(UploadRsp { rc: 0, off: 2 });
                Some(vec![(hdr.seq.wrapping_sub(1), stale), (hdr.seq, fresh)])
            });
        });

        let mut s = StreamSession::connect(cfg).unwrap();
        let req = Request::ImageUpload(UploadReq {
            off: 0,
            len: Some(2),
            data: vec![1, 2],
        });
        let rsp = s.tx(&req, &TxOptions::default()).unwrap();
        assert_eq!(rsp, Response::ImageUpload(UploadRsp { rc: 0, off: 2 }));
        s.close();
        device.join().unwrap();
    }

    #[test]
    fn retransmits_after_timeout() {
        let (listener, cfg) = local(ProtocolVariant::Nmp);
        let device = thread::spawn(move || {
            serve_one(&listener, ProtocolVariant::Nmp, |n, hdr, _| {
                // Swallow the first transmission.
                (n > 0).then(|| vec![(hdr.seq, Response::CoreErase(RcRsp { rc: 0 }))])
            });
        });

        let mut s = StreamSession::connect(cfg).unwrap();
        let opts = TxOptions {
            timeout: Duration::from_millis(200),
            tries: 2,
        };
        let rsp = s.tx(&Request::CoreErase, &opts).unwrap();
        assert_eq!(rsp, Response::CoreErase(RcRsp { rc: 0 }));
        assert!(s.is_open());
        s.close();
        device.join().unwrap();
    }

    #[test]
    fn timeout_keeps_session_open() {
        let (listener, cfg) = local(ProtocolVariant::Nmp);
        let device = thread::spawn(move || serve_one(&listener, ProtocolVariant::Nmp, |_, _, _| None));

        let mut s = StreamSession::connect(cfg).unwrap();
        let opts = TxOptions {
            timeout: Duration::from_millis(50),
            tries: 1,
        };
        let err = s.tx(&Request::CoreList, &opts).unwrap_err();
        assert!(err.is_transport());
        assert!(s.is_open());
        s.close();
        device.join().unwrap();
    }

    #[test]
    fn disconnect_closes_session_and_reopen_recovers() {
        let (listener, cfg) = local(ProtocolVariant::Nmp);
        let device = thread::spawn(move || {
            // First connection: drop it on the first request.
            {
                let (mut stream, _) = listener.accept().unwrap();
                let _ = nmx_proto::read_frame(&mut stream);
            }
            serve_one(&listener, ProtocolVariant::Nmp, |_, hdr, _| {
                Some(vec![(hdr.seq, Response::CoreList(RcRsp { rc: 0 }))])
            });
        });

        let mut s = StreamSession::connect(cfg).unwrap();
        let err = s.tx(&Request::CoreList, &TxOptions::default()).unwrap_err();
        assert!(err.is_transport());
        assert!(!s.is_open());

        let err = s.tx(&Request::CoreList, &TxOptions::default()).unwrap_err();
        assert!(err.is_transport());

        s.open().unwrap();
        let rsp = s.tx(&Request::CoreList, &TxOptions::default()).unwrap();
        assert_eq!(rsp, Response::CoreList(RcRsp { rc: 0 }));
        s.close();
        device.join().unwrap();
    }

    #[test]
    fn resumes_frame_interrupted_by_timeout() {
        let (listener, cfg) = local(ProtocolVariant::Nmp);
        let device = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let buf = nmx_proto::read_frame(&mut stream).unwrap();
            let (hdr, _): (Header, Request) =
                nmx_proto::unframe(ProtocolVariant::Nmp, &buf).unwrap();
            let rsp = Response::CoreList(RcRsp { rc: 0 });
            let out = nmx_proto::frame(ProtocolVariant::Nmp, &hdr.response(), &rsp).unwrap();
            let mut wire = Vec::new();
            nmx_proto::write_frame(&mut wire, &out).unwrap();

            // Length prefix and two header bytes, then stall past the client timeout.
            stream.write_all(&wire[..6]).unwrap();
            stream.flush().unwrap();
            thread::sleep(Duration::from_millis(250));
            stream.write_all(&wire[6..]).unwrap();

            // Answer retransmissions and later requests in order.
            while let Ok(buf) = nmx_proto::read_frame(&mut stream) {
                let (hdr, req): (Header, Request) =
                    nmx_proto::unframe(ProtocolVariant::Nmp, &buf).unwrap();
                let rsp = match req {
                    Request::CoreList => Response::CoreList(RcRsp { rc: 0 }),
                    _ => Response::CoreErase(RcRsp { rc: 7 }),
                };
                let out = nmx_proto::frame(ProtocolVariant::Nmp, &hdr.response(), &rsp).unwrap();
                if nmx_proto::write_frame(&mut stream, &out).is_err() {
                    break;
                }
            }
        });

        let mut s = StreamSession::connect(cfg).unwrap();
        let opts = TxOptions {
            timeout: Duration::from_millis(100),
            tries: 5,
        };
        let rsp = s.tx(&Request::CoreList, &opts).unwrap();
        assert_eq!(rsp, Response::CoreList(RcRsp { rc: 0 }));
        assert!(s.is_open());

        // Still in sync: stale duplicates are skipped, the new answer matches.
        let rsp = s.tx(&Request::CoreErase, &opts).unwrap();
        assert_eq!(rsp, Response::CoreErase(RcRsp { rc: 7 }));
        s.close();
        device.join().unwrap();
    }

    #[test]
    fn rejects_request_larger_than_mtu() {
        let cfg = SessionConfig {
            mtu: 16,
            ..SessionConfig::new(Endpoint::Tcp("127.0.0.1:1".into()))
        };
        let mut s = StreamSession::new(cfg);
        let req = Request::ImageUpload(UploadReq {
            off: 0,
            len: Some(64),
            data: vec![0; 64],
        });
        let err = s.tx(&req, &TxOptions::default()).unwrap_err();
        assert!(matches!(err, Error::Oversize { mtu: 16, .. }));
    }
}
