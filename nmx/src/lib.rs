//! Management of embedded devices over the NMP/OMP protocols.
//!
//! `nmx` drives firmware upgrades, file transfers, core dump retrieval and
//! task statistics on a device reachable through a [`Session`]. Every
//! operation is a transaction ([`Xact`]) that sizes its requests to the
//! session MTU and records the device's responses.
//!
//! # Quick start: upgrade an image
//!
//! ```no_run
//! use nmx::{Endpoint, ImageUpgrade, Session, SessionConfig, StreamSession, Xact};
//!
//! let endpoint: Endpoint = "tcp:192.168.1.20:1337".parse().expect("bad endpoint");
//! let mut session = StreamSession::new(SessionConfig::new(endpoint));
//! session.open().expect("connect failed");
//!
//! let image = std::fs::read("app.img").expect("read image");
//! let res = ImageUpgrade::new(&image)
//!     .on_progress(|r| println!("{}", r.off))
//!     .run(&mut session)
//!     .expect("upgrade failed");
//! assert_eq!(res.status(), 0);
//! ```

mod error;
mod session;
mod xact;

pub use error::{Error, Result};
pub use nmx_proto::{
    DownloadRsp, ImageSlot, ImageStateRsp, ProtocolVariant, RC_UNKNOWN, RcRsp, Request, Response,
    ReturnCode, TaskStatRsp, UploadRsp,
};
pub use session::{
    DEFAULT_MTU, DEFAULT_TIMEOUT, Endpoint, Session, SessionConfig, StreamSession, TxOptions,
};
pub use xact::{
    CoreErase, CoreList, CoreLoad, FsDownload, FsUpload, ImageErase, ImageStateRead,
    ImageStateWrite, ImageUpgrade, ImageUpload, Kind, Progress, Responses, TaskStat,
    UpgradeResult, Xact, next_chunk,
};
