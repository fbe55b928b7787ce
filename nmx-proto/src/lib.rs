//! Wire protocol for nmx device management.
//!
//! Requests and responses are tagged unions serialized with [`postcard`].
//! Two framings are supported (see [`ProtocolVariant`]); byte-stream
//! transports add a 4-byte big-endian length prefix on top of either.

mod codec;
mod message;

pub use codec::{
    CodecError, NMP_HDR_LEN, ProtocolVariant, frame, read_frame, take_frame, unframe,
    write_frame,
};
pub use message::{
    DownloadReq, DownloadRsp, FileDownloadReq, FileUploadReq, GROUP_DEFAULT, GROUP_FS,
    GROUP_IMAGE, Header, ID_CORELIST, ID_CORELOAD, ID_FS_FILE, ID_IMAGE_ERASE, ID_IMAGE_STATE,
    ID_IMAGE_UPLOAD, ID_TASKSTAT, ImageSlot, ImageStateRsp, Op, RC_UNKNOWN, RcRsp, Request,
    Response, ReturnCode, StateWriteReq, TaskStatRsp, UploadReq, UploadRsp,
};
