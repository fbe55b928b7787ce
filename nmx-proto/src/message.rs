//! Management message types exchanged with a device.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Command group for OS-level commands.
pub const GROUP_DEFAULT: u16 = 0;
/// Command group for image management.
pub const GROUP_IMAGE: u16 = 1;
/// Command group for file system access.
pub const GROUP_FS: u16 = 8;

/// Default group: task statistics.
pub const ID_TASKSTAT: u8 = 2;
/// Image group: slot state (read and write).
pub const ID_IMAGE_STATE: u8 = 0;
/// Image group: image upload.
pub const ID_IMAGE_UPLOAD: u8 = 1;
/// Image group: core dump presence.
pub const ID_CORELIST: u8 = 3;
/// Image group: core dump download (read) and erase (write).
pub const ID_CORELOAD: u8 = 4;
/// Image group: erase the secondary slot.
pub const ID_IMAGE_ERASE: u8 = 5;
/// Fs group: file upload (write) and download (read).
pub const ID_FS_FILE: u8 = 0;

/// Return code the device reports for an unspecified failure.
///
/// Also used as the status of a result that never received a response.
pub const RC_UNKNOWN: i32 = 1;

/// Management operation code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
#[repr(u8)]
pub enum Op {
    /// Read request.
    Read = 0,
    /// Response to a read.
    ReadRsp = 1,
    /// Write request.
    Write = 2,
    /// Response to a write.
    WriteRsp = 3,
}

impl Op {
    /// Returns the opcode answering this one.
    #[must_use]
    pub const fn response(self) -> Self {
        match self {
            Self::Read | Self::ReadRsp => Self::ReadRsp,
            Self::Write | Self::WriteRsp => Self::WriteRsp,
        }
    }

    /// Decodes an opcode byte.
    pub const fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Read),
            1 => Some(Self::ReadRsp),
            2 => Some(Self::Write),
            3 => Some(Self::WriteRsp),
            _ => None,
        }
    }
}

/// Message header identifying the operation and matching responses to requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Operation code.
    pub op: Op,
    /// Reserved flag bits.
    pub flags: u8,
    /// Body length in bytes (NMP framing only; zero otherwise).
    pub len: u16,
    /// Command group.
    pub group: u16,
    /// Sequence number; a response carries its request's value.
    pub seq: u8,
    /// Command id within the group.
    pub id: u8,
}

impl Header {
    /// Builds the header of the response to `self`.
    #[must_use]
    pub const fn response(&self) -> Self {
        Self {
            op: self.op.response(),
            flags: self.flags,
            len: 0,
            group: self.group,
            seq: self.seq,
            id: self.id,
        }
    }
}

/// Request sent from the client to the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Request {
    /// Write one chunk of a firmware image.
    ImageUpload(UploadReq),
    /// Erase the secondary image slot.
    ImageErase,
    /// Read the state of all image slots.
    ImageStateRead,
    /// Mark an image for test or confirm the running one.
    ImageStateWrite(StateWriteReq),
    /// Ask whether a core dump is present.
    CoreList,
    /// Read one chunk of the core dump.
    CoreLoad(DownloadReq),
    /// Erase the core dump.
    CoreErase,
    /// Write one chunk of a file.
    FsUpload(FileUploadReq),
    /// Read one chunk of a file.
    FsDownload(FileDownloadReq),
    /// Read per-task statistics.
    TaskStat,
}

impl Request {
    /// Builds the header for this request with sequence number `seq`.
    #[must_use]
    pub const fn header(&self, seq: u8) -> Header {
        let (op, group, id) = match self {
            Self::ImageUpload(_) => (Op::Write, GROUP_IMAGE, ID_IMAGE_UPLOAD),
            Self::ImageErase => (Op::Write, GROUP_IMAGE, ID_IMAGE_ERASE),
            Self::ImageStateRead => (Op::Read, GROUP_IMAGE, ID_IMAGE_STATE),
            Self::ImageStateWrite(_) => (Op::Write, GROUP_IMAGE, ID_IMAGE_STATE),
            Self::CoreList => (Op::Read, GROUP_IMAGE, ID_CORELIST),
            Self::CoreLoad(_) => (Op::Read, GROUP_IMAGE, ID_CORELOAD),
            Self::CoreErase => (Op::Write, GROUP_IMAGE, ID_CORELOAD),
            Self::FsUpload(_) => (Op::Write, GROUP_FS, ID_FS_FILE),
            Self::FsDownload(_) => (Op::Read, GROUP_FS, ID_FS_FILE),
            Self::TaskStat => (Op::Read, GROUP_DEFAULT, ID_TASKSTAT),
        };
        Header {
            op,
            flags: 0,
            len: 0,
            group,
            seq,
            id,
        }
    }
}

/// One chunk of an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReq {
    /// Offset of `data` within the whole object.
    pub off: u32,
    /// Total object length; only present on the first chunk.
    pub len: Option<u32>,
    /// Chunk payload.
    pub data: Vec<u8>,
}

/// Image state change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateWriteReq {
    /// Hash of the target image; `None` targets the running image.
    pub hash: Option<Vec<u8>>,
    /// Make the change permanent instead of test-once.
    pub confirm: bool,
}

/// Read of a chunk at an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadReq {
    /// Requested offset.
    pub off: u32,
}

/// One chunk of a file upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUploadReq {
    /// Destination path on the device.
    pub name: String,
    /// Chunk position and payload.
    pub chunk: UploadReq,
}

/// One chunk of a file download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDownloadReq {
    /// Source path on the device.
    pub name: String,
    /// Requested offset.
    pub off: u32,
}

/// Response sent from the device to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Response {
    /// Acknowledges an image chunk.
    ImageUpload(UploadRsp),
    /// Result of an image erase.
    ImageErase(RcRsp),
    /// Image slot state (answers both state read and state write).
    ImageState(ImageStateRsp),
    /// Core dump presence.
    CoreList(RcRsp),
    /// One chunk of the core dump.
    CoreLoad(DownloadRsp),
    /// Result of a core dump erase.
    CoreErase(RcRsp),
    /// Acknowledges a file chunk.
    FsUpload(UploadRsp),
    /// One chunk of a file.
    FsDownload(DownloadRsp),
    /// Per-task statistics.
    TaskStat(TaskStatRsp),
}

/// Access to the device return code of a response body.
pub trait ReturnCode {
    /// Device return code; zero means success.
    fn rc(&self) -> i32;
}

/// Response that carries only a return code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RcRsp {
    /// Device return code.
    pub rc: i32,
}

/// Acknowledgement of an upload chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRsp {
    /// Device return code.
    pub rc: i32,
    /// Offset the device expects next, i.e. bytes accepted so far.
    pub off: u32,
}

/// One chunk of a download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRsp {
    /// Device return code.
    pub rc: i32,
    /// Offset of `data` within the object.
    pub off: u32,
    /// Total object length; only present on the first chunk.
    pub len: Option<u32>,
    /// Chunk payload; empty marks the end of the object.
    pub data: Vec<u8>,
}

/// State of a single image slot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageSlot {
    /// Slot index.
    pub slot: u32,
    /// Image version string.
    pub version: String,
    /// Image hash.
    pub hash: Vec<u8>,
    /// Image carries a valid boot header.
    pub bootable: bool,
    /// Image will be booted on next reset.
    pub pending: bool,
    /// Image has been confirmed.
    pub confirmed: bool,
    /// Image is currently running.
    pub active: bool,
    /// Pending swap is permanent.
    pub permanent: bool,
}

/// Image state of all slots.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageStateRsp {
    /// Device return code.
    pub rc: i32,
    /// Per-slot state.
    pub images: Vec<ImageSlot>,
    /// Split image status.
    pub split_status: i32,
}

/// Per-task statistics, keyed by task name then statistic name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TaskStatRsp {
    /// Device return code.
    pub rc: i32,
    /// Statistics per task.
    pub tasks: BTreeMap<String, BTreeMap<String, i64>>,
}

macro_rules! impl_return_code {
    ($($t:ty),* $(,)?) => {
        $(impl ReturnCode for $t {
            fn rc(&self) -> i32 {
                self.rc
            }
        })*
    };
}

impl_return_code!(RcRsp, UploadRsp, DownloadRsp, ImageStateRsp, TaskStatRsp);

impl ReturnCode for Response {
    fn rc(&self) -> i32 {
        match self {
            Self::ImageUpload(r) | Self::FsUpload(r) => r.rc,
            Self::ImageErase(r) | Self::CoreList(r) | Self::CoreErase(r) => r.rc,
            Self::ImageState(r) => r.rc,
            Self::CoreLoad(r) | Self::FsDownload(r) => r.rc,
            Self::TaskStat(r) => r.rc,
        }
    }
}
