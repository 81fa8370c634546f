//! The transport-agnostic request shapes for the 21 remote syscalls plus
//! `GDBPACKET` (spec §4.4). Each transport's own decoder
//! (`transport::udp`/`transport::serial`) is responsible for pulling these
//! out of its wire format; `dispatch::handlers` only ever sees a `Request`.

use hostlink_common::syscall::OpenFlags;
use std::path::PathBuf;

/// One decoded target request, with the target-visible pointer/size
/// arguments for responses that return bulk data still attached (the
/// handler hands the bytes back, the transport glue sends them to `addr`).
#[derive(Debug, Clone)]
pub enum Request {
    Exit,
    Fstat { fd: i32, addr: u32, size: u32 },
    Write { fd: i32, data: Vec<u8> },
    Read { fd: i32, addr: u32, size: u32 },
    Open { flags: OpenFlags, mode: u32, path: PathBuf },
    Close { fd: i32 },
    Create { mode: u32, path: PathBuf },
    Link { from: PathBuf, to: PathBuf },
    Unlink { path: PathBuf },
    Chdir { path: PathBuf },
    Chmod { mode: u32, path: PathBuf },
    Lseek { fd: i32, offset: i64, whence: i32 },
    Time,
    Stat { addr: u32, size: u32, path: PathBuf },
    Utime { set: bool, atime: u32, mtime: u32, path: PathBuf },
    Opendir { path: PathBuf },
    Readdir { handle: u32, addr: u32, size: u32 },
    Closedir { handle: u32 },
    Rewinddir { handle: u32 },
    /// Bad, reserved opcode; logged and answered with `-1`.
    Bad,
    Cdfsread { lba: u32, addr: u32, size: u32 },
    Gdbpacket { in_size: u32, out_size: u32, payload: Vec<u8> },
}

impl Request {
    /// The target buffer address a bulk-returning opcode's response struct
    /// should land at (spec §4.4: `FSTAT`, `STAT`, `READ`, `READDIR`,
    /// `CDFSREAD`). Meaningless for the other opcodes.
    pub fn response_addr(&self) -> u32 {
        match *self {
            Request::Fstat { addr, .. }
            | Request::Read { addr, .. }
            | Request::Stat { addr, .. }
            | Request::Readdir { addr, .. }
            | Request::Cdfsread { addr, .. } => addr,
            _ => 0,
        }
    }
}
