//! Host-side implementations of the 21 remote syscalls (spec §4.4),
//! grounded in `original_source/host-src/dc-tool/{ip,serial}-syscalls.c`.
//! Transport-agnostic: every handler takes a decoded [`Request`] and the
//! session's shared state explicitly (Design Note "Shared-by-transport
//! state") and returns an [`Outcome`] the transport glue encodes.

use crate::dispatch::request::Request;
use crate::gdb::GdbRelay;
use hostlink_common::dirtable::DirTable;
use hostlink_common::syscall::{DirentWire, StatWire};
use std::fs::{self, DirEntry};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A directory opened by `OPENDIR`: entries are snapshotted up front so
/// `REWINDDIR` can reset `index` to 0 without reopening or leaking the
/// handle's table slot (fixes the Open Question on `rewinddir`).
pub struct OpenDir {
    entries: Vec<DirEntry>,
    index: usize,
}

impl OpenDir {
    fn open(path: &Path) -> std::io::Result<Self> {
        let entries = fs::read_dir(path)?.filter_map(Result::ok).collect();
        Ok(Self { entries, index: 0 })
    }

    fn next_entry(&mut self) -> Option<DirentWire> {
        let entry = self.entries.get(self.index)?;
        let off = self.index as u32;
        self.index += 1;
        let meta = entry.metadata().ok();
        let ino = meta.as_ref().map(|m| m.ino() as u32).unwrap_or(0);
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        Some(DirentWire::new(
            ino,
            off,
            DirentWire::WIRE_LEN as u32,
            if is_dir { 4 } else { 8 },
            &entry.file_name().to_string_lossy(),
        ))
    }

    fn rewind(&mut self) {
        self.index = 0;
    }
}

/// State shared across every handler invocation in one session: the open
/// file table (delegated to OS file descriptors directly, per the original
/// design, since target `fd` values are just host `fd`s passed through),
/// the directory table, and the currently redirected ISO file, if any.
pub struct SyscallContext {
    pub dirs: DirTable<OpenDir>,
    pub iso: Option<fs::File>,
    pub gdb: Option<GdbRelay>,
}

impl SyscallContext {
    pub fn new(iso: Option<fs::File>, gdb: Option<GdbRelay>) -> Self {
        Self {
            dirs: DirTable::new(),
            iso,
            gdb,
        }
    }
}

/// The bulk payload a handler hands back, still in host-native form. The
/// per-transport wire encoder (`transport::udp`/`transport::serial`)
/// converts the structured variants to that transport's byte order;
/// `Raw` bytes (file contents, ISO sectors, GDB payloads) have no
/// endianness to convert and pass straight through.
pub enum Bulk {
    Raw(Vec<u8>),
    Stat(StatWire),
    Dirent(DirentWire),
}

impl Bulk {
    /// Encode into wire bytes using `to_wire_u32` for every integer field —
    /// `hostlink_common::wire::udp::to_wire_u32` (big-endian) or
    /// `hostlink_common::wire::serial::to_wire_u32` (little-endian),
    /// whichever the calling transport uses.
    pub fn encode(&self, to_wire_u32: fn(u32) -> u32) -> Vec<u8> {
        match self {
            Bulk::Raw(bytes) => bytes.clone(),
            Bulk::Stat(stat) => {
                let mut out = Vec::with_capacity(StatWire::WIRE_LEN);
                for f in stat.as_fields() {
                    out.extend_from_slice(&to_wire_u32(f).to_ne_bytes());
                }
                out
            }
            Bulk::Dirent(dirent) => {
                let (fields, name) = dirent.as_fields();
                let mut out = Vec::with_capacity(DirentWire::WIRE_LEN);
                for f in fields {
                    out.extend_from_slice(&to_wire_u32(f).to_ne_bytes());
                }
                out.extend_from_slice(&name);
                out
            }
        }
    }
}

/// The result of a handler: a target-visible retval plus, for the
/// bulk-returning opcodes, the payload to deliver via `send_bulk` ahead of
/// the `RETV`/integer-echo retval.
pub struct Outcome {
    pub retval: i32,
    pub bulk: Option<Bulk>,
}

impl Outcome {
    fn retval(retval: i32) -> Self {
        Self { retval, bulk: None }
    }

    fn with_bulk(retval: i32, bulk: Bulk) -> Self {
        Self {
            retval,
            bulk: Some(bulk),
        }
    }
}

fn errno_of(err: &std::io::Error) -> i32 {
    err.raw_os_error().map(|e| -e).unwrap_or(-1)
}

/// Dispatch every opcode except `GDBPACKET`, which needs an async socket
/// round trip and is handled separately by [`dispatch_gdbpacket`].
pub fn dispatch(req: Request, ctx: &mut SyscallContext) -> Outcome {
    match req {
        Request::Exit => Outcome::retval(0),

        Request::Fstat { fd, .. } => stat_like(unsafe_fd_metadata(fd)),

        Request::Write { fd, data } => {
            use std::io::Write;
            use std::os::unix::io::FromRawFd;
            let mut file = unsafe { fs::File::from_raw_fd(fd) };
            let retval = match file.write(&data) {
                Ok(n) => n as i32,
                Err(e) => errno_of(&e),
            };
            std::mem::forget(file);
            Outcome::retval(retval)
        }

        Request::Read { fd, size, .. } => {
            use std::io::Read;
            use std::os::unix::io::FromRawFd;
            let mut file = unsafe { fs::File::from_raw_fd(fd) };
            let mut buf = vec![0u8; size as usize];
            let outcome = match file.read(&mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    Outcome::with_bulk(n as i32, Bulk::Raw(buf))
                }
                Err(e) => Outcome::retval(errno_of(&e)),
            };
            std::mem::forget(file);
            outcome
        }

        Request::Open { flags, mode, path } => {
            let mut opts = fs::OpenOptions::new();
            open_options_from_flags(&mut opts, flags);
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(mode);
            match opts.open(&path) {
                Ok(file) => {
                    use std::os::unix::io::IntoRawFd;
                    Outcome::retval(file.into_raw_fd())
                }
                Err(e) => Outcome::retval(errno_of(&e)),
            }
        }

        Request::Close { fd } => {
            use std::os::unix::io::FromRawFd;
            let file = unsafe { fs::File::from_raw_fd(fd) };
            drop(file);
            Outcome::retval(0)
        }

        Request::Create { mode, path } => {
            use std::os::unix::fs::OpenOptionsExt;
            match fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .mode(mode)
                .open(&path)
            {
                Ok(file) => {
                    use std::os::unix::io::IntoRawFd;
                    Outcome::retval(file.into_raw_fd())
                }
                Err(e) => Outcome::retval(errno_of(&e)),
            }
        }

        Request::Link { from, to } => match fs::hard_link(&from, &to) {
            Ok(()) => Outcome::retval(0),
            Err(e) => Outcome::retval(errno_of(&e)),
        },

        Request::Unlink { path } => match fs::remove_file(&path) {
            Ok(()) => Outcome::retval(0),
            Err(e) => Outcome::retval(errno_of(&e)),
        },

        Request::Chdir { path } => match std::env::set_current_dir(&path) {
            Ok(()) => Outcome::retval(0),
            Err(e) => Outcome::retval(errno_of(&e)),
        },

        Request::Chmod { mode, path } => {
            use std::os::unix::fs::PermissionsExt;
            match fs::set_permissions(&path, fs::Permissions::from_mode(mode)) {
                Ok(()) => Outcome::retval(0),
                Err(e) => Outcome::retval(errno_of(&e)),
            }
        }

        Request::Lseek { fd, offset, whence } => {
            let retval = unsafe { libc::lseek(fd, offset, whence) };
            if retval < 0 {
                Outcome::retval(-1)
            } else {
                Outcome::retval(retval as i32)
            }
        }

        Request::Time => {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs() as i32)
                .unwrap_or(0);
            Outcome::retval(now)
        }

        Request::Stat { path, .. } => stat_like(fs::metadata(&path)),

        Request::Utime { set, atime, mtime, path } => utime(&path, set, atime, mtime),

        Request::Opendir { path } => match OpenDir::open(&path) {
            Ok(dir) => match ctx.dirs.open(dir) {
                Some(handle) => Outcome::retval(handle as i32),
                None => {
                    warn!("directory table full, refusing opendir");
                    Outcome::retval(0)
                }
            },
            Err(e) => {
                debug!(error = %e, path = %path.display(), "opendir failed");
                Outcome::retval(0)
            }
        },

        Request::Readdir { handle, .. } => match ctx.dirs.get_mut(handle).and_then(OpenDir::next_entry) {
            Some(dirent) => Outcome::with_bulk(1, Bulk::Dirent(dirent)),
            None => Outcome::retval(0),
        },

        Request::Closedir { handle } => match ctx.dirs.close(handle) {
            Some(_) => Outcome::retval(0),
            None => Outcome::retval(-1),
        },

        Request::Rewinddir { handle } => match ctx.dirs.get_mut(handle) {
            Some(dir) => {
                dir.rewind();
                Outcome::retval(0)
            }
            None => Outcome::retval(-1),
        },

        Request::Bad => {
            warn!("received reserved BAD opcode");
            Outcome::retval(-1)
        }

        Request::Cdfsread { lba, size, .. } => {
            use std::io::{Read, Seek, SeekFrom};
            let Some(iso) = ctx.iso.as_mut() else {
                return Outcome::retval(-1);
            };
            let start = crate::iso::byte_offset(lba);
            if iso.seek(SeekFrom::Start(start)).is_err() {
                return Outcome::retval(-1);
            }
            let mut buf = vec![0u8; size as usize];
            match iso.read(&mut buf) {
                Ok(n) => {
                    buf.truncate(n);
                    Outcome::with_bulk(0, Bulk::Raw(buf))
                }
                Err(e) => Outcome::retval(errno_of(&e)),
            }
        }

        Request::Gdbpacket { .. } => {
            unreachable!("GDBPACKET is dispatched via dispatch_gdbpacket")
        }
    }
}

/// `GDBPACKET` needs an async socket round trip against the relay client,
/// so it is dispatched separately from the synchronous handlers above.
pub async fn dispatch_gdbpacket(
    in_size: u32,
    out_size: u32,
    payload: Vec<u8>,
    ctx: &mut SyscallContext,
) -> Outcome {
    let Some(gdb) = ctx.gdb.as_mut() else {
        return Outcome::retval(-1);
    };
    match gdb.relay(in_size, out_size, &payload).await {
        Ok(response) => {
            let retval = response.len() as i32;
            Outcome::with_bulk(retval, Bulk::Raw(response))
        }
        Err(e) => {
            warn!(error = %e, "gdb relay failed");
            Outcome::retval(-1)
        }
    }
}

fn unsafe_fd_metadata(fd: i32) -> std::io::Result<fs::Metadata> {
    use std::os::unix::io::FromRawFd;
    let file = unsafe { fs::File::from_raw_fd(fd) };
    let result = file.metadata();
    std::mem::forget(file);
    result
}

fn stat_like(meta: std::io::Result<fs::Metadata>) -> Outcome {
    match meta {
        Ok(meta) => {
            let stat = StatWire {
                st_dev: meta.dev() as u32,
                st_ino: meta.ino() as u32,
                st_mode: meta.mode(),
                st_nlink: meta.nlink() as u32,
                st_uid: meta.uid(),
                st_gid: meta.gid(),
                st_rdev: meta.rdev() as u32,
                st_size: meta.size() as u32,
                st_blksize: meta.blksize() as u32,
                st_blocks: meta.blocks() as u32,
                st_atime: meta.atime() as u32,
                st_mtime: meta.mtime() as u32,
                st_ctime: meta.ctime() as u32,
            };
            Outcome::with_bulk(0, Bulk::Stat(stat))
        }
        Err(e) => Outcome::retval(errno_of(&e)),
    }
}

/// `UTIME` (spec §4.4): `set` false means "touch both times to now", which
/// `libc::utime` already does when passed a null `timbuf`; `set` true passes
/// the target-supplied times through.
fn utime(path: &Path, set: bool, atime: u32, mtime: u32) -> Outcome {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(cpath) = CString::new(path.as_os_str().as_bytes()) else {
        return Outcome::retval(-1);
    };
    let times = libc::utimbuf {
        actime: atime as libc::time_t,
        modtime: mtime as libc::time_t,
    };
    let ptr = if set { &times as *const libc::utimbuf } else { std::ptr::null() };
    let retval = unsafe { libc::utime(cpath.as_ptr(), ptr) };
    if retval == 0 {
        Outcome::retval(0)
    } else {
        Outcome::retval(errno_of(&std::io::Error::last_os_error()))
    }
}

fn open_options_from_flags(opts: &mut fs::OpenOptions, flags: hostlink_common::syscall::OpenFlags) {
    use hostlink_common::syscall::OpenFlags;
    opts.read(true);
    if flags.contains(OpenFlags::WRONLY) {
        opts.write(true).read(false);
    }
    if flags.contains(OpenFlags::RDWR) {
        opts.read(true).write(true);
    }
    if flags.contains(OpenFlags::APPEND) {
        opts.append(true);
    }
    if flags.contains(OpenFlags::CREAT) {
        opts.create(true);
    }
    if flags.contains(OpenFlags::TRUNC) {
        opts.truncate(true);
    }
    if flags.contains(OpenFlags::EXCL) {
        opts.create_new(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opendir_then_readdir_on_missing_dir_is_quiet() {
        let mut ctx = SyscallContext::new(None, None);
        let req = Request::Opendir {
            path: PathBuf::from("/definitely/missing/path/xyz"),
        };
        let outcome = dispatch(req, &mut ctx);
        assert_eq!(outcome.retval, 0);

        let outcome = dispatch(Request::Readdir { handle: 0, addr: 0, size: 0 }, &mut ctx);
        assert_eq!(outcome.retval, 0);
        assert!(outcome.bulk.is_none());
    }

    #[test]
    fn opendir_readdir_rewind_cycle() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.txt"), b"a").unwrap();
        std::fs::write(tmp.path().join("b.txt"), b"b").unwrap();

        let mut ctx = SyscallContext::new(None, None);
        let outcome = dispatch(
            Request::Opendir {
                path: tmp.path().to_path_buf(),
            },
            &mut ctx,
        );
        assert!((hostlink_common::dirtable::HANDLE_OFFSET..).contains(&(outcome.retval as u32)));
        let handle = outcome.retval as u32;

        let first = dispatch(
            Request::Readdir { handle, addr: 0, size: 0 },
            &mut ctx,
        );
        assert_eq!(first.retval, 1);
        let second = dispatch(
            Request::Readdir { handle, addr: 0, size: 0 },
            &mut ctx,
        );
        assert_eq!(second.retval, 1);
        let third = dispatch(
            Request::Readdir { handle, addr: 0, size: 0 },
            &mut ctx,
        );
        assert_eq!(third.retval, 0);

        let rewind = dispatch(Request::Rewinddir { handle }, &mut ctx);
        assert_eq!(rewind.retval, 0);
        let after_rewind = dispatch(
            Request::Readdir { handle, addr: 0, size: 0 },
            &mut ctx,
        );
        assert_eq!(after_rewind.retval, 1);
    }

    #[test]
    fn closedir_unknown_handle_fails() {
        let mut ctx = SyscallContext::new(None, None);
        let outcome = dispatch(Request::Closedir { handle: 9999 }, &mut ctx);
        assert_eq!(outcome.retval, -1);
    }

    #[test]
    fn utime_sets_requested_times() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("touched.bin");
        std::fs::write(&path, b"x").unwrap();

        let mut ctx = SyscallContext::new(None, None);
        let outcome = dispatch(
            Request::Utime {
                set: true,
                atime: 1_000_000,
                mtime: 2_000_000,
                path: path.clone(),
            },
            &mut ctx,
        );
        assert_eq!(outcome.retval, 0);
        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.mtime(), 2_000_000);
    }

    #[test]
    fn utime_missing_path_fails() {
        let mut ctx = SyscallContext::new(None, None);
        let outcome = dispatch(
            Request::Utime {
                set: false,
                atime: 0,
                mtime: 0,
                path: PathBuf::from("/definitely/missing/xyz"),
            },
            &mut ctx,
        );
        assert!(outcome.retval < 0);
    }
}
