//! The 21-opcode remote syscall set (spec §4.4) plus the flag and `stat`
//! wire layouts that go with it. Framing-agnostic: this module only knows
//! how to name and number the opcodes and how to lay out their fixed-size
//! structs; `common::wire` maps them onto each transport's byte order.

use strum::{EnumString, IntoStaticStr};

/// One of the 21 remote syscalls, plus the reserved `Bad` sentinel and the
/// GDB side channel, numbered `0..=21` to match the UDP `DC00..DC21` tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr)]
#[repr(u8)]
pub enum Opcode {
    #[strum(serialize = "EXIT")]
    Exit = 0,
    #[strum(serialize = "FSTAT")]
    Fstat = 1,
    #[strum(serialize = "WRITE")]
    Write = 2,
    #[strum(serialize = "READ")]
    Read = 3,
    #[strum(serialize = "OPEN")]
    Open = 4,
    #[strum(serialize = "CLOSE")]
    Close = 5,
    #[strum(serialize = "CREAT")]
    Creat = 6,
    #[strum(serialize = "LINK")]
    Link = 7,
    #[strum(serialize = "UNLINK")]
    Unlink = 8,
    #[strum(serialize = "CHDIR")]
    Chdir = 9,
    #[strum(serialize = "CHMOD")]
    Chmod = 10,
    #[strum(serialize = "LSEEK")]
    Lseek = 11,
    #[strum(serialize = "TIME")]
    Time = 12,
    #[strum(serialize = "STAT")]
    Stat = 13,
    #[strum(serialize = "UTIME")]
    Utime = 14,
    /// Reserved. Receiving this opcode logs an anomaly; it is never
    /// intentionally sent by a well-behaved target.
    #[strum(serialize = "BAD")]
    Bad = 15,
    #[strum(serialize = "OPENDIR")]
    Opendir = 16,
    #[strum(serialize = "READDIR")]
    Readdir = 17,
    #[strum(serialize = "CLOSEDIR")]
    Closedir = 18,
    #[strum(serialize = "REWINDDIR")]
    Rewinddir = 19,
    #[strum(serialize = "CDFSREAD")]
    Cdfsread = 20,
    #[strum(serialize = "GDBPACKET")]
    Gdbpacket = 21,
}

impl Opcode {
    pub const COUNT: usize = 22;

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// `true` for the five opcodes whose response carries a bulk `send_bulk`
    /// payload ahead of the `RETV` (spec §4.4).
    pub fn returns_bulk_data(self) -> bool {
        matches!(
            self,
            Opcode::Fstat | Opcode::Stat | Opcode::Read | Opcode::Readdir | Opcode::Cdfsread
        )
    }

    pub const ALL: [Opcode; Self::COUNT] = [
        Opcode::Exit,
        Opcode::Fstat,
        Opcode::Write,
        Opcode::Read,
        Opcode::Open,
        Opcode::Close,
        Opcode::Creat,
        Opcode::Link,
        Opcode::Unlink,
        Opcode::Chdir,
        Opcode::Chmod,
        Opcode::Lseek,
        Opcode::Time,
        Opcode::Stat,
        Opcode::Utime,
        Opcode::Bad,
        Opcode::Opendir,
        Opcode::Readdir,
        Opcode::Closedir,
        Opcode::Rewinddir,
        Opcode::Cdfsread,
        Opcode::Gdbpacket,
    ];
}

bitflags::bitflags! {
    /// The target's transport-independent `open()` flag bits (spec §4.4,
    /// "Flag translation for `open`"). Unknown bits are ignored by
    /// `from_bits_truncate`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const WRONLY = 0x1;
        const RDWR   = 0x2;
        const APPEND = 0x8;
        const CREAT  = 0x200;
        const TRUNC  = 0x400;
        const EXCL   = 0x800;
    }
}

/// The fixed 13-`u32`-field `stat`/`fstat` struct the target sees, host-
/// endian here; each transport's codec converts to its own wire order.
/// Hosts without `st_blksize`/`st_blocks` (Windows) send zero for both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatWire {
    pub st_dev: u32,
    pub st_ino: u32,
    pub st_mode: u32,
    pub st_nlink: u32,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_rdev: u32,
    pub st_size: u32,
    pub st_blksize: u32,
    pub st_blocks: u32,
    pub st_atime: u32,
    pub st_mtime: u32,
    pub st_ctime: u32,
}

impl StatWire {
    pub const FIELD_COUNT: usize = 13;
    pub const WIRE_LEN: usize = Self::FIELD_COUNT * 4;

    pub fn as_fields(&self) -> [u32; Self::FIELD_COUNT] {
        [
            self.st_dev,
            self.st_ino,
            self.st_mode,
            self.st_nlink,
            self.st_uid,
            self.st_gid,
            self.st_rdev,
            self.st_size,
            self.st_blksize,
            self.st_blocks,
            self.st_atime,
            self.st_mtime,
            self.st_ctime,
        ]
    }

    pub fn from_fields(f: [u32; Self::FIELD_COUNT]) -> Self {
        Self {
            st_dev: f[0],
            st_ino: f[1],
            st_mode: f[2],
            st_nlink: f[3],
            st_uid: f[4],
            st_gid: f[5],
            st_rdev: f[6],
            st_size: f[7],
            st_blksize: f[8],
            st_blocks: f[9],
            st_atime: f[10],
            st_mtime: f[11],
            st_ctime: f[12],
        }
    }
}

/// The target-visible `dirent` struct returned by `READDIR` (spec §4.4).
/// `d_name` is a fixed-size NUL-terminated buffer; 256 bytes matches the
/// original runtime's dirent name buffer (not specified in spec.md, sized
/// from `original_source` convention — see DESIGN.md).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirentWire {
    pub d_ino: u32,
    pub d_off: u32,
    pub d_reclen: u32,
    pub d_type: u32,
    pub d_name: [u8; Self::NAME_LEN],
}

impl DirentWire {
    pub const NAME_LEN: usize = 256;
    pub const WIRE_LEN: usize = 4 * 4 + Self::NAME_LEN;

    pub fn new(d_ino: u32, d_off: u32, d_reclen: u32, d_type: u32, name: &str) -> Self {
        let mut d_name = [0u8; Self::NAME_LEN];
        let bytes = name.as_bytes();
        let len = bytes.len().min(Self::NAME_LEN - 1);
        d_name[..len].copy_from_slice(&bytes[..len]);
        Self {
            d_ino,
            d_off,
            d_reclen,
            d_type,
            d_name,
        }
    }

    pub fn as_fields(&self) -> ([u32; 4], [u8; Self::NAME_LEN]) {
        ([self.d_ino, self.d_off, self.d_reclen, self.d_type], self.d_name)
    }
}
