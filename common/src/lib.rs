//! Wire-level types shared by the UDP and serial transports.
//!
//! Nothing in this crate touches a socket, a serial port, or the
//! filesystem. It defines the command tags, the 21-opcode syscall set, the
//! `stat`/`dirent` wire layouts, the open-directory slot table, and the
//! typed error enum that both transports and the dispatcher share.

pub mod bitmap;
pub mod dirtable;
pub mod error;
pub mod syscall;
pub mod wire;

pub use error::{Error, Result};
