//! The five error kinds from the error-handling design (spec §7).
//!
//! `TransportFatal` is the only variant that is allowed to cross the
//! transport boundary upward; `TransportRetry` is retried internally and
//! never surfaced; `ProtocolCorrupt` is logged and the offending chunk
//! dropped; `HostSyscallFailed` is translated by the dispatcher into a
//! target-visible `-1` retval; `UsageError` aborts the CLI before any
//! transport is opened.

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Socket/serial open, bind, connect or write failure that ends the session.
    #[error("transport fatal: {0}")]
    TransportFatal(#[source] io::Error),

    /// No data within the deadline, would-block, or a serial NAK. Callers
    /// retry internally; this variant should not escape a transport module.
    #[error("transport retry: {0}")]
    TransportRetry(String),

    /// A chunk address fell outside the bitmap range, an XOR checksum
    /// mismatched, or LZO decompression failed. The chunk is dropped and
    /// recovery is left to the retransmit loop.
    #[error("protocol corrupt: {0}")]
    ProtocolCorrupt(String),

    /// A host-side filesystem syscall failed. Carries the errno-equivalent
    /// retval the dispatcher should hand back to the target.
    #[error("host syscall failed: {source}")]
    HostSyscallFailed {
        #[source]
        source: io::Error,
        retval: i32,
    },

    /// Mutually exclusive flags, or a missing `-s` with `-d`.
    #[error("usage error: {0}")]
    UsageError(String),
}

impl Error {
    pub fn host_syscall_failed(source: io::Error) -> Self {
        let retval = source.raw_os_error().unwrap_or(-1);
        Self::HostSyscallFailed {
            source,
            retval: -retval.abs().max(1),
        }
    }

    /// `true` for the kinds the transport layer must retry internally
    /// rather than propagate.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransportRetry(_))
    }
}
