//! The two transport variants (spec §4.1/§4.2), dispatched through one enum
//! rather than a trait object — mirroring the teacher's `ContainerIO::
//! {Terminal, Streams}` enum dispatch, since the two variants' read shapes
//! (a whole buffered packet vs. an incrementally-read byte stream) diverge
//! enough that a shared trait would need to leak one side's framing into
//! the other.

pub mod serial;
pub mod udp;

use hostlink_common::error::Result;
use tokio_serial::SerialStream;

/// The concrete serial port type the `hostlink` binary runs against; the
/// generic `serial::SerialTransport<S>` itself is tested against
/// `tokio::io::duplex` pipes.
pub type SerialPort = serial::SerialTransport<SerialStream>;

pub enum Transport {
    Udp(udp::UdpTransport),
    Serial(SerialPort),
}

impl Transport {
    /// Host-initiated upload of one chunk at `dcaddr` (spec §4.3): on UDP
    /// this is one `LBIN`/`PBIN*`/`DBIN` exchange; on serial it is one
    /// handshake-framed `host_upload` call.
    pub async fn send_bulk(&mut self, dcaddr: u32, data: &[u8]) -> Result<()> {
        match self {
            Transport::Udp(t) => t.send_bulk(dcaddr, data).await,
            Transport::Serial(t) => t.host_upload(dcaddr, data).await,
        }
    }

    /// Host-initiated download of `len` bytes from `dcaddr` (spec §4.3).
    /// `quiet` selects the silent variant on both transports (`SBINQ` /
    /// the `'G'` handshake), suppressing the target's screen clear.
    pub async fn recv_bulk(&mut self, dcaddr: u32, len: usize, quiet: bool) -> Result<Vec<u8>> {
        match self {
            Transport::Udp(t) => t.recv_bulk(dcaddr, len, quiet).await,
            Transport::Serial(t) => t.host_download(dcaddr, len, quiet).await,
        }
    }

    /// Trigger execution at `entry` (spec §4.6).
    pub async fn execute(&mut self, entry: u32, console: bool, cdfs_redir: bool) -> Result<()> {
        match self {
            Transport::Udp(t) => t.execute(entry, console, cdfs_redir).await,
            Transport::Serial(t) => t.execute(entry, console, cdfs_redir).await,
        }
    }
}
