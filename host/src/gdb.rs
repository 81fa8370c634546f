//! The GDB relay (spec §4.5), grounded in `original_source/host-src/dc-tool/
//! gdb.c` and the two `dc_gdbpacket` implementations. A TCP listener bound
//! to `127.0.0.1:2159`, opened at startup when `-g` is passed; the single
//! accepted client is lazily established on the first `GDBPACKET`.

use std::io;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

/// The "process terminated" packet the original sends on session close
/// (`gdb_socket_close` in `gdb.c`).
const TERMINATED_PACKET: &[u8] = b"+$X0f#ee";

/// Target's relay read cap, matching `GDBBUFSIZE` in `gdb.h`.
const GDB_BUF_SIZE: usize = 1024;

pub struct GdbRelay {
    listener: TcpListener,
    client: Option<TcpStream>,
}

/// The relay's well-known port (spec §6, "GDB endpoint").
pub const PORT: u16 = 2159;

impl GdbRelay {
    pub async fn bind() -> io::Result<Self> {
        Self::bind_on(PORT).await
    }

    /// Bind to an explicit port; `0` picks an ephemeral one. Exposed beyond
    /// the crate so integration tests can stand up a relay without
    /// colliding on the well-known port.
    pub async fn bind_on(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await?;
        Ok(Self {
            listener,
            client: None,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Forward `payload` (exactly `in_size` bytes) to the client if
    /// `in_size > 0`, then read back up to `min(out_size, 1024)` bytes if
    /// `out_size > 0`. A zero-length read invalidates the client so the next
    /// packet blocks on `accept` again (spec §4.5).
    pub async fn relay(&mut self, in_size: u32, out_size: u32, payload: &[u8]) -> io::Result<Vec<u8>> {
        if self.client.is_none() {
            info!("waiting for gdb client connection...");
            let (stream, _) = self.listener.accept().await?;
            self.client = Some(stream);
        }

        let client = self.client.as_mut().expect("just established above");

        if in_size > 0 {
            client.write_all(&payload[..in_size as usize]).await?;
        }

        if out_size == 0 {
            return Ok(Vec::new());
        }

        let cap = (out_size as usize).min(GDB_BUF_SIZE);
        let mut buf = vec![0u8; cap];
        let n = client.read(&mut buf).await?;
        if n == 0 {
            self.client = None;
        }
        buf.truncate(n);
        Ok(buf)
    }

    /// Send the termination packet and drop both sockets.
    pub async fn close(&mut self) {
        if let Some(client) = self.client.as_mut() {
            let _ = client.write_all(TERMINATED_PACKET).await;
        }
        self.client = None;
    }
}
