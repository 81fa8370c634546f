//! The UDP transport variant (spec §4.1), grounded in
//! `original_source/host-src/dc-tool/ip-transport.c`'s `send_data`/
//! `recv_data`/`ip_xprt_send_command`/`ip_xprt_recv_packet`. Built on a
//! `tokio::net::UdpSocket` `connect()`-ed to the target, matching spec §6
//! ("Host binds an ephemeral port, `connect()`s to the target").

use crate::dispatch::request::Request;
use hostlink_common::bitmap::{self, CoverageBitmap};
use hostlink_common::error::{Error, Result};
use hostlink_common::syscall::{OpenFlags, Opcode};
use hostlink_common::wire::udp::{self, CommandPacket, Tag};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, trace, warn};

/// Default packet timeout, `T` in spec §4.1/§4.6 (250 ms).
pub const PACKET_TIMEOUT: Duration = Duration::from_millis(250);

/// The target's well-known UDP port (spec §6, "UDP endpoint").
pub const TARGET_PORT: u16 = 31313;

const RECV_BUF_LEN: usize = 2048;

pub struct UdpTransport {
    socket: UdpSocket,
    packet_timeout: Duration,
}

impl UdpTransport {
    pub async fn connect(target: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .await
            .map_err(Error::TransportFatal)?;
        socket.connect(target).await.map_err(Error::TransportFatal)?;
        Ok(Self {
            socket,
            packet_timeout: PACKET_TIMEOUT,
        })
    }

    async fn send_raw(&self, bytes: &[u8]) -> Result<()> {
        match self.socket.send(bytes).await {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(Error::TransportFatal(e)),
        }
    }

    pub async fn send_command(&self, tag: Tag, addr: u32, size: u32, data: &[u8]) -> Result<()> {
        let packet = CommandPacket::with_data(tag, addr, data.to_vec());
        let mut packet = packet;
        packet.size = size;
        self.send_raw(&packet.encode()).await
    }

    /// Poll until one datagram arrives or `deadline` passes.
    pub async fn recv_packet(&self, deadline: Duration) -> Result<CommandPacket> {
        let mut buf = [0u8; RECV_BUF_LEN];
        let n = timeout(deadline, self.socket.recv(&mut buf))
            .await
            .map_err(|_| Error::TransportRetry("recv timeout".into()))?
            .map_err(Error::TransportFatal)?;
        CommandPacket::decode(&buf[..n])
            .ok_or_else(|| Error::ProtocolCorrupt("undecodable UDP packet".into()))
    }

    /// Send algorithm from spec §4.1: `LBIN` handshake, then 1 KiB `PBIN`
    /// chunks, then `DBIN`; retransmit whatever the target's `DBIN` reply
    /// reports missing until its size field is zero.
    pub async fn send_bulk(&self, dcaddr: u32, data: &[u8]) -> Result<()> {
        let size = data.len() as u32;

        let mut reply = loop {
            self.send_command(Tag::Lbin, dcaddr, size, &[]).await?;
            match self.recv_packet(self.packet_timeout).await {
                Ok(p) if p.tag == Tag::Lbin => break p,
                Ok(_) | Err(Error::TransportRetry(_)) | Err(Error::ProtocolCorrupt(_)) => continue,
                Err(e) => return Err(e),
            }
        };

        let mut count = 0;
        let mut addr = dcaddr;
        for chunk in data.chunks(bitmap::CHUNK_SIZE) {
            self.send_command(Tag::Pbin, addr, chunk.len() as u32, chunk).await?;
            addr += bitmap::CHUNK_SIZE as u32;
            count += 1;
            if count == 15 {
                sleep(self.packet_timeout / 51).await;
                count = 0;
            }
        }
        sleep(self.packet_timeout / 10).await;

        loop {
            self.send_command(Tag::Dbin, 0, 0, &[]).await?;
            reply = loop {
                match self.recv_packet(self.packet_timeout).await {
                    Ok(p) if p.tag == Tag::Dbin => break p,
                    Ok(_) | Err(Error::TransportRetry(_)) | Err(Error::ProtocolCorrupt(_)) => continue,
                    Err(e) => return Err(e),
                }
            };
            if reply.size == 0 {
                return Ok(());
            }
            let missing_addr = reply.addr;
            let missing_len = reply.size as usize;
            let offset = (missing_addr - dcaddr) as usize;
            let missing = &data[offset..offset + missing_len];
            self.send_command(Tag::Pbin, missing_addr, missing_len as u32, missing)
                .await?;
        }
    }

    /// Receive algorithm from spec §4.1: issue `SBIN`/`SBINQ`, apply
    /// unsolicited `PBIN`-shaped chunks by address until the deadline
    /// elapses, then sweep missing slots with targeted `SBINQ` retries.
    pub async fn recv_bulk(&self, dcaddr: u32, len: usize, quiet: bool) -> Result<Vec<u8>> {
        let mut dst = vec![0u8; len];
        let mut bm = CoverageBitmap::new(len);

        let tag = if quiet { Tag::Sbiq } else { Tag::Sbin };
        self.send_command(tag, dcaddr, len as u32, &[]).await?;

        let mut deadline = Instant::now() + self.packet_timeout;
        while Instant::now() < deadline && !bm.is_complete() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.recv_packet(remaining).await {
                Ok(p) if p.tag != Tag::Dbin => {
                    if self.apply_chunk(&mut dst, &mut bm, dcaddr, &p) {
                        deadline = Instant::now() + self.packet_timeout;
                    }
                }
                Ok(_) => {}
                Err(Error::TransportRetry(_)) => break,
                Err(Error::ProtocolCorrupt(msg)) => {
                    warn!(msg, "dropped corrupt chunk");
                }
                Err(e) => return Err(e),
            }
        }

        while !bm.is_complete() {
            let Some(slot) = bm.first_missing() else {
                break;
            };
            let (offset, window_len) = bitmap::window(slot, len);
            self.send_command(Tag::Sbiq, dcaddr + offset as u32, window_len as u32, &[])
                .await?;

            let packet = loop {
                match self.recv_packet(self.packet_timeout).await {
                    Ok(p) if p.tag != Tag::Dbin => break p,
                    Ok(_) => continue,
                    Err(Error::TransportRetry(_)) | Err(Error::ProtocolCorrupt(_)) => continue,
                    Err(e) => return Err(e),
                }
            };
            self.apply_chunk(&mut dst, &mut bm, dcaddr, &packet);
            // consume the DBIN terminator for this sweep chunk
            let _ = self.recv_packet(self.packet_timeout).await;
        }

        Ok(dst)
    }

    fn apply_chunk(&self, dst: &mut [u8], bm: &mut CoverageBitmap, dcaddr: u32, packet: &CommandPacket) -> bool {
        let offset = packet.addr as i64 - dcaddr as i64;
        let Some(slot) = bitmap::slot_for_offset(bm, offset) else {
            warn!(addr = packet.addr, "chunk address outside bitmap range");
            return false;
        };
        let offset = offset as usize;
        let n = packet.data.len().min(dst.len() - offset);
        dst[offset..offset + n].copy_from_slice(&packet.data[..n]);
        bm.mark(slot);
        trace!(slot, "marked coverage slot");
        true
    }

    pub async fn execute(&self, entry: u32, console: bool, cdfs_redir: bool) -> Result<()> {
        let flags = ((cdfs_redir as u32) << 1) | console as u32;
        loop {
            self.send_command(Tag::Exec, entry, flags, &[]).await?;
            match self.recv_packet(self.packet_timeout).await {
                Ok(_) => return Ok(()),
                Err(Error::TransportRetry(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn send_reset(&self) -> Result<()> {
        self.send_command(Tag::Rbot, 0, 0, &[]).await
    }

    pub async fn send_retval(&self, retval: i32, bulk: Option<crate::dispatch::handlers::Bulk>, addr: u32) -> Result<()> {
        if let Some(bulk) = bulk {
            let bytes = bulk.encode(udp::to_wire_u32);
            self.send_bulk(addr, &bytes).await?;
        }
        self.send_command(Tag::Retv, retval as u32, retval as u32, &[]).await
    }

    /// `GDBPACKET`'s reply is the one exception to the bulk-then-`RETV`
    /// shape: `dc_gdbpacket` embeds the response bytes directly in the
    /// `RETV` packet's own payload (`addr`/`size` both set to `retval`)
    /// instead of driving a separate `LBIN`/`PBIN`/`DBIN` bulk transfer,
    /// since the payload is small enough to fit in one datagram.
    pub async fn send_retval_inline(&self, retval: i32, data: &[u8]) -> Result<()> {
        self.send_command(Tag::Retv, retval as u32, retval as u32, data).await
    }
}

/// Decode one `Request` from a `DC00..DC21` command packet, per the
/// per-opcode argument layouts in `ip-syscalls.c` (see DESIGN.md for the
/// `command_*_t` shape table this function implements).
pub fn decode_request(opcode: Opcode, addr: u32, size: u32, payload: &[u8]) -> Request {
    let cstr = |bytes: &[u8]| -> PathBuf {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        PathBuf::from(String::from_utf8_lossy(&bytes[..end]).into_owned())
    };
    let cstr2 = |bytes: &[u8]| -> (PathBuf, PathBuf) {
        let end1 = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        let first = &bytes[..end1];
        let rest = bytes.get(end1 + 1..).unwrap_or(&[]);
        (cstr(first), cstr(rest))
    };
    let value2 = || u32::from_be_bytes(payload.get(0..4).unwrap_or(&[0; 4]).try_into().unwrap());

    match opcode {
        Opcode::Exit => Request::Exit,
        Opcode::Fstat => Request::Fstat { fd: addr as i32, addr: size, size: value2() },
        Opcode::Write => Request::Write { fd: addr as i32, data: payload.get(4..4 + size as usize).unwrap_or(&[]).to_vec() },
        Opcode::Read => Request::Read { fd: addr as i32, addr: size, size: value2() },
        Opcode::Open => Request::Open {
            flags: OpenFlags::from_bits_truncate(addr),
            mode: size,
            path: cstr(payload),
        },
        Opcode::Close => Request::Close { fd: addr as i32 },
        Opcode::Creat => Request::Create { mode: addr, path: cstr(payload) },
        Opcode::Link => {
            let (from, to) = cstr2(payload);
            Request::Link { from, to }
        }
        Opcode::Unlink => Request::Unlink { path: cstr(payload) },
        Opcode::Chdir => Request::Chdir { path: cstr(payload) },
        Opcode::Chmod => Request::Chmod { mode: addr, path: cstr(payload) },
        Opcode::Lseek => Request::Lseek { fd: addr as i32, offset: size as i32 as i64, whence: value2() as i32 },
        Opcode::Time => Request::Time,
        Opcode::Stat => Request::Stat { addr, size, path: cstr(payload) },
        Opcode::Utime => {
            let set = value2() != 0;
            Request::Utime {
                set,
                atime: addr,
                mtime: size,
                path: cstr(payload.get(4..).unwrap_or(&[])),
            }
        }
        Opcode::Bad => Request::Bad,
        Opcode::Opendir => Request::Opendir { path: cstr(payload) },
        Opcode::Readdir => Request::Readdir { handle: addr, addr: size, size: value2() },
        Opcode::Closedir => Request::Closedir { handle: addr },
        Opcode::Rewinddir => Request::Rewinddir { handle: addr },
        Opcode::Cdfsread => Request::Cdfsread { lba: addr, addr: size, size: value2() },
        Opcode::Gdbpacket => Request::Gdbpacket {
            in_size: addr,
            out_size: size,
            payload: payload.get(..addr as usize).unwrap_or(&[]).to_vec(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_open_request() {
        let req = decode_request(Opcode::Open, 0x201, 0o644, b"game.bin\0");
        match req {
            Request::Open { flags, mode, path } => {
                assert!(flags.contains(OpenFlags::CREAT));
                assert_eq!(mode, 0o644);
                assert_eq!(path, PathBuf::from("game.bin"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn decodes_link_request_two_strings() {
        let mut payload = b"a.txt\0".to_vec();
        payload.extend_from_slice(b"b.txt\0");
        match decode_request(Opcode::Link, 0, 0, &payload) {
            Request::Link { from, to } => {
                assert_eq!(from, PathBuf::from("a.txt"));
                assert_eq!(to, PathBuf::from("b.txt"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn decodes_fstat_request() {
        let payload = 2048u32.to_be_bytes();
        match decode_request(Opcode::Fstat, 3, 0x8c01_0000, &payload) {
            Request::Fstat { fd, addr, size } => {
                assert_eq!(fd, 3);
                assert_eq!(addr, 0x8c01_0000);
                assert_eq!(size, 2048);
            }
            _ => panic!("wrong variant"),
        }
    }
}
