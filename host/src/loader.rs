//! The executable loader (spec §4.3), grounded in
//! `original_source/host-src/dc-tool/commands.c`'s `upload()`. Parses ELF
//! section headers via the `object` crate; falls back to a raw binary
//! upload when the file isn't a parseable ELF object.

use crate::transport::Transport;
use hostlink_common::error::{Error, Result};
use object::{Object, ObjectSection};
use std::path::Path;
use tracing::info;

/// Upload `path` starting at `address` (used only for the raw-binary
/// fallback; ELF objects are placed at their own section addresses, and
/// execution resumes at `e_entry`). Returns the address execution should
/// resume at.
pub async fn load(path: &Path, address: u32, transport: &mut Transport) -> Result<u32> {
    let bytes = std::fs::read(path).map_err(Error::TransportFatal)?;

    if let Ok(obj) = object::File::parse(&*bytes) {
        if obj.architecture() != object::Architecture::Unknown {
            let entry = obj.entry() as u32;
            info!(entry, "file format is ELF");
            let mut total = 0usize;
            for section in obj.sections() {
                let addr = section.address() as u32;
                if addr == 0 {
                    continue;
                }
                let Ok(data) = section.data() else { continue };
                if data.is_empty() {
                    continue;
                }
                info!(name = section.name().unwrap_or("?"), lma = addr, size = data.len(), "section");
                total += data.len();
                transport.send_bulk(addr, &data).await?;
            }
            info!(total, "transferred");
            return Ok(entry);
        }
    }

    info!(address, "file format is raw binary");
    let size = bytes.len();
    transport.send_bulk(address, &bytes).await?;
    info!(size, "transferred");
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::udp::UdpTransport;
    use hostlink_common::wire::udp::{CommandPacket, Tag};
    use tokio::net::UdpSocket;

    #[tokio::test]
    async fn raw_binary_sends_one_chunk_at_requested_address() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.bin");
        std::fs::write(&path, vec![0xAB; 4096]).unwrap();

        let fake_target = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target_addr = fake_target.local_addr().unwrap();
        let udp = UdpTransport::connect(target_addr).await.unwrap();
        let mut transport = Transport::Udp(udp);

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            let mut chunks = Vec::new();
            loop {
                let (n, peer) = fake_target.recv_from(&mut buf).await.unwrap();
                let pkt = CommandPacket::decode(&buf[..n]).unwrap();
                match pkt.tag {
                    Tag::Lbin => {
                        fake_target
                            .send_to(&CommandPacket::new(Tag::Lbin, 0, 0).encode(), peer)
                            .await
                            .unwrap();
                    }
                    Tag::Pbin => chunks.push((pkt.addr, pkt.data.len())),
                    Tag::Dbin => {
                        fake_target
                            .send_to(&CommandPacket::new(Tag::Dbin, 0, 0).encode(), peer)
                            .await
                            .unwrap();
                        break;
                    }
                    _ => {}
                }
            }
            chunks
        });

        let entry = load(&path, 0x8c01_0000, &mut transport).await.unwrap();
        let chunks = responder.await.unwrap();

        assert_eq!(entry, 0x8c01_0000);
        assert_eq!(
            chunks,
            vec![
                (0x8c01_0000, 1024),
                (0x8c01_0000 + 1024, 1024),
                (0x8c01_0000 + 2048, 1024),
                (0x8c01_0000 + 3072, 1024),
            ]
        );
    }
}
