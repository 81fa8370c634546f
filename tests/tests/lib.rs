//! End-to-end scenarios from spec §8, exercised against the real
//! transport code with a hand-rolled fake target standing in for the
//! console. No process spawning: these talk directly to `hostlink`'s
//! `UdpTransport`/`SerialTransport` over a loopback socket or an in-memory
//! duplex pipe.

use anyhow::Result;
use hostlink::transport::serial::SerialTransport;
use hostlink::transport::udp::UdpTransport;
use hostlink_common::wire::serial as serial_wire;
use hostlink_common::wire::udp::{CommandPacket, Tag};
use std::net::SocketAddr;
use tokio::net::UdpSocket;

async fn fake_target() -> (UdpSocket, SocketAddr) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    (socket, addr)
}

/// Scenario 1: uploading a 4096-byte raw binary at `0x8c010000` produces
/// exactly one `LBIN`, four 1024-byte `PBIN`s covering the address range
/// contiguously, and one terminating `DBIN(0, 0)`.
#[tokio::test]
async fn upload_4096_bytes_sends_one_lbin_four_pbin_one_dbin() -> Result<()> {
    let (target, target_addr) = fake_target().await;
    let transport = UdpTransport::connect(target_addr).await?;

    let data = vec![0xABu8; 4096];
    let send = tokio::spawn({
        let data = data.clone();
        async move { transport.send_bulk(0x8c01_0000, &data).await }
    });

    let mut buf = [0u8; 2048];
    let mut received = Vec::new();
    loop {
        let (n, peer) = target.recv_from(&mut buf).await.unwrap();
        let pkt = CommandPacket::decode(&buf[..n]).unwrap();
        match pkt.tag {
            Tag::Lbin => {
                target
                    .send_to(&CommandPacket::new(Tag::Lbin, 0, 0).encode(), peer)
                    .await
                    .unwrap();
                received.push(pkt);
            }
            Tag::Pbin => received.push(pkt),
            Tag::Dbin => {
                target
                    .send_to(&CommandPacket::new(Tag::Dbin, 0, 0).encode(), peer)
                    .await
                    .unwrap();
                received.push(pkt);
                break;
            }
            _ => {}
        }
    }
    send.await??;

    let lbins: Vec<_> = received.iter().filter(|p| p.tag == Tag::Lbin).collect();
    let pbins: Vec<_> = received.iter().filter(|p| p.tag == Tag::Pbin).collect();
    let dbins: Vec<_> = received.iter().filter(|p| p.tag == Tag::Dbin).collect();

    assert_eq!(lbins.len(), 1);
    assert_eq!(lbins[0].addr, 0x8c01_0000);
    assert_eq!(lbins[0].size, 4096);

    assert_eq!(pbins.len(), 4);
    for (i, pbin) in pbins.iter().enumerate() {
        assert_eq!(pbin.addr, 0x8c01_0000 + (i as u32) * 1024);
        assert_eq!(pbin.size, 1024);
        assert_eq!(pbin.data.len(), 1024);
    }

    assert_eq!(dbins.len(), 1);
    assert_eq!(dbins[0].addr, 0);
    assert_eq!(dbins[0].size, 0);

    Ok(())
}

/// Scenario 2: downloading 3000 bytes with no packet loss receives the
/// three window-sized chunks and reconstructs the data exactly.
#[tokio::test]
async fn download_3000_bytes_no_loss() -> Result<()> {
    let (target, target_addr) = fake_target().await;
    let transport = UdpTransport::connect(target_addr).await?;

    let expected: Vec<u8> = (0..3000u32).map(|i| (i % 256) as u8).collect();
    let addr = 0x8c02_0000u32;

    let responder = {
        let expected = expected.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            let (n, peer) = target.recv_from(&mut buf).await.unwrap();
            let req = CommandPacket::decode(&buf[..n]).unwrap();
            assert_eq!(req.tag, Tag::Sbin);
            assert_eq!(req.addr, addr);
            assert_eq!(req.size, 3000);

            for (offset, len) in [(0usize, 1024usize), (1024, 1024), (2048, 952)] {
                let chunk = expected[offset..offset + len].to_vec();
                let pkt = CommandPacket::with_data(Tag::Pbin, addr + offset as u32, chunk);
                target.send_to(&pkt.encode(), peer).await.unwrap();
            }
        })
    };

    let received = transport.recv_bulk(addr, 3000, false).await?;
    responder.await?;

    assert_eq!(received.len(), 3000);
    assert_eq!(received, expected);
    Ok(())
}

/// Scenario 3: downloading 3000 bytes with the middle slot dropped forces
/// the targeted `SBINQ` sweep, which recovers the missing window.
#[tokio::test]
async fn download_3000_bytes_with_middle_slot_dropped() -> Result<()> {
    let (target, target_addr) = fake_target().await;
    let transport = UdpTransport::connect(target_addr).await?;

    let expected: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();
    let addr = 0x8c03_0000u32;

    let responder = {
        let expected = expected.clone();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];

            // Initial SBIN: reply with slots 0 and 2 only, "dropping" slot 1.
            let (n, peer) = target.recv_from(&mut buf).await.unwrap();
            let req = CommandPacket::decode(&buf[..n]).unwrap();
            assert_eq!(req.tag, Tag::Sbin);
            for (offset, len) in [(0usize, 1024usize), (2048, 952)] {
                let chunk = expected[offset..offset + len].to_vec();
                let pkt = CommandPacket::with_data(Tag::Pbin, addr + offset as u32, chunk);
                target.send_to(&pkt.encode(), peer).await.unwrap();
            }

            // Sweep targets the missing window explicitly.
            let (n, peer) = target.recv_from(&mut buf).await.unwrap();
            let sweep = CommandPacket::decode(&buf[..n]).unwrap();
            assert_eq!(sweep.tag, Tag::Sbiq);
            assert_eq!(sweep.addr, addr + 1024);
            assert_eq!(sweep.size, 1024);

            let chunk = expected[1024..2048].to_vec();
            let pkt = CommandPacket::with_data(Tag::Pbin, addr + 1024, chunk);
            target.send_to(&pkt.encode(), peer).await.unwrap();
            target
                .send_to(&CommandPacket::new(Tag::Dbin, 0, 0).encode(), peer)
                .await
                .unwrap();
        })
    };

    let received = transport.recv_bulk(addr, 3000, false).await?;
    responder.await?;

    assert_eq!(received.len(), 3000);
    assert_eq!(received, expected);
    Ok(())
}

/// Scenario 4: a serial chunk NAKed once is resent byte-for-byte, and no
/// other chunk is transmitted while the resend is pending.
#[tokio::test]
async fn serial_chunk_nak_then_resend() -> Result<()> {
    let (host_io, dev_io) = tokio::io::duplex(64 * 1024);
    let mut host = SerialTransport::new(host_io);
    let mut dev = SerialTransport::new(dev_io);

    let data = vec![0x5Au8; 512];
    let sender_data = data.clone();
    let sender = tokio::spawn(async move { host.write_chunk(&sender_data).await });

    let first = dev.read_chunk(512).await?;
    dev.write_bytes(&[serial_wire::ACK_BAD]).await?;

    let second = dev.read_chunk(512).await?;
    dev.write_bytes(&[serial_wire::ACK_GOOD]).await?;

    sender.await??;

    assert_eq!(first, second);
    assert_eq!(second, data);
    Ok(())
}

/// Scenario 5: `opendir` on a missing directory is a quiet failure, and a
/// subsequent `readdir` against the returned handle reports "no entry"
/// instead of crashing.
#[tokio::test]
async fn opendir_missing_then_readdir_is_quiet() -> Result<()> {
    use hostlink::dispatch::handlers::{dispatch, SyscallContext};
    use hostlink::dispatch::request::Request;
    use std::path::PathBuf;

    let mut ctx = SyscallContext::new(None, None);
    let opened = dispatch(
        Request::Opendir {
            path: PathBuf::from("/definitely/missing/dir"),
        },
        &mut ctx,
    );
    assert_eq!(opened.retval, 0);

    let entry = dispatch(
        Request::Readdir {
            handle: opened.retval as u32,
            addr: 0,
            size: 0,
        },
        &mut ctx,
    );
    assert_eq!(entry.retval, 0);
    assert!(entry.bulk.is_none());
    Ok(())
}

/// Scenario 6: a `GDBPACKET` with a connected relay client forwards the
/// inbound bytes and returns whatever the client sends back.
#[tokio::test]
async fn gdb_relay_forwards_and_returns_response() -> Result<()> {
    use hostlink::dispatch::handlers::{dispatch_gdbpacket, SyscallContext};
    use hostlink::gdb::GdbRelay;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let relay = GdbRelay::bind_on(0).await?;
    let addr = relay.local_addr()?;
    let mut ctx = SyscallContext::new(None, Some(relay));

    let client = tokio::spawn(async move {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"$g#67");
        stream.write_all(b"+$OK#9").await.unwrap();
    });

    let result = dispatch_gdbpacket(5, 6, b"$g#67".to_vec(), &mut ctx).await;
    client.await?;

    assert_eq!(result.retval, 6);
    match result.bulk {
        Some(hostlink::dispatch::handlers::Bulk::Raw(bytes)) => assert_eq!(bytes, b"+$OK#9"),
        _ => panic!("expected a raw bulk payload"),
    }
    Ok(())
}
