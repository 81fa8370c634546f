//! Serial-transport framing constants and pure codec helpers (spec §3,
//! "Serial stream", and §4.2). The actual port I/O lives in
//! `host::transport::serial`; this module only knows how bytes are laid
//! out, not how they get read or written.

/// Chunk type byte: payload follows uncompressed.
pub const CHUNK_UNCOMPRESSED: u8 = b'U';
/// Chunk type byte: payload is LZO1x-1 compressed.
pub const CHUNK_COMPRESSED: u8 = b'C';

/// Per-chunk acknowledgement: accept and advance.
pub const ACK_GOOD: u8 = b'G';
/// Per-chunk acknowledgement: reject, resend the same chunk.
pub const ACK_BAD: u8 = b'B';

/// Baud-change handshake request byte.
pub const SPEED_HANDSHAKE: u8 = b'S';

/// Execute handshake request byte. Judgment call (DESIGN.md): the retrieved
/// `serial-transport.c` only covers the target-to-host syscall demux, not
/// the host-to-target EXECUTE trigger, so this mirrors the UDP `EXEC` tag's
/// role using the same handshake-byte-plus-echoed-integers shape the serial
/// protocol already uses for `SPEED_HANDSHAKE`.
pub const EXEC_HANDSHAKE: u8 = b'X';

/// Default baud rate of a freshly opened connection.
pub const DEFAULT_BAUD: u32 = 57600;

/// Up to 16 KiB per serial chunk (spec §3).
pub const MAX_CHUNK_SIZE: usize = 16 * 1024;

/// The "speed hack" 115200 override: the target's UART divisor rounds more
/// accurately to this value (spec §4.2).
pub const SPEED_HACK_115200: u32 = 111_600;

/// Sentinel meaning "derive the baud from an external clock" instead of
/// sending a literal value.
pub const EXTERNAL_CLOCK_BAUD: u32 = 0;

/// Upload handshake byte (`serial_xprt_send_data`).
pub const UPLOAD_HANDSHAKE: u8 = b'B';
/// Download handshake byte, target clears its screen first (`serial_xprt_recv_data`).
pub const DOWNLOAD_HANDSHAKE: u8 = b'F';
/// Download handshake byte, quiet variant (`serial_xprt_recv_data_quiet`).
pub const DOWNLOAD_HANDSHAKE_QUIET: u8 = b'G';

/// Fixed scratch address the target's LZO decompressor uses as its work
/// buffer during a host-initiated download (`serial_xprt_recv_data`'s
/// `wrkmem`).
pub const LZO_WRKMEM_ADDR: u32 = 0x8cff_0000;

/// Little-endian wire conversion for the integer-exchange primitives and
/// the `stat`/`dirent` struct fields (spec §3, "Serial stream").
pub fn to_wire_u32(host_value: u32) -> u32 {
    host_value.to_le()
}

pub fn from_wire_u32(wire_value: u32) -> u32 {
    u32::from_le(wire_value)
}

/// XOR checksum over a chunk payload.
pub fn xor_checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Resolve the actual baud value to write during the speed handshake,
/// applying the two overrides from spec §4.2.
pub fn negotiate_baud(requested: u32, speed_hack: bool, external_clock: bool) -> u32 {
    if external_clock {
        EXTERNAL_CLOCK_BAUD
    } else if speed_hack && requested == 115_200 {
        SPEED_HACK_115200
    } else {
        requested
    }
}

/// Header of one serial chunk: type byte + little-endian length. The
/// payload and trailing XOR byte are read/written separately by the
/// transport since their size depends on this header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub compressed: bool,
    pub len: u32,
}

impl ChunkHeader {
    pub fn encode(self) -> [u8; 5] {
        let mut out = [0u8; 5];
        out[0] = if self.compressed {
            CHUNK_COMPRESSED
        } else {
            CHUNK_UNCOMPRESSED
        };
        out[1..5].copy_from_slice(&self.len.to_le_bytes());
        out
    }

    pub fn decode(buf: [u8; 5]) -> Option<Self> {
        let compressed = match buf[0] {
            CHUNK_COMPRESSED => true,
            CHUNK_UNCOMPRESSED => false,
            _ => return None,
        };
        let len = u32::from_le_bytes(buf[1..5].try_into().ok()?);
        Some(Self { compressed, len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endianness_round_trips_for_all_u32() {
        for v in [0u32, 1, 0xdead_beef, u32::MAX, 0x0100_0000] {
            assert_eq!(from_wire_u32(to_wire_u32(v)), v);
        }
    }

    #[test]
    fn checksum_is_xor_fold() {
        assert_eq!(xor_checksum(&[]), 0);
        assert_eq!(xor_checksum(&[0x0f]), 0x0f);
        assert_eq!(xor_checksum(&[0x0f, 0xf0]), 0xff);
        assert_eq!(xor_checksum(&[1, 1]), 0);
    }

    #[test]
    fn speed_hack_only_applies_to_115200() {
        assert_eq!(negotiate_baud(115_200, true, false), SPEED_HACK_115200);
        assert_eq!(negotiate_baud(57_600, true, false), 57_600);
        assert_eq!(negotiate_baud(115_200, false, false), 115_200);
    }

    #[test]
    fn external_clock_overrides_everything() {
        assert_eq!(negotiate_baud(115_200, true, true), EXTERNAL_CLOCK_BAUD);
    }

    #[test]
    fn chunk_header_round_trips() {
        for h in [
            ChunkHeader {
                compressed: true,
                len: 4096,
            },
            ChunkHeader {
                compressed: false,
                len: 0,
            },
        ] {
            assert_eq!(ChunkHeader::decode(h.encode()), Some(h));
        }
    }

    #[test]
    fn chunk_header_rejects_bad_type_byte() {
        assert_eq!(ChunkHeader::decode([b'X', 0, 0, 0, 0]), None);
    }
}
