//! Per-transport framing. UDP is fixed 12-byte-header, big-endian;
//! serial has no top-level framing and is little-endian throughout (spec
//! §3, "Endianness dualism" in DESIGN.md).

pub mod serial;
pub mod udp;
