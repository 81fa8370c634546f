use hostlink_common::bitmap::CoverageBitmap;
use hostlink_common::syscall::OpenFlags;
use hostlink_common::wire::udp::{from_wire_u32, to_wire_u32};
use proptest::prelude::*;

proptest! {
    /// Spec §8: "for all 32-bit v, decoding the UDP encoding of v yields v".
    #[test]
    fn udp_endianness_round_trips(v in any::<u32>()) {
        prop_assert_eq!(from_wire_u32(to_wire_u32(v)), v);
    }

    /// Spec §8: "after every successful recv_bulk(N), every slot in
    /// [0, ceil(N/1024)) is marked exactly once".
    #[test]
    fn bitmap_completeness(len in 0usize..=200_000) {
        let mut bm = CoverageBitmap::new(len);
        let slots = bm.len();
        for slot in 0..slots {
            prop_assert!(bm.mark(slot));
        }
        prop_assert!(bm.is_complete());
        prop_assert_eq!(bm.missing().count(), 0);
    }

    /// Spec §8: "every combination of the 6 defined bits maps to a
    /// consistent host flag set; unknown bits are ignored".
    #[test]
    fn open_flag_mapping_ignores_unknown_bits(raw in any::<u32>()) {
        let known = 0x1 | 0x2 | 0x8 | 0x200 | 0x400 | 0x800;
        let flags = OpenFlags::from_bits_truncate(raw);
        prop_assert_eq!(flags.bits(), raw & known);
    }
}
