use byteorder::{ByteOrder, LittleEndian};
use pl2303_types::ChipVariant;

use crate::{
    PID_PL2303_GB, PID_PL2303_GC, PID_PL2303_GE, PID_PL2303_GL, PID_PL2303_GS, PID_PL2303_GT,
};

// Class requests understood by the bridge, CDC shaped but carried on the
// vendor interface.
pub const SET_LINE_REQUEST: u8 = 0x20;
pub const GET_LINE_REQUEST: u8 = 0x21;
pub const SET_CONTROL_REQUEST: u8 = 0x22;

// Handshake lines for SET_CONTROL_REQUEST.
pub const CONTROL_DTR: u16 = 0x01;
pub const CONTROL_RTS: u16 = 0x02;

// The family has kept the same endpoint layout across generations.
pub const ENDPOINT_BULK_IN: u8 = 0x83;
pub const ENDPOINT_BULK_OUT: u8 = 0x02;
pub const BRIDGE_INTERFACE: u8 = 0;

const STOP_BITS_1: u8 = 0;
const PARITY_NONE: u8 = 0;
const DATA_BITS_8: u8 = 8;

// Dividers on the legacy parts only lock onto the standard speeds, so anything
// off this list is refused rather than clamped by the chip.
const BAUD_RATES_LEGACY: &[u32] = &[
    75, 150, 300, 600, 1200, 1800, 2400, 3600, 4800, 7200, 9600, 14400, 19200, 28800, 38400,
    57600, 115_200, 230_400,
];

const BAUD_RATES_HX: &[u32] = &[460_800, 614_400, 921_600, 1_228_800];

const BAUD_RATES_HXN: &[u32] = &[2_457_600, 3_000_000, 6_000_000];

/// The seven byte line coding blob sent with SET_LINE_REQUEST. Only the speed
/// varies, the frame is fixed at 8-N-1 (chip level default, not exposed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCoding {
    pub baud_rate: u32,
}

impl LineCoding {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }

    pub fn encode(&self) -> [u8; 7] {
        let mut coding = [0; 7];
        LittleEndian::write_u32(&mut coding[0..4], self.baud_rate);
        coding[4] = STOP_BITS_1;
        coding[5] = PARITY_NONE;
        coding[6] = DATA_BITS_8;
        coding
    }

    pub fn decode(coding: &[u8; 7]) -> Self {
        Self {
            baud_rate: LittleEndian::read_u32(&coding[0..4]),
        }
    }
}

/// Works out which hardware generation we're talking to. The descriptor is all
/// we have to go on: the GC/GB/GT/GL/GE/GS products are HXN, the original part
/// reports itself as a communications class device, and the HX bumped EP0 to
/// 64 bytes.
pub fn detect_variant(device_class: u8, max_packet_size_0: u8, product_id: u16) -> ChipVariant {
    match product_id {
        PID_PL2303_GC | PID_PL2303_GB | PID_PL2303_GT | PID_PL2303_GL | PID_PL2303_GE
        | PID_PL2303_GS => ChipVariant::Hxn,
        _ if device_class == 0x02 => ChipVariant::Legacy,
        _ if max_packet_size_0 == 0x40 => ChipVariant::Hx,
        _ => ChipVariant::Legacy,
    }
}

pub fn supports_baud(variant: ChipVariant, baud_rate: u32) -> bool {
    if BAUD_RATES_LEGACY.contains(&baud_rate) {
        return true;
    }

    match variant {
        ChipVariant::Legacy => false,
        ChipVariant::Hx => BAUD_RATES_HX.contains(&baud_rate),
        ChipVariant::Hxn => {
            BAUD_RATES_HX.contains(&baud_rate) || BAUD_RATES_HXN.contains(&baud_rate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PID_PL2303;

    #[test]
    fn line_coding_is_little_endian_8n1() {
        let coding = LineCoding::new(9600).encode();
        assert_eq!(coding, [0x80, 0x25, 0x00, 0x00, 0, 0, 8]);

        let coding = LineCoding::new(115_200).encode();
        assert_eq!(coding, [0x00, 0xc2, 0x01, 0x00, 0, 0, 8]);
    }

    #[test]
    fn line_coding_round_trips_the_baud() {
        let coding = LineCoding::new(230_400);
        assert_eq!(LineCoding::decode(&coding.encode()), coding);
    }

    #[test]
    fn variant_detection() {
        assert_eq!(detect_variant(0x02, 0x10, PID_PL2303), ChipVariant::Legacy);
        assert_eq!(detect_variant(0x00, 0x40, PID_PL2303), ChipVariant::Hx);
        assert_eq!(detect_variant(0x00, 0x40, PID_PL2303_GC), ChipVariant::Hxn);
        assert_eq!(detect_variant(0x00, 0x08, PID_PL2303), ChipVariant::Legacy);
    }

    #[test]
    fn standard_rates_work_everywhere() {
        for variant in [ChipVariant::Legacy, ChipVariant::Hx, ChipVariant::Hxn] {
            assert!(supports_baud(variant, 9600));
            assert!(supports_baud(variant, 115_200));
        }
    }

    #[test]
    fn high_speed_rates_need_newer_silicon() {
        assert!(!supports_baud(ChipVariant::Legacy, 921_600));
        assert!(supports_baud(ChipVariant::Hx, 921_600));
        assert!(!supports_baud(ChipVariant::Hx, 3_000_000));
        assert!(supports_baud(ChipVariant::Hxn, 3_000_000));
    }

    #[test]
    fn odd_rates_are_refused() {
        assert!(!supports_baud(ChipVariant::Hxn, 9601));
        assert!(!supports_baud(ChipVariant::Hxn, 0));
    }
}
