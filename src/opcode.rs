//! Pure, total decoding of a raw 16-bit CHIP-8 instruction into its fields.

use modular_bitfield::{bitfield, specifiers::B4};

// Ordering of `bitfield` is from lsb to msb, same convention the teacher's
// `Instruction` type uses.
#[bitfield(bits = 16)]
#[repr(u16)]
struct RawInstruction {
    #[skip(setters)]
    n3: B4,
    #[skip(setters)]
    n2: B4,
    #[skip(setters)]
    n1: B4,
    #[skip(setters)]
    n0: B4,
}

/// A decoded opcode: the raw 16-bit value plus every field a CHIP-8
/// instruction might use. Decoding never fails — semantic validity is
/// determined at execution time, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub raw: u16,
    /// High nibble; selects the instruction group.
    pub group: u8,
    /// Low 12 bits.
    pub nnn: u16,
    /// Low 8 bits.
    pub nn: u8,
    /// Low nibble.
    pub n: u8,
    /// Bits 8-11.
    pub vx: u8,
    /// Bits 4-7.
    pub vy: u8,
}

impl Opcode {
    /// Decodes the two bytes fetched at `PC` (big-endian) into an [`Opcode`].
    pub fn decode(hi_byte: u8, lo_byte: u8) -> Opcode {
        // `RawInstruction` is constructed lsb -> msb.
        let raw = RawInstruction::from_bytes([lo_byte, hi_byte]);
        let n0 = raw.n0();
        let n1 = raw.n1();
        let n2 = raw.n2();
        let n3 = raw.n3();

        Opcode {
            raw: u16::from_be_bytes([hi_byte, lo_byte]),
            group: n0,
            nnn: (n1 as u16) << 8 | (n2 as u16) << 4 | (n3 as u16),
            nn: n2 << 4 | n3,
            n: n3,
            vx: n1,
            vy: n2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_clear_screen() {
        let op = Opcode::decode(0x00, 0xE0);
        assert_eq!(op.raw, 0x00E0);
        assert_eq!(op.group, 0x0);
        assert_eq!(op.nn, 0xE0);
    }

    #[test]
    fn decodes_draw_fields() {
        // D1 25 => DXYN with X=1, Y=2, N=5
        let op = Opcode::decode(0xD1, 0x25);
        assert_eq!(op.group, 0xD);
        assert_eq!(op.vx, 0x1);
        assert_eq!(op.vy, 0x2);
        assert_eq!(op.n, 0x5);
    }

    #[test]
    fn decodes_nnn_spans_three_nibbles() {
        // A2F0 => ANNN with NNN = 0x2F0
        let op = Opcode::decode(0xA2, 0xF0);
        assert_eq!(op.nnn, 0x2F0);
    }

    #[test]
    fn every_16_bit_value_decodes_without_panic() {
        for raw in [0x0000u16, 0x1234, 0x8DE6, 0xFFFF, 0xF065] {
            let [hi, lo] = raw.to_be_bytes();
            let op = Opcode::decode(hi, lo);
            assert_eq!(op.raw, raw);
        }
    }
}
