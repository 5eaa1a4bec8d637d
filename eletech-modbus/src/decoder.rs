//! Conversion of polled registers into channel values.

use crate::registers::RegisterMap;
use crate::transport::RegisterArray;

/// Number of registers holding one f32 value.
pub const FLOAT32_WORDS: usize = 2;

/// Outcome of decoding one poll response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decoded {
    /// A value for the channel mapped to the polled offset.
    Value { channel_id: &'static str, value: f32 },
    /// The registers hold NaN or an infinity.
    NonFinite { channel_id: &'static str, bits: u32 },
    /// Fewer registers than an f32 needs.
    Short { words: usize },
    /// The polled offset has no channel.
    Unmapped { offset: u16 },
}

/// Decode a big-endian f32 from the first two registers.
///
/// The first register holds the high 16 bits.
pub fn decode_f32(registers: &RegisterArray) -> Option<f32> {
    match *registers.as_slice() {
        [high, low, ..] => Some(f32::from_bits((u32::from(high) << 16) | u32::from(low))),
        _ => None,
    }
}

/// Decode the response of the poll registered for `offset`.
pub fn decode_response(map: &RegisterMap, offset: u16, registers: &RegisterArray) -> Decoded {
    let Some(channel_id) = map.channel_for(offset) else {
        return Decoded::Unmapped { offset };
    };

    match decode_f32(registers) {
        Some(value) if value.is_finite() => Decoded::Value { channel_id, value },
        Some(value) => Decoded::NonFinite {
            channel_id,
            bits: value.to_bits(),
        },
        None => Decoded::Short {
            words: registers.len(),
        },
    }
}
