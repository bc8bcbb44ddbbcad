//! Packed binary-coded decimal: tens in the high nibble, units in the low one.

pub fn encode(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

pub fn decode(bcd: u8) -> u8 {
    (bcd >> 4) * 10 + (bcd & 0x0F)
}

/// Like [`decode`], but refuses nibbles above 9.
pub fn try_decode(bcd: u8) -> Option<u8> {
    if bcd >> 4 > 9 || bcd & 0x0F > 9 {
        return None;
    }

    Some(decode(bcd))
}
