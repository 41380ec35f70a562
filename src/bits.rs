//! Bit-range helpers shared by the encoder, decoder and sandbox.
//!
//! Ranges are inclusive `[high:low]` positions inside a 64-bit container,
//! bit 0 being the least significant bit.

use crate::error::AsmError;

pub const MAX_BITS: u32 = 64;

/// Mask with the low `width` bits set.
#[inline]
pub fn mask(width: u32) -> u64 {
    if width >= MAX_BITS {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

#[inline]
pub fn width(high: u32, low: u32) -> u32 {
    high - low + 1
}

pub fn extract(word: u64, high: u32, low: u32) -> u64 {
    if low >= MAX_BITS || high < low {
        return 0;
    }
    let high = high.min(MAX_BITS - 1);
    (word >> low) & mask(width(high, low))
}

/// Writes `value` into `[high:low]` of `word`. Values wider than the field
/// are rejected unless `truncate` is set, in which case the excess is dropped.
pub fn insert(word: u64, high: u32, low: u32, value: u64, truncate: bool) -> Result<u64, AsmError> {
    if high < low || high >= MAX_BITS {
        return Err(AsmError::FieldOverflow {
            field: format!("[{high}:{low}]"),
            value: value as i64,
            width: 0,
        });
    }
    let w = width(high, low);
    let m = mask(w);
    if value & !m != 0 && !truncate {
        return Err(AsmError::FieldOverflow {
            field: format!("[{high}:{low}]"),
            value: value as i64,
            width: w,
        });
    }
    Ok((word & !(m << low)) | ((value & m) << low))
}

pub fn sign_extend(value: u64, width: u32) -> i64 {
    if width == 0 {
        return 0;
    }
    if width >= MAX_BITS {
        return value as i64;
    }
    let shift = MAX_BITS - width;
    ((value << shift) as i64) >> shift
}

pub fn signed_range(width: u32) -> (i64, i64) {
    match width {
        0 => (0, 0),
        w if w >= MAX_BITS => (i64::MIN, i64::MAX),
        w => (-(1i64 << (w - 1)), (1i64 << (w - 1)) - 1),
    }
}

pub fn unsigned_range(width: u32) -> (i64, i64) {
    match width {
        0 => (0, 0),
        w if w >= 63 => (0, i64::MAX),
        w => (0, (1i64 << w) - 1),
    }
}

pub fn fits_signed(value: i64, width: u32) -> bool {
    let (min, max) = signed_range(width);
    value >= min && value <= max
}

pub fn fits_unsigned(value: i64, width: u32) -> bool {
    let (min, max) = unsigned_range(width);
    value >= min && value <= max
}

/// Splits `word` into `len` bytes in the requested byte order.
pub fn to_bytes(word: u64, len: usize, little_endian: bool) -> Vec<u8> {
    let mut out: Vec<u8> = (0..len)
        .map(|i| if i < 8 { (word >> (8 * i)) as u8 } else { 0 })
        .collect();
    if !little_endian {
        out.reverse();
    }
    out
}

pub fn from_bytes(bytes: &[u8], little_endian: bool) -> u64 {
    let fold = |acc: u64, b: &u8| (acc << 8) | *b as u64;
    if little_endian {
        bytes.iter().take(8).rev().fold(0, fold)
    } else {
        bytes.iter().take(8).fold(0, fold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_and_insert_agree() {
        let w = insert(0, 11, 9, 0b101, false).unwrap();
        assert_eq!(w, 0b101 << 9);
        assert_eq!(extract(w, 11, 9), 0b101);
        assert_eq!(extract(0xFFFF_FFFF_FFFF_FFFF, 63, 0), u64::MAX);
    }

    #[test]
    fn insert_rejects_wide_values_unless_truncating() {
        assert!(matches!(
            insert(0, 3, 0, 0x1F, false),
            Err(AsmError::FieldOverflow { width: 4, .. })
        ));
        assert_eq!(insert(0, 3, 0, 0x1F, true).unwrap(), 0xF);
        assert!(insert(0, 64, 60, 1, true).is_err());
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend(0x1FB, 9), -5);
        assert_eq!(sign_extend(0x0FB, 9), 0xFB);
        assert_eq!(sign_extend(0xF, 4), -1);
    }

    #[test]
    fn ranges() {
        assert_eq!(signed_range(9), (-256, 255));
        assert_eq!(unsigned_range(9), (0, 511));
        assert!(fits_signed(-256, 9));
        assert!(!fits_signed(256, 9));
        assert!(fits_unsigned(511, 9));
        assert!(!fits_unsigned(-1, 9));
    }

    #[test]
    fn byte_order() {
        assert_eq!(to_bytes(0x1234, 2, true), vec![0x34, 0x12]);
        assert_eq!(to_bytes(0x1234, 2, false), vec![0x12, 0x34]);
        assert_eq!(from_bytes(&[0x34, 0x12], true), 0x1234);
        assert_eq!(from_bytes(&[0x12, 0x34], false), 0x1234);
    }
}
