//! Utility functions.

/// Aligns an address or size up to the next multiple of `align`.
/// `align` must be a power of two.
pub fn align_up(value: u32, align: u32) -> u32 {
    assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}

/// Parse a hex literal, with or without a `0x` prefix.
pub fn parse_hex_u32(s: &str) -> Option<u32> {
    let digits = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
    u32::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_the_next_boundary() {
        assert_eq!(align_up(0, 32), 0);
        assert_eq!(align_up(1, 32), 32);
        assert_eq!(align_up(32, 32), 32);
        assert_eq!(align_up(0x8130_0001, 8), 0x8130_0008);
    }

    #[test]
    fn hex_literals_parse_with_or_without_prefix() {
        assert_eq!(parse_hex_u32("0x80003000"), Some(0x8000_3000));
        assert_eq!(parse_hex_u32("80003000"), Some(0x8000_3000));
        assert_eq!(parse_hex_u32("0Xff"), Some(0xFF));
        assert_eq!(parse_hex_u32("banana"), None);
    }
}
