//! Big-endian integer helpers for the frame prefix.
//!
//! The wire format never depends on host byte order; these are the only
//! places integers cross the byte boundary.

/// Encode a u32 as 4 big-endian bytes
#[inline]
pub fn u32_to_be(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

/// Decode 4 big-endian bytes into a u32
#[inline]
pub fn u32_from_be(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

/// Encode a u64 as 8 big-endian bytes
#[inline]
pub fn u64_to_be(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Decode 8 big-endian bytes into a u64
#[inline]
pub fn u64_from_be(bytes: [u8; 8]) -> u64 {
    u64::from_be_bytes(bytes)
}

/// Read a big-endian u32 at `offset`, `None` if the slice is too short
pub fn read_u32_at(buf: &[u8], offset: usize) -> Option<u32> {
    let end = offset.checked_add(4)?;
    let bytes: [u8; 4] = buf.get(offset..end)?.try_into().ok()?;
    Some(u32_from_be(bytes))
}

/// Read a big-endian u64 at `offset`, `None` if the slice is too short
pub fn read_u64_at(buf: &[u8], offset: usize) -> Option<u64> {
    let end = offset.checked_add(8)?;
    let bytes: [u8; 8] = buf.get(offset..end)?.try_into().ok()?;
    Some(u64_from_be(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u32_most_significant_byte_first() {
        assert_eq!(u32_to_be(0x0102_0304), [0x01, 0x02, 0x03, 0x04]);
        assert_eq!(u32_to_be(5), [0, 0, 0, 5]);
        assert_eq!(u32_from_be([0x00, 0x00, 0x40, 0x00]), 16 * 1024);
    }

    #[test]
    fn test_u64_most_significant_byte_first() {
        assert_eq!(
            u64_to_be(0x0102_0304_0506_0708),
            [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]
        );
        assert_eq!(u64_from_be([0, 0, 0, 0, 0, 0x20, 0, 0]), 2 * 1024 * 1024);
        assert_eq!(u64_from_be([0xFF; 8]), u64::MAX);
    }

    #[test]
    fn test_read_at_offsets() {
        let buf = [0xAA, 0, 0, 0, 7, 0, 0, 0, 0, 0, 0, 0, 9];
        assert_eq!(read_u32_at(&buf, 1), Some(7));
        assert_eq!(read_u64_at(&buf, 5), Some(9));
        assert_eq!(read_u64_at(&buf, 6), None);
        assert_eq!(read_u32_at(&buf, usize::MAX), None);
    }
}
