//! LEB128 integers: seven bits per byte, low group first, high bit set on
//! every byte but the last.

use super::error::DecodeError;

/// Longest encoding of a `u64`.
pub const MAX_LEN: usize = 10;

pub fn put_uvarint(out: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        out.push((v as u8) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

pub fn uvarint_len(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

/// Reads one uvarint from the front of `buf`, returning it with the number
/// of bytes consumed.
pub fn read_uvarint(buf: &[u8]) -> Result<(u64, usize), DecodeError> {
    let mut v: u64 = 0;
    for (i, &b) in buf.iter().enumerate() {
        if i == MAX_LEN || (i == MAX_LEN - 1 && b > 1) {
            return Err(DecodeError::VarintOverflow);
        }
        v |= u64::from(b & 0x7f) << (7 * i);
        if b < 0x80 {
            return Ok((v, i + 1));
        }
    }
    Err(DecodeError::UnexpectedEof)
}

pub fn zigzag(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

pub fn unzigzag(u: u64) -> i64 {
    ((u >> 1) as i64) ^ -((u & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_values_fit_one_byte() {
        let mut out = Vec::new();
        put_uvarint(&mut out, 127);
        assert_eq!(out, vec![0x7f]);
        out.clear();
        put_uvarint(&mut out, 300);
        assert_eq!(out, vec![0xac, 0x02]);
        assert_eq!(read_uvarint(&out).unwrap(), (300, 2));
    }

    #[test]
    fn test_extremes() {
        let mut out = Vec::new();
        put_uvarint(&mut out, u64::MAX);
        assert_eq!(out.len(), MAX_LEN);
        assert_eq!(uvarint_len(u64::MAX), MAX_LEN);
        assert_eq!(read_uvarint(&out).unwrap(), (u64::MAX, MAX_LEN));

        for v in [0, -1, 1, i64::MIN, i64::MAX] {
            assert_eq!(unzigzag(zigzag(v)), v);
        }
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(read_uvarint(&[0x80, 0x80]), Err(DecodeError::UnexpectedEof)));
        assert!(matches!(read_uvarint(&[]), Err(DecodeError::UnexpectedEof)));
        let too_long = [0xff; 11];
        assert!(matches!(read_uvarint(&too_long), Err(DecodeError::VarintOverflow)));
    }
}
