//! The base-64 digit codec. Every number in a Rex-C string — integers,
//! lengths, pointer offsets, index entries — is written with the same fixed
//! 64-symbol alphabet, most significant digit first, stripped to minimum
//! length. Zero is the empty digit run.

/// The 64-symbol alphabet in fixed order. The symbol at index `n` has value
/// `n`. Every character of an encoded value that is not a tag or delimiter
/// comes from this table.
pub const ALPHABET: [u8; 64] =
    *b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ-_";

/// Returns the value of an alphabet symbol, or `None` for any other byte.
pub fn digit_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'z' => Some(byte - b'a' + 10),
        b'A'..=b'Z' => Some(byte - b'A' + 36),
        b'-' => Some(62),
        b'_' => Some(63),
        _ => None,
    }
}

/// True for bytes that belong to the digit alphabet.
pub fn is_digit(byte: u8) -> bool {
    digit_value(byte).is_some()
}

/// Appends the canonical (minimum length) digit run for `n`. Zero appends
/// nothing.
pub fn push_digits(out: &mut String, mut n: u64) {
    let start = out.len();
    while n != 0 {
        out.insert(start, ALPHABET[(n % 64) as usize] as char);
        n /= 64;
    }
}

/// The canonical digit run for `n` as an owned string.
pub fn digits(n: u64) -> String {
    let mut out = String::new();
    push_digits(&mut out, n);
    out
}

/// Number of digits in the canonical run for `n` (zero for zero).
pub fn digit_len(mut n: u64) -> usize {
    let mut len = 0;
    while n != 0 {
        len += 1;
        n /= 64;
    }
    len
}

/// Appends `n` as exactly `width` digits, padded with zero-value digits.
/// Only index entries use this form; ordinary digit runs never carry a
/// leading zero.
pub fn push_fixed_digits(out: &mut String, n: u64, width: usize) {
    debug_assert!(digit_len(n).max(1) <= width, "value does not fit the field");
    for i in (0..width).rev() {
        let digit = (n >> (6 * i as u32)) & 63;
        out.push(ALPHABET[digit as usize] as char);
    }
}

/// Maps a signed integer onto the unsigned digit space, interleaving sign:
/// `0, -1, 1, -2, 2, ...` become `0, 1, 2, 3, 4, ...`.
pub fn zigzag(n: i64) -> u64 {
    (n.wrapping_shl(1) ^ (n >> 63)) as u64
}

/// Inverse of [`zigzag`].
pub fn unzigzag(z: u64) -> i64 {
    ((z >> 1) as i64) ^ -((z & 1) as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_is_a_bijection() {
        for (value, &symbol) in ALPHABET.iter().enumerate() {
            assert_eq!(digit_value(symbol), Some(value as u8));
        }
        assert_eq!(digit_value(b'+'), None);
        assert_eq!(digit_value(b' '), None);
    }

    #[test]
    fn zero_is_the_empty_run() {
        assert_eq!(digits(0), "");
        assert_eq!(digit_len(0), 0);
    }

    #[test]
    fn digit_runs_are_big_endian() {
        assert_eq!(digits(1), "1");
        assert_eq!(digits(63), "_");
        assert_eq!(digits(64), "10");
        assert_eq!(digits(64 * 64), "100");
        assert_eq!(digits(50), "O");
        assert_eq!(digits(84), "1k");
    }

    #[test]
    fn fixed_width_pads_with_zero_digits() {
        let mut out = String::new();
        push_fixed_digits(&mut out, 8, 2);
        assert_eq!(out, "08");
        let mut out = String::new();
        push_fixed_digits(&mut out, 0, 3);
        assert_eq!(out, "000");
    }

    #[test]
    fn zigzag_interleaves_sign() {
        assert_eq!(zigzag(0), 0);
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
        assert_eq!(zigzag(-2), 3);
        for n in [0, 1, -1, 42, -42, i64::MAX, i64::MIN] {
            assert_eq!(unzigzag(zigzag(n)), n);
        }
    }
}
