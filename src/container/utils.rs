/// Checks whether all bytes in the given slice are lowercase hex digits.
///
/// Returns `true` if every byte is an ASCII digit (`'0'..='9'`) or a
/// lowercase letter in `'a'..='f'`. Uppercase letters, symbols, and
/// non-ASCII bytes all fail the check.
pub(super) fn is_lowercase_hex(src: &[u8]) -> bool {
    src.iter()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_lowercase_hex() {
        assert!(is_lowercase_hex(b"0123456789abcdef"));
        assert!(!is_lowercase_hex(b"ABCDEF"));
        assert!(!is_lowercase_hex(b"abcdefg"));
        assert!(!is_lowercase_hex(b"abc-def"));
        assert!(is_lowercase_hex(b""));
    }
}
