/// XOR two byte slices together, truncating to the shorter of the two.
pub fn xor_bytes(a: &[u8], b: &[u8]) -> Vec<u8> {
    a.iter().zip(b).map(|(x, y)| x ^ y).collect()
}

/// Replace control characters so recovered plaintext can be echoed to a
/// terminal without mangling the display.
pub fn to_printable(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_control() { '.' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case(&[0x00, 0xff, 0x55], &[0xff, 0xff, 0x55], &[0xff, 0x00, 0x00])]
    #[case(&[0x12, 0x34, 0x56, 0x78], &[0x0f, 0x0f], &[0x1d, 0x3b])]
    #[case(&[], &[0x01], &[])]
    fn xor_bytes_combines_slices(#[case] a: &[u8], #[case] b: &[u8], #[case] expected: &[u8]) {
        assert_eq!(xor_bytes(a, b), expected);
    }

    #[test]
    fn to_printable_masks_control_characters() {
        assert_eq!(to_printable("ab\x00c\ndef\x07"), "ab.c.def.");
    }
}
