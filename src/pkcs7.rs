// PKCS#7 byte padding, the scheme the oracle's server side validates.

use crate::error::{Error, Result};

/// Pad `bytes` up to a multiple of `block_size`. A message that already
/// fills its final block gains one whole block of padding.
pub fn pkcs7_pad(bytes: &[u8], block_size: usize) -> Vec<u8> {
    let n_pad = block_size - bytes.len() % block_size;
    let mut padded = Vec::with_capacity(bytes.len() + n_pad);
    padded.extend_from_slice(bytes);
    padded.resize(bytes.len() + n_pad, n_pad as u8);
    padded
}

/// Strip valid padding in place, or report that the padding is invalid.
pub fn pkcs7_unpad(bytes: &mut Vec<u8>) -> Result<()> {
    match padding_length(bytes) {
        Some(n_pad) => {
            bytes.truncate(bytes.len() - n_pad);
            Ok(())
        }
        None => Err(Error::InvalidPadding),
    }
}

fn padding_length(bytes: &[u8]) -> Option<usize> {
    let &n_pad = bytes.last()?;
    let n_pad = n_pad as usize;
    if n_pad == 0 || n_pad > bytes.len() {
        return None;
    }
    bytes[bytes.len() - n_pad..]
        .iter()
        .all(|&b| b as usize == n_pad)
        .then_some(n_pad)
}
