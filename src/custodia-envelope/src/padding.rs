//! PKCS#7 padding for the 16-byte AES block.

use crate::error::EnvelopeError;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Pad `data` to a whole number of blocks.
///
/// Padding length is always in `[1, 16]`: input that is already block-aligned
/// gains a full block of `0x10`, which is what keeps unpadding unambiguous.
#[must_use]
pub fn pad(data: &[u8]) -> Vec<u8> {
    let pad_len = BLOCK_SIZE - (data.len() % BLOCK_SIZE);
    let mut padded = Vec::with_capacity(data.len() + pad_len);
    padded.extend_from_slice(data);
    padded.resize(data.len() + pad_len, pad_len as u8);
    padded
}

/// Strip PKCS#7 padding.
///
/// # Errors
///
/// [`EnvelopeError::BadPadding`] when the final byte is `0x00` or greater
/// than the block size, when the buffer is shorter than the claimed padding,
/// or when any padding byte differs from the pad length.
pub fn unpad(data: &[u8]) -> Result<&[u8], EnvelopeError> {
    let last = *data.last().ok_or(EnvelopeError::BadPadding)?;
    let pad_len = last as usize;
    if pad_len == 0 || pad_len > BLOCK_SIZE || pad_len > data.len() {
        return Err(EnvelopeError::BadPadding);
    }

    let (rest, padding) = data.split_at(data.len() - pad_len);
    if padding.iter().any(|&b| b != last) {
        return Err(EnvelopeError::BadPadding);
    }
    Ok(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_to_next_block() {
        let padded = pad(b"hello world"); // 11 bytes
        assert_eq!(padded.len(), 16);
        assert_eq!(&padded[11..], &[5u8; 5]);
    }

    #[test]
    fn aligned_input_gains_full_block() {
        let padded = pad(&[0xAAu8; 16]);
        assert_eq!(padded.len(), 32);
        assert_eq!(&padded[16..], &[0x10u8; 16]);
    }

    #[test]
    fn empty_input_becomes_one_block() {
        let padded = pad(b"");
        assert_eq!(padded, vec![0x10u8; 16]);
        assert_eq!(unpad(&padded).unwrap(), b"");
    }

    #[test]
    fn roundtrip_every_length_in_two_blocks() {
        for len in 0..=32 {
            let data: Vec<u8> = (0..len as u8).collect();
            assert_eq!(unpad(&pad(&data)).unwrap(), data.as_slice(), "len {len}");
        }
    }

    #[test]
    fn rejects_zero_padding_byte() {
        let mut block = [7u8; 16];
        block[15] = 0x00;
        assert!(matches!(unpad(&block), Err(EnvelopeError::BadPadding)));
    }

    #[test]
    fn rejects_oversized_padding_byte() {
        for last in [0x11u8, 0x7F, 0xFF] {
            let mut block = [7u8; 16];
            block[15] = last;
            assert!(matches!(unpad(&block), Err(EnvelopeError::BadPadding)));
        }
    }

    #[test]
    fn rejects_inconsistent_fill() {
        // Claims 4 bytes of padding but one of them is wrong.
        let mut block = [9u8; 16];
        block[12] = 0x04;
        block[13] = 0x03;
        block[14] = 0x04;
        block[15] = 0x04;
        assert!(matches!(unpad(&block), Err(EnvelopeError::BadPadding)));
    }

    #[test]
    fn rejects_empty_buffer() {
        assert!(matches!(unpad(&[]), Err(EnvelopeError::BadPadding)));
    }
}
