//! Body codec: zero padding and AES-128-CBC in both directions.
//!
//! No authenticated mode is used on the body itself; authentication is
//! the HMAC signature over the canonical request (see [`crate::sign`]).

use crate::error::{Error, Result};
use aes::cipher::block_padding::NoPadding;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// AES block length in bytes
pub const BLOCK_LEN: usize = 16;

/// Zero-pad to the AES block size. The empty body stays empty; a body
/// already on a block boundary is unchanged.
pub fn pad_body(mut body: Vec<u8>) -> Vec<u8> {
    let rem = body.len() % BLOCK_LEN;
    if rem != 0 {
        body.resize(body.len() + (BLOCK_LEN - rem), 0);
    }
    body
}

/// Encrypt a padded plaintext. The input length must be a multiple of the
/// block size (use [`pad_body`] first).
pub fn encrypt_body(plain: &[u8], aes_key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    if plain.len() % BLOCK_LEN != 0 {
        return Err(Error::Crypto(format!(
            "plaintext length {} is not a multiple of the block size",
            plain.len()
        )));
    }
    let enc = Aes128CbcEnc::new_from_slices(aes_key, iv)
        .map_err(|_| Error::Crypto("bad AES key or IV length".into()))?;
    Ok(enc.encrypt_padded_vec_mut::<NoPadding>(plain))
}

/// Decrypt a ciphertext. The decoded body may carry trailing zero bytes;
/// callers interpreting it as text should use [`strip_trailing_zeros`].
pub fn decrypt_body(cipher: &[u8], aes_key: &[u8], iv: &[u8]) -> Result<Vec<u8>> {
    if cipher.len() % BLOCK_LEN != 0 {
        return Err(Error::Crypto(format!(
            "ciphertext length {} is not a multiple of the block size",
            cipher.len()
        )));
    }
    let dec = Aes128CbcDec::new_from_slices(aes_key, iv)
        .map_err(|_| Error::Crypto("bad AES key or IV length".into()))?;
    dec.decrypt_padded_vec_mut::<NoPadding>(cipher)
        .map_err(|_| Error::Crypto("decryption failed".into()))
}

/// Strip the zero-padding tail from a decrypted body.
pub fn strip_trailing_zeros(body: &[u8]) -> &[u8] {
    let end = body
        .iter()
        .rposition(|&b| b != 0)
        .map(|pos| pos + 1)
        .unwrap_or(0);
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [0x42; 16];
    const IV: [u8; 16] = [
        0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15,
    ];

    #[test]
    fn test_pad_body() {
        assert_eq!(pad_body(vec![]), Vec::<u8>::new());
        assert_eq!(pad_body(b"PAYLOAD".to_vec()).len(), 16);
        assert_eq!(
            pad_body(b"PAYLOAD".to_vec()),
            b"PAYLOAD\0\0\0\0\0\0\0\0\0".to_vec()
        );
        // already aligned: unchanged
        let aligned = vec![7u8; 32];
        assert_eq!(pad_body(aligned.clone()), aligned);
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let plain = pad_body(b"PAYLOAD".to_vec());
        let cipher = encrypt_body(&plain, &KEY, &IV).unwrap();
        assert_ne!(cipher, plain);
        assert_eq!(decrypt_body(&cipher, &KEY, &IV).unwrap(), plain);
    }

    #[test]
    fn test_key_sensitivity() {
        let plain = pad_body(b"HELLO ALICE\n\tTHIS IS BOB\n\n\t!! }".to_vec());
        let cipher = encrypt_body(&plain, &KEY, &IV).unwrap();

        let mut corrupt = KEY;
        corrupt[0] ^= 0x01;
        let decrypted = decrypt_body(&cipher, &corrupt, &IV).unwrap();
        assert_ne!(decrypted, plain);
    }

    #[test]
    fn test_unaligned_input_rejected() {
        assert!(encrypt_body(b"short", &KEY, &IV).is_err());
        assert!(decrypt_body(&[0u8; 17], &KEY, &IV).is_err());
    }

    #[test]
    fn test_bad_key_length_rejected() {
        let plain = [0u8; 16];
        assert!(encrypt_body(&plain, &KEY[..8], &IV).is_err());
        assert!(encrypt_body(&plain, &KEY, &IV[..8]).is_err());
    }

    #[test]
    fn test_strip_trailing_zeros() {
        assert_eq!(strip_trailing_zeros(b"abc\0\0\0"), b"abc");
        assert_eq!(strip_trailing_zeros(b"abc"), b"abc");
        assert_eq!(strip_trailing_zeros(b"\0\0"), b"");
        assert_eq!(strip_trailing_zeros(b""), b"");
        // interior zeros preserved
        assert_eq!(strip_trailing_zeros(b"a\0b\0"), b"a\0b");
    }
}
