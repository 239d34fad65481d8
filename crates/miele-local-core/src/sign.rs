//! Request canonicalization, HMAC-SHA-256 signatures, and IV derivation.
//!
//! The signature authenticates the whole request identity (method, host,
//! headers, path, body) and the symmetric IV is the first 16 bytes of the
//! raw signature, so a ciphertext replayed against a different path or
//! date fails both decryption and verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Raw signature length in bytes (HMAC-SHA-256 output)
pub const SIGNATURE_LEN: usize = 32;
/// Derived IV length in bytes (AES block)
pub const IV_LEN: usize = 16;
/// Authorization scheme name
pub const AUTH_SCHEME: &str = "MieleH256";

/// The deterministic request identity that gets signed.
///
/// The same construction covers both directions: requests sign the
/// caller's raw body, responses are verified over the received ciphertext
/// body with the response's own date and content type and an empty accept
/// field.
#[derive(Debug, Clone)]
pub struct CanonicalRequest<'a> {
    pub method: &'a str,
    pub host: &'a str,
    pub path: &'a str,
    pub date: &'a str,
    pub accept: &'a str,
    pub content_type: &'a str,
    pub body: &'a [u8],
}

impl CanonicalRequest<'_> {
    /// Build the signing string: `\n`-separated metadata lines, then the
    /// body bytes appended without a separator.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let path = if self.path.starts_with('/') {
            self.path.to_string()
        } else {
            format!("/{}", self.path)
        };
        let head = format!(
            "{}\nHost: {}\nDate: {}\nAccept: {}\nContent-Type: {}\n{}",
            self.method, self.host, self.date, self.accept, self.content_type, path
        );
        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(self.body);
        bytes
    }
}

/// HMAC-SHA-256 over the signing bytes.
pub fn sign_bytes(signing_bytes: &[u8], sign_key: &[u8]) -> [u8; SIGNATURE_LEN] {
    let mut mac =
        HmacSha256::new_from_slice(sign_key).expect("HMAC accepts keys of any length");
    mac.update(signing_bytes);
    mac.finalize().into_bytes().into()
}

/// Constant-time signature verification.
pub fn verify_signature(signature: &[u8], signing_bytes: &[u8], sign_key: &[u8]) -> bool {
    let computed = sign_bytes(signing_bytes, sign_key);
    computed.as_slice().ct_eq(signature).into()
}

/// The symmetric IV is the first 16 bytes of the raw signature.
pub fn iv_from_signature(signature: &[u8; SIGNATURE_LEN]) -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&signature[..IV_LEN]);
    iv
}

/// Render the `Authorization` header value:
/// `MieleH256 GROUP_ID:SIGNATURE_HEX` with upper-case hex.
pub fn authorization_header(group_id_hex: &str, signature: &[u8; SIGNATURE_LEN]) -> String {
    format!("{AUTH_SCHEME} {group_id_hex}:{}", hex::encode_upper(signature))
}

/// Decode a signature hex header (`X-Signature` or the signature part of
/// an `Authorization` value). Case-insensitive hex.
pub fn signature_from_hex(hex_str: &str) -> Option<[u8; SIGNATURE_LEN]> {
    let decoded = hex::decode(hex_str.trim()).ok()?;
    decoded.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical<'a>(body: &'a [u8]) -> CanonicalRequest<'a> {
        CanonicalRequest {
            method: "GET",
            host: "127.0.0.1",
            path: "/Devices",
            date: "Mon, 01 Jan 2024 00:00:00 GMT",
            accept: "application/vnd.miele.v1+json",
            content_type: "",
            body,
        }
    }

    #[test]
    fn test_signing_bytes_layout() {
        let bytes = canonical(b"BODY").signing_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text,
            "GET\nHost: 127.0.0.1\nDate: Mon, 01 Jan 2024 00:00:00 GMT\n\
             Accept: application/vnd.miele.v1+json\nContent-Type: \n/DevicesBODY"
        );
    }

    #[test]
    fn test_leading_slash_enforced() {
        let mut req = canonical(b"");
        req.path = "Devices";
        let text = String::from_utf8(req.signing_bytes()).unwrap();
        assert!(text.ends_with("\n/Devices"));
    }

    #[test]
    fn test_verify_round_trip() {
        let key = b"some signing key material";
        let bytes = canonical(b"payload").signing_bytes();
        let sig = sign_bytes(&bytes, key);
        assert!(verify_signature(&sig, &bytes, key));
    }

    #[test]
    fn test_verify_rejects_mutation() {
        let key = b"some signing key material";
        let bytes = canonical(b"payload").signing_bytes();
        let sig = sign_bytes(&bytes, key);

        let mut mutated = bytes.clone();
        mutated[0] ^= 0x01;
        assert!(!verify_signature(&sig, &mutated, key));

        let mut appended = bytes.clone();
        appended.push(b'~');
        assert!(!verify_signature(&sig, &appended, key));
    }

    #[test]
    fn test_iv_is_signature_prefix() {
        let sig = sign_bytes(b"abc", b"key");
        let iv = iv_from_signature(&sig);
        assert_eq!(&iv[..], &sig[..IV_LEN]);
    }

    #[test]
    fn test_authorization_header_format() {
        let sig = [0xABu8; SIGNATURE_LEN];
        let header = authorization_header("0123456789ABCDEF", &sig);
        assert!(header.starts_with("MieleH256 0123456789ABCDEF:"));
        assert!(header.ends_with(&"AB".repeat(SIGNATURE_LEN)));
    }

    #[test]
    fn test_signature_from_hex() {
        let sig = sign_bytes(b"abc", b"key");
        let parsed = signature_from_hex(&hex::encode_upper(sig)).unwrap();
        assert_eq!(parsed, sig);
        assert!(signature_from_hex("zz").is_none());
        assert!(signature_from_hex("ABCD").is_none());
    }
}
