//! Provisioning material: the group id / group key pair established
//! during commissioning, and the AES/HMAC subkeys derived from it.

use crate::error::{Error, Result};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Group id length in bytes (16 hex characters)
pub const GROUP_ID_LEN: usize = 8;
/// Group key length in bytes (128 hex characters)
pub const GROUP_KEY_LEN: usize = 64;
/// AES-128 key length in bytes
pub const AES_KEY_LEN: usize = 16;

/// Wire form of the provisioning material: the JSON document exchanged
/// during commissioning. Strict read: exactly these keys, nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PairingPayload {
    #[serde(rename = "GroupID")]
    pub group_id: String,
    #[serde(rename = "GroupKey")]
    pub group_key: String,
}

/// Immutable provisioning material for one appliance.
///
/// The AES-128 encryption key is `group_key[0..16]` and the HMAC-SHA-256
/// signing key is `group_key[16..64]`. Two values compare equal iff they
/// are byte equal. Key bytes are zeroized on drop and never appear in
/// `Debug` output.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct ProvisioningInfo {
    group_id: [u8; GROUP_ID_LEN],
    group_key: [u8; GROUP_KEY_LEN],
}

impl std::fmt::Debug for ProvisioningInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvisioningInfo")
            .field("group_id", &self.group_id_hex())
            .field("group_key", &"<redacted>")
            .finish()
    }
}

fn decode_exact<const N: usize>(field: &str, hex_str: &str) -> Result<[u8; N]> {
    if hex_str.len() != N * 2 {
        return Err(Error::Usage(format!(
            "{field} must be {} hex characters, got {}",
            N * 2,
            hex_str.len()
        )));
    }
    let decoded = hex::decode(hex_str)
        .map_err(|_| Error::Usage(format!("{field} is not valid hex")))?;
    let mut out = [0u8; N];
    out.copy_from_slice(&decoded);
    Ok(out)
}

impl ProvisioningInfo {
    /// Construct from the hex pair. Input hex is case-insensitive; the
    /// canonical rendering is upper-case.
    pub fn from_hex(group_id: &str, group_key: &str) -> Result<Self> {
        Ok(Self {
            group_id: decode_exact::<GROUP_ID_LEN>("group id", group_id)?,
            group_key: decode_exact::<GROUP_KEY_LEN>("group key", group_key)?,
        })
    }

    /// Parse a pairing JSON document: `{"GroupID": ..., "GroupKey": ...}`.
    /// Missing keys, extra keys, and wrong sizes are rejected.
    pub fn from_pairing_json(bytes: &[u8]) -> Result<Self> {
        let payload: PairingPayload = serde_json::from_slice(bytes)
            .map_err(|e| Error::Usage(format!("invalid pairing JSON: {e}")))?;
        Self::from_hex(&payload.group_id, &payload.group_key)
    }

    /// Serialize as the pairing JSON document, field order GroupID then
    /// GroupKey, upper-case hex.
    pub fn to_pairing_json(&self) -> Vec<u8> {
        // PairingPayload serializes in struct field order
        serde_json::to_vec(&self.to_pairing_payload())
            .expect("pairing payload is always serializable")
    }

    /// The wire-form payload with canonical upper-case hex.
    pub fn to_pairing_payload(&self) -> PairingPayload {
        PairingPayload {
            group_id: self.group_id_hex(),
            group_key: hex::encode_upper(self.group_key),
        }
    }

    /// Draw fresh material from the operating system RNG.
    pub fn generate_random() -> Self {
        let mut group_id = [0u8; GROUP_ID_LEN];
        let mut group_key = [0u8; GROUP_KEY_LEN];
        OsRng.fill_bytes(&mut group_id);
        OsRng.fill_bytes(&mut group_key);
        Self { group_id, group_key }
    }

    /// AES-128 encryption key: the first 16 bytes of the group key.
    pub fn aes_key(&self) -> &[u8] {
        &self.group_key[..AES_KEY_LEN]
    }

    /// HMAC-SHA-256 signing key: the remainder of the group key.
    pub fn sign_key(&self) -> &[u8] {
        &self.group_key[AES_KEY_LEN..]
    }

    /// Upper-case hex rendering of the group id, as used in the
    /// `Authorization` header.
    pub fn group_id_hex(&self) -> String {
        hex::encode_upper(self.group_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "123456789ABCDEFE";
    fn key() -> String {
        ID.repeat(8)
    }

    #[test]
    fn test_from_hex_valid() {
        let info = ProvisioningInfo::from_hex(ID, &key()).unwrap();
        assert_eq!(info.aes_key().len(), AES_KEY_LEN);
        assert_eq!(info.sign_key().len(), GROUP_KEY_LEN - AES_KEY_LEN);
        assert_eq!(info.group_id_hex(), ID);
    }

    #[test]
    fn test_from_hex_case_insensitive() {
        let lower = ProvisioningInfo::from_hex(&ID.to_lowercase(), &key().to_lowercase());
        assert_eq!(lower.unwrap(), ProvisioningInfo::from_hex(ID, &key()).unwrap());
    }

    #[test]
    fn test_from_hex_rejects_bad_lengths() {
        assert!(ProvisioningInfo::from_hex("1234", &key()).is_err());
        assert!(ProvisioningInfo::from_hex(ID, "ABCD").is_err());
    }

    #[test]
    fn test_from_hex_rejects_non_hex() {
        let bad_id = "X".repeat(16);
        assert!(ProvisioningInfo::from_hex(&bad_id, &key()).is_err());
    }

    #[test]
    fn test_pairing_json_round_trip() {
        let info = ProvisioningInfo::generate_random();
        let json = info.to_pairing_json();
        let parsed = ProvisioningInfo::from_pairing_json(&json).unwrap();
        assert_eq!(info, parsed);
    }

    #[test]
    fn test_pairing_json_field_order() {
        let info = ProvisioningInfo::from_hex(ID, &key()).unwrap();
        let json = String::from_utf8(info.to_pairing_json()).unwrap();
        let id_pos = json.find("GroupID").unwrap();
        let key_pos = json.find("GroupKey").unwrap();
        assert!(id_pos < key_pos);
    }

    #[test]
    fn test_pairing_json_strict_read() {
        let extra = format!(
            r#"{{"GroupID":"{ID}","GroupKey":"{}","Extra":1}}"#,
            key()
        );
        assert!(ProvisioningInfo::from_pairing_json(extra.as_bytes()).is_err());

        let missing = format!(r#"{{"GroupID":"{ID}"}}"#);
        assert!(ProvisioningInfo::from_pairing_json(missing.as_bytes()).is_err());
    }

    #[test]
    fn test_random_material_differs() {
        let a = ProvisioningInfo::generate_random();
        let b = ProvisioningInfo::generate_random();
        assert_ne!(a, b);
    }

    #[test]
    fn test_debug_redacts_key() {
        let info = ProvisioningInfo::from_hex(ID, &"ABCD".repeat(32)).unwrap();
        let rendered = format!("{info:?}");
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("ABCDABCD"));
    }
}
