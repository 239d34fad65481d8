//! Encrypted HTTP transport.
//!
//! Builds canonical headers, signs the request, derives the IV from the
//! signature, encrypts the body, and on the way back verifies the
//! response signature before any decrypted byte reaches the caller.

use chrono::Utc;
use miele_local_core::cipher::{decrypt_body, encrypt_body, pad_body, strip_trailing_zeros};
use miele_local_core::error::{Error, Result};
use miele_local_core::provision::ProvisioningInfo;
use miele_local_core::sign::{
    authorization_header, iv_from_signature, sign_bytes, signature_from_hex,
    verify_signature, CanonicalRequest,
};
use std::time::Duration;
use tracing::{debug, trace};

/// Accept header sent with every request
pub const ACCEPT: &str = "application/vnd.miele.v1+json";
/// Content type of encrypted request bodies
pub const CONTENT_TYPE: &str = "application/vnd.miele.v1+json";
/// Default per-request I/O timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(8);

/// Response metadata returned alongside the decrypted body.
#[derive(Clone, Debug)]
pub struct ResponseMeta {
    pub status: u16,
    /// Raw headers as received, in wire order
    pub headers: Vec<(String, String)>,
    /// Whether the body was covered by a verified signature
    /// (always true for non-empty bodies; empty bodies carry nothing to
    /// verify)
    pub verified: bool,
}

/// A verified, decrypted response.
#[derive(Clone, Debug)]
pub struct DecryptedResponse {
    pub body: Vec<u8>,
    pub meta: ResponseMeta,
}

impl DecryptedResponse {
    /// Interpret the body as text: strip the zero-padding tail, decode
    /// UTF-8.
    pub fn text(&self) -> Result<&str> {
        std::str::from_utf8(strip_trailing_zeros(&self.body))
            .map_err(|_| Error::Protocol("response body is not valid UTF-8".into()))
    }
}

/// Encrypted HTTP client for one appliance's provisioning material.
///
/// The material is immutable; the transport may be shared freely across
/// requests. All traffic is plaintext TCP port 80 — confidentiality
/// lives in the body cipher, authenticity in the per-message signature.
#[derive(Clone, Debug)]
pub struct Transport {
    info: ProvisioningInfo,
    client: reqwest::Client,
    date_override: Option<String>,
}

impl Transport {
    pub fn new(info: ProvisioningInfo) -> Result<Self> {
        Self::with_timeout(info, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(info: ProvisioningInfo, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { info, client, date_override: None })
    }

    /// Pin the `Date` header instead of taking the current time, making
    /// the request identity (and thus signature and IV) deterministic.
    pub fn with_date_override(mut self, date: impl Into<String>) -> Self {
        self.date_override = Some(date.into());
        self
    }

    pub fn provisioning(&self) -> &ProvisioningInfo {
        &self.info
    }

    /// Send one signed, encrypted request with the current time as the
    /// `Date` header (unless pinned with [`Self::with_date_override`]).
    pub async fn request(
        &self,
        method: &str,
        host: &str,
        path: &str,
        body: Option<&[u8]>,
    ) -> Result<DecryptedResponse> {
        let date = match &self.date_override {
            Some(date) => date.clone(),
            None => http_date_now(),
        };
        self.request_dated(method, host, path, body, &date).await
    }

    /// Send one signed, encrypted request with an explicit `Date` value.
    ///
    /// The signature is computed once over the canonical string carrying
    /// the caller's raw body; the IV falls out of that signature, and
    /// only then is the padded body encrypted. The headers on the wire
    /// are byte-for-byte the values that were signed.
    pub async fn request_dated(
        &self,
        method: &str,
        host: &str,
        path: &str,
        body: Option<&[u8]>,
        date: &str,
    ) -> Result<DecryptedResponse> {
        let method = normalize_method(method)?;
        let path = normalize_path(path);
        let body_plain = body.unwrap_or_default();
        let content_type = if body_plain.is_empty() { "" } else { CONTENT_TYPE };

        let canonical = CanonicalRequest {
            method: &method,
            host,
            path: &path,
            date,
            accept: ACCEPT,
            content_type,
            body: body_plain,
        };
        let signature = sign_bytes(&canonical.signing_bytes(), self.info.sign_key());
        let iv = iv_from_signature(&signature);

        let body_cipher = if body_plain.is_empty() {
            Vec::new()
        } else {
            encrypt_body(&pad_body(body_plain.to_vec()), self.info.aes_key(), &iv)?
        };

        let url = format!("http://{host}{path}");
        debug!(%method, %url, body_len = body_plain.len(), "sending request");

        let http_method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| Error::Usage(format!("invalid HTTP method {method:?}")))?;
        let mut builder = self
            .client
            .request(http_method, &url)
            .header("Accept", ACCEPT)
            .header("Accept-Encoding", "gzip")
            .header("Date", date)
            .header(
                "Authorization",
                authorization_header(&self.info.group_id_hex(), &signature),
            );
        if !content_type.is_empty() {
            builder = builder.header("Content-Type", content_type);
        }
        let response = builder
            .body(body_cipher)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{method} {url} failed: {e}")))?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();
        let response_date = header_value(&headers, "date").unwrap_or_default();
        let response_ct = header_value(&headers, "content-type").unwrap_or_default();
        let signature_hex = header_value(&headers, "x-signature");
        let cipher = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("failed to read response body: {e}")))?;

        trace!(status, cipher_len = cipher.len(), "response received");

        let decoded = self.verify_and_decrypt(
            &method,
            host,
            &path,
            &response_date,
            &response_ct,
            signature_hex.as_deref(),
            &cipher,
            &signature,
        );

        if !(200..300).contains(&status) {
            // diagnostics only; an unverifiable body is withheld, never
            // surfaced unverified
            return Err(Error::Device { status, body: decoded.ok().flatten() });
        }

        let body = decoded?;
        let verified = body.is_some();
        Ok(DecryptedResponse {
            body: body.unwrap_or_default(),
            meta: ResponseMeta { status, headers, verified },
        })
    }

    /// Verify the response signature, then decrypt. Returns `None` for
    /// an empty body (nothing was transmitted, nothing to verify).
    ///
    /// The `X-Signature` covers the response's own canonical string with
    /// the received ciphertext body; the device encrypts under the IV
    /// derived from the request's signature, which both sides already
    /// hold. Verification always completes before decryption.
    #[allow(clippy::too_many_arguments)]
    fn verify_and_decrypt(
        &self,
        method: &str,
        host: &str,
        path: &str,
        response_date: &str,
        response_ct: &str,
        signature_hex: Option<&str>,
        cipher: &[u8],
        request_signature: &[u8; 32],
    ) -> Result<Option<Vec<u8>>> {
        if cipher.is_empty() {
            return Ok(None);
        }
        let signature_hex = signature_hex
            .ok_or_else(|| Error::Auth("response carries no X-Signature header".into()))?;
        let signature = signature_from_hex(signature_hex)
            .ok_or_else(|| Error::Auth("malformed X-Signature header".into()))?;

        let canonical = CanonicalRequest {
            method,
            host,
            path,
            date: response_date,
            accept: "",
            content_type: response_ct,
            body: cipher,
        };
        if !verify_signature(&signature, &canonical.signing_bytes(), self.info.sign_key()) {
            return Err(Error::Auth("response signature mismatch".into()));
        }

        let iv = iv_from_signature(request_signature);
        decrypt_body(cipher, self.info.aes_key(), &iv).map(Some)
    }
}

/// Current time as an RFC-1123 GMT date, the form the protocol signs.
pub fn http_date_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn normalize_method(method: &str) -> Result<String> {
    let method = method.trim().to_ascii_uppercase();
    if method.is_empty() {
        return Err(Error::Usage("HTTP method cannot be empty".into()));
    }
    if method.chars().any(|c| c.is_whitespace()) {
        return Err(Error::Usage(format!(
            "HTTP method must not contain whitespace: {method:?}"
        )));
    }
    Ok(method)
}

fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn header_value(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_method() {
        assert_eq!(normalize_method("get").unwrap(), "GET");
        assert_eq!(normalize_method(" put ").unwrap(), "PUT");
        assert!(normalize_method("").is_err());
        assert!(normalize_method("G T").is_err());
    }

    #[test]
    fn test_normalize_path() {
        assert_eq!(normalize_path("Devices"), "/Devices");
        assert_eq!(normalize_path("/Devices"), "/Devices");
        assert_eq!(normalize_path("State?x=1"), "/State?x=1");
    }

    #[test]
    fn test_http_date_shape() {
        let date = http_date_now();
        assert!(date.ends_with(" GMT"));
        assert_eq!(date.matches(':').count(), 2);
    }

    #[test]
    fn test_header_value_case_insensitive() {
        let headers = vec![("X-Signature".to_string(), "AB".to_string())];
        assert_eq!(header_value(&headers, "x-signature").as_deref(), Some("AB"));
        assert!(header_value(&headers, "date").is_none());
    }
}
