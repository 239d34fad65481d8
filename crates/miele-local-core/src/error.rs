//! Error types for the Miele local protocol

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Closed set of protocol failure kinds.
///
/// Every kind carries a stable machine-readable code ([`Error::code`]) and
/// an HTTP status category ([`Error::status_category`]) so shells can
/// translate errors without matching on message text.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad arguments: malformed hex, wrong key lengths, https URLs,
    /// unknown leaf schema on strict decode
    #[error("usage error: {0}")]
    Usage(String),

    /// TCP/HTTP failure, timeout, unexpected disconnect
    #[error("transport error: {0}")]
    Transport(String),

    /// Missing or malformed X-Signature, signature mismatch
    #[error("authentication error: {0}")]
    Auth(String),

    /// Block-size violation or padding anomaly
    #[error("crypto error: {0}")]
    Crypto(String),

    /// DOP2 parse failure: residual bytes, malformed TLV length
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Non-2xx device status; the decrypted body is preserved for
    /// diagnostics when it could be verified
    #[error("device returned HTTP {status}")]
    Device { status: u16, body: Option<Vec<u8>> },
}

impl Error {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Usage(_) => "usage",
            Error::Transport(_) => "transport",
            Error::Auth(_) => "auth",
            Error::Crypto(_) => "crypto",
            Error::Protocol(_) => "protocol",
            Error::Device { .. } => "device",
        }
    }

    /// HTTP status category for upstream translation.
    ///
    /// DeviceError passes the appliance's own status through.
    pub fn status_category(&self) -> u16 {
        match self {
            Error::Usage(_) | Error::Protocol(_) => 400,
            Error::Transport(_) => 502,
            Error::Auth(_) | Error::Crypto(_) => 500,
            Error::Device { status, .. } => *status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_categories() {
        assert_eq!(Error::Usage("x".into()).status_category(), 400);
        assert_eq!(Error::Protocol("x".into()).status_category(), 400);
        assert_eq!(Error::Transport("x".into()).status_category(), 502);
        assert_eq!(Error::Auth("x".into()).status_category(), 500);
        assert_eq!(Error::Crypto("x".into()).status_category(), 500);
        assert_eq!(
            Error::Device { status: 503, body: None }.status_category(),
            503
        );
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Error::Usage("x".into()).code(), "usage");
        assert_eq!(Error::Device { status: 500, body: None }.code(), "device");
    }
}
