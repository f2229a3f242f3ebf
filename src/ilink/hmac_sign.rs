//! HMAC-SHA256 request signing for Negotiate/Establish requests.
//!
//! The key is the user's base64url-encoded secret, decoded to bytes and
//! used as an HMAC-SHA256 key over the canonical string encoded as UTF-8.
//! The 32-byte output is placed in the protocol's `hmacSignature` field.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{GatewayError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Decode a base64url secret into HMAC key bytes. Fatal if malformed — a
/// cryptographic/config failure is only legitimate as an error at session
/// construction time.
pub fn decode_secret(base64url_secret: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(base64url_secret)
        .map_err(|e| GatewayError::Crypto(format!("malformed base64url secret: {e}")))
}

/// Canonical string for a Negotiate request:
/// `requestTimestamp "\n" uuid "\n" sessionId "\n" firmId`.
pub fn negotiate_canonical_string(
    request_timestamp: u64,
    uuid: u64,
    session_id: &str,
    firm_id: &str,
) -> String {
    format!("{request_timestamp}\n{uuid}\n{session_id}\n{firm_id}")
}

/// Canonical string for an Establish request: extends the Negotiate
/// canonical string with `tradingSystemName tradingSystemVersion
/// tradingSystemVendor nextSentSeqNo keepAliveInterval`, each separated by
/// `\n`.
#[allow(clippy::too_many_arguments)]
pub fn establish_canonical_string(
    request_timestamp: u64,
    uuid: u64,
    session_id: &str,
    firm_id: &str,
    trading_system_name: &str,
    trading_system_version: &str,
    trading_system_vendor: &str,
    next_sent_seq_no: i64,
    keep_alive_interval: u32,
) -> String {
    let base = negotiate_canonical_string(request_timestamp, uuid, session_id, firm_id);
    format!(
        "{base}\n{trading_system_name}\n{trading_system_version}\n{trading_system_vendor}\n{next_sent_seq_no}\n{keep_alive_interval}"
    )
}

/// Compute the 32-byte HMAC-SHA256 signature over `canonical_string`,
/// keyed by `key_bytes` (already base64url-decoded via
/// [`decode_secret`]).
pub fn sign(key_bytes: &[u8], canonical_string: &str) -> Result<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key_bytes)
        .map_err(|e| GatewayError::Crypto(format!("invalid HMAC key: {e}")))?;
    mac.update(canonical_string.as_bytes());
    let result = mac.finalize().into_bytes();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

    #[test]
    fn negotiate_canonical_string_matches_literal_scenario() {
        let canonical = negotiate_canonical_string(1_600_000_000_000_000_000, 1_600_000_000_000_000, "ABC", "FIRM");
        assert_eq!(
            canonical,
            "1600000000000000000\n1600000000000000\nABC\nFIRM"
        );
    }

    #[test]
    fn hmac_is_deterministic_for_the_literal_scenario() {
        let canonical = negotiate_canonical_string(1_600_000_000_000_000_000, 1_600_000_000_000_000, "ABC", "FIRM");
        let key = decode_secret(SCENARIO_KEY).unwrap();

        let sig_a = sign(&key, &canonical).unwrap();
        let sig_b = sign(&key, &canonical).unwrap();
        assert_eq!(sig_a, sig_b);
    }

    #[test]
    fn changing_any_field_changes_the_signature() {
        let key = decode_secret(SCENARIO_KEY).unwrap();

        let base = negotiate_canonical_string(1_600_000_000_000_000_000, 1_600_000_000_000_000, "ABC", "FIRM");
        let changed_firm = negotiate_canonical_string(1_600_000_000_000_000_000, 1_600_000_000_000_000, "ABC", "OTHER");
        let changed_session = negotiate_canonical_string(1_600_000_000_000_000_000, 1_600_000_000_000_000, "XYZ", "FIRM");
        let changed_ts = negotiate_canonical_string(1_600_000_000_000_000_001, 1_600_000_000_000_000, "ABC", "FIRM");

        let sig_base = sign(&key, &base).unwrap();
        assert_ne!(sig_base, sign(&key, &changed_firm).unwrap());
        assert_ne!(sig_base, sign(&key, &changed_session).unwrap());
        assert_ne!(sig_base, sign(&key, &changed_ts).unwrap());
    }

    #[test]
    fn establish_canonical_string_extends_negotiate() {
        let negotiate = negotiate_canonical_string(1, 2, "SID", "FIRM");
        let establish = establish_canonical_string(1, 2, "SID", "FIRM", "SYS", "1.0", "VENDOR", 1, 30);
        assert!(establish.starts_with(&negotiate));
        assert_eq!(establish, "1\n2\nSID\nFIRM\nSYS\n1.0\nVENDOR\n1\n30");
    }

    #[test]
    fn malformed_base64url_secret_is_rejected() {
        assert!(decode_secret("not valid base64!!!").is_err());
    }
}
