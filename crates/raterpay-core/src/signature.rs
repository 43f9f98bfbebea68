//! Payment webhook signatures.
//!
//! The processor signs `"<timestamp>.<raw body>"` with a key derived from
//! the shared webhook secret and sends `t=<unix>,v1=<hex mac>` in the
//! `x-webhook-signature` header. Verification is keyed BLAKE3 with a
//! constant-time digest comparison; the timestamp bounds replay of captured
//! deliveries.

use chrono::{DateTime, Utc};
use thiserror::Error;

const SIGNING_CONTEXT: &str = "raterpay v1 payment-webhook";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is malformed")]
    Malformed,
    #[error("signature timestamp is outside the allowed tolerance")]
    Expired,
    #[error("signature does not match payload")]
    Mismatch,
}

/// Derive the 32-byte MAC key from the configured secret. Derivation keeps
/// arbitrary-length secrets usable as keyed-hash keys.
pub fn signing_key(secret: &str) -> [u8; 32] {
    blake3::derive_key(SIGNING_CONTEXT, secret.as_bytes())
}

/// Produce a signature header for `body` at `timestamp`. Used by the test
/// harness and by processor simulators in staging.
pub fn sign(secret: &str, timestamp: i64, body: &[u8]) -> String {
    let mac = compute_mac(&signing_key(secret), timestamp, body);
    format!("t={timestamp},v1={}", hex::encode(mac.as_bytes()))
}

pub fn verify(
    secret: &str,
    header: &str,
    body: &[u8],
    tolerance_secs: i64,
    now: DateTime<Utc>,
) -> Result<(), SignatureError> {
    let (timestamp, provided) = parse_header(header)?;

    if tolerance_secs > 0 && (now.timestamp() - timestamp).abs() > tolerance_secs {
        return Err(SignatureError::Expired);
    }

    let expected = compute_mac(&signing_key(secret), timestamp, body);
    // blake3::Hash compares in constant time.
    if expected != provided {
        return Err(SignatureError::Mismatch);
    }

    Ok(())
}

fn compute_mac(key: &[u8; 32], timestamp: i64, body: &[u8]) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new_keyed(key);
    hasher.update(timestamp.to_string().as_bytes());
    hasher.update(b".");
    hasher.update(body);
    hasher.finalize()
}

fn parse_header(header: &str) -> Result<(i64, [u8; 32]), SignatureError> {
    let mut timestamp: Option<i64> = None;
    let mut mac: Option<[u8; 32]> = None;

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            return Err(SignatureError::Malformed);
        };
        match key {
            "t" => {
                timestamp = Some(value.parse().map_err(|_| SignatureError::Malformed)?);
            }
            "v1" => {
                let bytes = hex::decode(value).map_err(|_| SignatureError::Malformed)?;
                mac = Some(
                    bytes
                        .as_slice()
                        .try_into()
                        .map_err(|_| SignatureError::Malformed)?,
                );
            }
            // Unknown scheme versions are skipped so the processor can
            // rotate schemes without breaking verification of v1.
            _ => {}
        }
    }

    match (timestamp, mac) {
        (Some(timestamp), Some(mac)) => Ok((timestamp, mac)),
        _ => Err(SignatureError::Malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_local_test";
    const TOLERANCE: i64 = 300;

    #[test]
    fn signed_payload_verifies() {
        let now = Utc::now();
        let body = br#"{"external_reference":"cs_1","payment_status":"paid"}"#;
        let header = sign(SECRET, now.timestamp(), body);
        assert_eq!(verify(SECRET, &header, body, TOLERANCE, now), Ok(()));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let now = Utc::now();
        let header = sign(SECRET, now.timestamp(), b"original");
        assert_eq!(
            verify(SECRET, &header, b"tampered", TOLERANCE, now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let now = Utc::now();
        let header = sign(SECRET, now.timestamp(), b"body");
        assert_eq!(
            verify("whsec_other", &header, b"body", TOLERANCE, now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let now = Utc::now();
        let header = sign(SECRET, now.timestamp() - TOLERANCE - 1, b"body");
        assert_eq!(
            verify(SECRET, &header, b"body", TOLERANCE, now),
            Err(SignatureError::Expired)
        );
    }

    #[test]
    fn zero_tolerance_disables_the_age_check() {
        let now = Utc::now();
        let header = sign(SECRET, now.timestamp() - 10_000, b"body");
        assert_eq!(verify(SECRET, &header, b"body", 0, now), Ok(()));
    }

    #[test]
    fn malformed_headers_are_rejected() {
        let now = Utc::now();
        for header in [
            "",
            "v1=abcd",
            "t=123",
            "t=abc,v1=00",
            "t=123,v1=zzzz",
            "t=123,v1=00ff", // truncated digest
        ] {
            assert_eq!(
                verify(SECRET, header, b"body", TOLERANCE, now),
                Err(SignatureError::Malformed),
                "header {header:?} should be malformed"
            );
        }
    }

    #[test]
    fn unknown_scheme_entries_are_ignored() {
        let now = Utc::now();
        let body = b"body";
        let header = format!("{},v2=deadbeef", sign(SECRET, now.timestamp(), body));
        assert_eq!(verify(SECRET, &header, body, TOLERANCE, now), Ok(()));
    }
}
