//! Razorpay webhook signature verification
//!
//! Razorpay signs the exact bytes of the request body with HMAC-SHA256 and
//! sends the hex digest in `x-razorpay-signature`. Verification must run
//! over the raw transport bytes: re-serializing the parsed JSON changes key
//! ordering and whitespace and breaks the HMAC.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex-encoded HMAC digest
pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

/// Compute the hex HMAC-SHA256 digest of `body` under `secret`.
pub fn compute_signature(body: &[u8], secret: &str) -> String {
    #[allow(clippy::expect_used)] // HMAC accepts keys of any length
    let mut mac =
        <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key size");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a webhook signature against the raw request body.
///
/// Fails closed: a missing body, header, or secret yields `false`, never an
/// error. Callers treat `false` as "reject with 401". Comparison is
/// constant-time to avoid timing side-channels.
pub fn verify_signature(raw_body: &[u8], signature_header: &str, secret: &str) -> bool {
    if raw_body.is_empty() || signature_header.is_empty() || secret.is_empty() {
        return false;
    }

    let computed = compute_signature(raw_body, secret);
    computed
        .as_bytes()
        .ct_eq(signature_header.as_bytes())
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_4f9a2d";

    #[test]
    fn valid_signature_accepted() {
        let body = br#"{"event":"payment.captured","payload":{}}"#;
        let sig = compute_signature(body, SECRET);
        assert!(verify_signature(body, &sig, SECRET));
    }

    #[test]
    fn tampered_body_rejected() {
        let body = br#"{"event":"payment.captured","amount":100}"#;
        let sig = compute_signature(body, SECRET);

        // Flip every byte position in turn; none may verify
        for i in 0..body.len() {
            let mut mutated = body.to_vec();
            mutated[i] ^= 0x01;
            assert!(
                !verify_signature(&mutated, &sig, SECRET),
                "mutation at byte {} verified",
                i
            );
        }
    }

    #[test]
    fn tampered_signature_rejected() {
        let body = br#"{"event":"payment.captured"}"#;
        let sig = compute_signature(body, SECRET);

        for i in 0..sig.len() {
            let mut chars: Vec<char> = sig.chars().collect();
            chars[i] = if chars[i] == '0' { '1' } else { '0' };
            let mutated: String = chars.into_iter().collect();
            if mutated == sig {
                continue;
            }
            assert!(
                !verify_signature(body, &mutated, SECRET),
                "mutation at char {} verified",
                i
            );
        }
    }

    #[test]
    fn wrong_secret_rejected() {
        let body = b"payload";
        let sig = compute_signature(body, SECRET);
        assert!(!verify_signature(body, &sig, "other-secret"));
    }

    #[test]
    fn missing_inputs_fail_closed() {
        let body = b"payload";
        let sig = compute_signature(body, SECRET);

        assert!(!verify_signature(b"", &sig, SECRET));
        assert!(!verify_signature(body, "", SECRET));
        assert!(!verify_signature(body, &sig, ""));
    }

    #[test]
    fn signature_is_hex_sha256() {
        let sig = compute_signature(b"payload", SECRET);
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
