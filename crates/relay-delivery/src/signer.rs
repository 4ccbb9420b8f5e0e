//! HMAC-SHA256 payload signing for outbound deliveries.
//!
//! The relay only produces signatures; verification is provided for
//! subscriber-side tooling and tests. Comparison is constant-time.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header value prefix for signatures.
const SIGNATURE_PREFIX: &str = "sha256=";

/// Computes the `X-Signature` header value for a body:
/// `sha256=<lowercase-hex HMAC-SHA256(secret, body)>`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    format!("{SIGNATURE_PREFIX}{}", hmac_hex(secret, body))
}

/// Verifies a `sha256=<hex>` signature against a body.
///
/// Uses constant-time comparison so the check leaks no timing information
/// about the expected digest.
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    let Some(hex_digest) = signature.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };

    timing_safe_eq(hex_digest, &hmac_hex(secret, body))
}

/// Generates a new signing secret: 32 random bytes, hex-encoded.
///
/// 256 bits of entropy, returned to the subscriber exactly once on create.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn hmac_hex(secret: &str, body: &[u8]) -> String {
    // HMAC-SHA256 accepts keys of any length, so new_from_slice cannot fail.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts any key length"));
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

fn timing_safe_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (a_byte, b_byte) in a.bytes().zip(b.bytes()) {
        result |= a_byte ^ b_byte;
    }

    result == 0
}
