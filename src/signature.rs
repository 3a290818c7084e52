//! HMAC-SHA256 verification for payment-gateway webhook callbacks.
//!
//! Structurally mirrors the matching engine's Ed25519 verifier: a single
//! `verify` function taking raw bytes, constant-time under the hood, with
//! `sign`/keypair test helpers gated to `#[cfg(test)]`. The primitive
//! differs because the payment gateway authenticates callbacks with a
//! shared secret, not an asymmetric keypair.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify a hex-encoded HMAC-SHA256 signature over `message` using
/// `shared_secret`. Returns `false` (never panics) on malformed hex or a
/// secret of any length.
pub fn verify(shared_secret: &[u8], message: &[u8], signature_hex: &str) -> bool {
    let expected = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(shared_secret) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(message);

    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
pub fn sign(shared_secret: &[u8], message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(shared_secret).expect("HMAC accepts any key length");
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}
