use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const COMPARE_KEY: &[u8] = b"killagram-secret-compare";

/// Hex HMAC-SHA256 over `METHOD|path|body`.
///
/// Two requests that differ in method, path or any byte of the body never
/// share a signature, which is what keeps idempotency keys from conflating
/// different payloads.
pub fn request_signature(secret: &[u8], method: &str, path: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret).context("invalid HMAC signing key")?;
    mac.update(method.to_ascii_uppercase().as_bytes());
    mac.update(b"|");
    mac.update(path.as_bytes());
    mac.update(b"|");
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time equality for shared secrets such as the admin key.
///
/// Both sides are run through HMAC first so inputs of different lengths
/// compare in the same time as equal-length ones.
pub fn secrets_match(expected: &[u8], given: &[u8]) -> bool {
    let digest = |value: &[u8]| {
        let mut mac = HmacSha256::new_from_slice(COMPARE_KEY).ok()?;
        mac.update(value);
        Some(mac)
    };
    match (digest(expected), digest(given)) {
        (Some(expected), Some(given)) => given.verify_slice(&expected.finalize().into_bytes()).is_ok(),
        _ => false,
    }
}
