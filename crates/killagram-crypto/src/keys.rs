use anyhow::Result;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD as B64};
use rand::Rng;

/// Random token nonce, 96 bits, URL-safe base64.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; 12];
    rand::rng().fill(&mut bytes);
    B64.encode(bytes)
}

/// Generate a 256-bit session secret suitable for `KILLAGRAM_SESSION_SECRET`.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    B64.encode(bytes)
}

/// Decode a secret produced by [`generate_secret`].
pub fn secret_from_base64(encoded: &str) -> Result<Vec<u8>> {
    let bytes = B64.decode(encoded)?;
    if bytes.len() < 16 {
        anyhow::bail!("Secret too short: {} bytes", bytes.len());
    }
    Ok(bytes)
}
