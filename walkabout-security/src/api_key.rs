use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// A freshly generated API key: the plaintext shown to the caller exactly
/// once, and the digest that gets stored.
#[derive(Debug, Clone)]
pub struct GeneratedKey {
    pub plaintext: String,
    pub digest: String,
    /// Non-secret prefix for listing keys without revealing them.
    pub prefix: String,
}

/// Generate a new API key. Only the SHA-256 digest is ever persisted.
pub fn generate() -> GeneratedKey {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let body = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    let plaintext = format!("wak_{body}");
    GeneratedKey {
        digest: digest(&plaintext),
        prefix: plaintext[..12].to_string(),
        plaintext,
    }
}

/// SHA-256 hex digest of a key, the stored comparison form.
pub fn digest(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

/// Compare a presented key against a stored digest.
///
/// Comparing fixed-length hashes rather than the secret itself keeps the
/// comparison timing-independent of the input.
pub fn verify(presented: &str, stored_digest: &str) -> bool {
    let presented = digest(presented);
    if presented.len() != stored_digest.len() {
        return false;
    }
    presented
        .bytes()
        .zip(stored_digest.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
