/// PKCE (Proof Key for Code Exchange), RFC 7636, S256 method only
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

const VERIFIER_CHARS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Random 43..=128 character verifier over the RFC's unreserved alphabet
pub fn generate_code_verifier() -> String {
    let length = 43 + (rand::random::<u8>() % 86) as usize;

    (0..length)
        .map(|_| VERIFIER_CHARS[rand::random::<u8>() as usize % VERIFIER_CHARS.len()] as char)
        .collect()
}

/// code_challenge = BASE64URL(SHA256(ASCII(code_verifier)))
pub fn code_challenge(code_verifier: &str) -> String {
    let hash = Sha256::digest(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

#[derive(Debug, Clone)]
pub struct PkcePair {
    /// Kept in the session until the token exchange
    pub code_verifier: String,

    /// Sent with the authorization request
    pub code_challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let code_verifier = generate_code_verifier();
        let code_challenge = code_challenge(&code_verifier);

        Self {
            code_verifier,
            code_challenge,
        }
    }
}
