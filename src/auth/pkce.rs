//! Usage: PKCE verifier/challenge generation for the authorization code flow.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};

// 48 random bytes encode to a 64-char verifier, inside the RFC 7636 43..128 range.
const VERIFIER_ENTROPY_BYTES: usize = 48;

#[derive(Debug, Clone)]
pub struct PkcePair {
    pub code_verifier: String,
    pub code_challenge: String,
}

pub fn generate_pkce_pair() -> PkcePair {
    let mut random = [0u8; VERIFIER_ENTROPY_BYTES];
    rand::thread_rng().fill_bytes(&mut random);

    let code_verifier = URL_SAFE_NO_PAD.encode(random);
    let code_challenge = code_challenge_s256(&code_verifier);

    PkcePair {
        code_verifier,
        code_challenge,
    }
}

pub fn code_challenge_s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
