use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

const VERIFIER_LEN: usize = 64;
const STATE_LEN: usize = 32;

/// One PKCE verifier/challenge pair (RFC 7636, S256 method)
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        Self::from_verifier(random_string(VERIFIER_LEN))
    }

    pub fn from_verifier(verifier: String) -> Self {
        let challenge = s256_challenge(&verifier);
        Self { verifier, challenge }
    }

    pub fn method(&self) -> &'static str {
        "S256"
    }
}

pub fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Opaque value echoed back by the provider on the redirect
pub fn random_state() -> String {
    random_string(STATE_LEN)
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
