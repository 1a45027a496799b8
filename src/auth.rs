use sha2::{Digest, Sha256};

/// SHA-256 hex digest of a token, the form stored in `API_TOKEN_SHA256`.
pub fn hash_access_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let out = hasher.finalize();
    hex::encode(out)
}

pub fn token_matches(token: &str, expected_hash: &str) -> bool {
    hash_access_token(token).eq_ignore_ascii_case(expected_hash.trim())
}
