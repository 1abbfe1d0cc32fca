use rand::Rng;
use sha2::{Digest, Sha256};

/// 32 random bytes, hex encoded. Used for invitation tokens.
pub fn generate_random_token() -> String {
    let mut rng = rand::thread_rng();
    let token_bytes: [u8; 32] = rng.gen();
    hex::encode(token_bytes)
}

/// SHA-256 hex digest. Only digests of bearer secrets are ever stored.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
