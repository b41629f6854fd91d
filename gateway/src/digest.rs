use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `bytes`, for audit logging.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
