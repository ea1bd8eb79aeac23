use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

/// A freshly generated single-use token for email verification or password
/// reset. Only `hashed` and `expires_at` are ever persisted; `raw` goes out
/// in the email link and is then dropped.
#[derive(Debug, Clone)]
pub struct EphemeralToken {
    pub raw: String,
    pub hashed: String,
    pub expires_at: OffsetDateTime,
}

impl EphemeralToken {
    pub fn generate(ttl: Duration) -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        let raw = hex::encode(bytes);
        let hashed = hash_token(&raw);
        Self {
            raw,
            hashed,
            expires_at: OffsetDateTime::now_utc() + ttl,
        }
    }
}

/// One-way digest of a presented raw token. Lookups always re-hash the raw
/// value and compare digests; raw tokens are never stored or compared.
pub fn hash_token(raw: &str) -> String {
    hex::encode(Sha256::digest(raw.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_token_is_32_bytes_of_entropy() {
        let token = EphemeralToken::generate(Duration::minutes(30));
        assert_eq!(token.raw.len(), 64); // hex-encoded
        assert_ne!(
            token.raw,
            EphemeralToken::generate(Duration::minutes(30)).raw
        );
    }

    #[test]
    fn hashed_form_is_sha256_of_raw() {
        let token = EphemeralToken::generate(Duration::minutes(30));
        assert_eq!(token.hashed, hash_token(&token.raw));
        assert_eq!(token.hashed.len(), 64);
        assert_ne!(token.hashed, token.raw);
    }

    #[test]
    fn hash_token_is_deterministic() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_ne!(hash_token("abc"), hash_token("abd"));
    }

    #[test]
    fn expiry_is_now_plus_ttl() {
        let before = OffsetDateTime::now_utc();
        let token = EphemeralToken::generate(Duration::minutes(30));
        let after = OffsetDateTime::now_utc();
        assert!(token.expires_at >= before + Duration::minutes(30));
        assert!(token.expires_at <= after + Duration::minutes(30));
    }
}
