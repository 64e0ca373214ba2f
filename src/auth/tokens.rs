use base64ct::{Base64UrlUnpadded, Encoding};
use rand::{rngs::OsRng, RngCore};

/// Generate a single-use opaque token for the recovery flows
/// (32 CSPRNG bytes, base64url without padding).
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_url_safe() {
        let token = generate_opaque_token();
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        // 32 bytes -> 43 base64url chars.
        assert_eq!(token.len(), 43);
    }

    #[test]
    fn tokens_are_unique() {
        assert_ne!(generate_opaque_token(), generate_opaque_token());
    }
}
