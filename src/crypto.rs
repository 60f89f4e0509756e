//! Decrypt tenant DB passwords stored as Fernet tokens (AES-128-CBC + HMAC-SHA256, URL-safe base64).
//!
//! The key is 32 bytes of URL-safe base64, shared with the accounts service that issues the tokens.

use crate::error::TenancyError;
use fernet::Fernet;

/// Restore `=` padding dropped by some issuers.
fn padded(encoded: &str) -> String {
    let trimmed = encoded.trim().trim_end_matches('=');
    let mut out = trimmed.to_string();
    while out.len() % 4 != 0 {
        out.push('=');
    }
    out
}

/// Process-wide password decryptor. The key is loaded once and never rotates.
pub struct SecretDecryptor {
    fernet: Option<Fernet>,
}

impl std::fmt::Debug for SecretDecryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretDecryptor")
            .field("configured", &self.fernet.is_some())
            .finish()
    }
}

impl SecretDecryptor {
    /// `None` builds a decryptor that fails every call with `KeyNotConfigured`.
    pub fn new(key: Option<&str>) -> Result<Self, TenancyError> {
        let fernet = match key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(k) => Some(Fernet::new(&padded(k)).ok_or_else(|| {
                TenancyError::DecryptionFailed("encryption key must be 32 bytes of url-safe base64".into())
            })?),
            None => None,
        };
        Ok(SecretDecryptor { fernet })
    }

    pub fn is_configured(&self) -> bool {
        self.fernet.is_some()
    }

    /// The MAC is verified before anything is decrypted; token age is not checked.
    pub fn decrypt(&self, token: &str) -> Result<String, TenancyError> {
        let fernet = self.fernet.as_ref().ok_or(TenancyError::KeyNotConfigured)?;
        let plaintext = fernet
            .decrypt(&padded(token))
            .map_err(|_| TenancyError::DecryptionFailed("token is malformed or signed with another key".into()))?;
        String::from_utf8(plaintext).map_err(|_| TenancyError::DecryptionFailed("plaintext is not utf-8".into()))
    }

    /// Produce a token the accounts service (or `decrypt`) accepts.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, TenancyError> {
        let fernet = self.fernet.as_ref().ok_or(TenancyError::KeyNotConfigured)?;
        Ok(fernet.encrypt(plaintext.as_bytes()))
    }
}

/// Fresh random key in the encoding `DB_ENCRYPTION_KEY` expects.
pub fn generate_key() -> String {
    Fernet::generate_key()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference vector from the Fernet specification.
    const SPEC_KEY: &str = "cw_0x689RpI-jtRR7oE8h_eQsKImvJapLeSbXpwF4e4=";
    const SPEC_TOKEN: &str =
        "gAAAAAAdwJ6wAAECAwQFBgcICQoLDA0ODy021cpGVWKZ_eEwCGM4BLLF_5CV9dOPmrhuVUPgJobwOz7JcbmrR64jVmpU4IwqDA==";

    #[test]
    fn decrypts_reference_token() {
        let d = SecretDecryptor::new(Some(SPEC_KEY)).unwrap();
        assert_eq!(d.decrypt(SPEC_TOKEN).unwrap(), "hello");
    }

    #[test]
    fn decrypt_inverts_encrypt() {
        let d = SecretDecryptor::new(Some(&generate_key())).unwrap();
        for plaintext in ["", "p", "s3cret-pw", "exactly16bytes!!", "ünïcødé pässwörd"] {
            let token = d.encrypt(plaintext).unwrap();
            assert_eq!(d.decrypt(&token).unwrap(), plaintext);
        }
    }

    #[test]
    fn other_key_is_rejected() {
        let a = SecretDecryptor::new(Some(&generate_key())).unwrap();
        let b = SecretDecryptor::new(Some(&generate_key())).unwrap();
        let token = a.encrypt("s3cret").unwrap();
        assert!(matches!(b.decrypt(&token), Err(TenancyError::DecryptionFailed(_))));
    }

    #[test]
    fn tampering_is_detected() {
        let d = SecretDecryptor::new(Some(SPEC_KEY)).unwrap();
        let mut tampered = SPEC_TOKEN.to_string();
        let flipped = if &tampered[40..41] == "A" { "B" } else { "A" };
        tampered.replace_range(40..41, flipped);
        assert!(matches!(d.decrypt(&tampered), Err(TenancyError::DecryptionFailed(_))));
        assert!(matches!(d.decrypt("not a token"), Err(TenancyError::DecryptionFailed(_))));
        assert!(matches!(d.decrypt("gAAA"), Err(TenancyError::DecryptionFailed(_))));
    }

    #[test]
    fn missing_key() {
        let d = SecretDecryptor::new(None).unwrap();
        assert!(!d.is_configured());
        assert!(matches!(d.decrypt(SPEC_TOKEN), Err(TenancyError::KeyNotConfigured)));
        let d = SecretDecryptor::new(Some("   ")).unwrap();
        assert!(matches!(d.decrypt(SPEC_TOKEN), Err(TenancyError::KeyNotConfigured)));
    }

    #[test]
    fn malformed_key_is_rejected() {
        assert!(SecretDecryptor::new(Some("c2hvcnQ=")).is_err());
    }

    #[test]
    fn accepts_unpadded_token_and_key() {
        let d = SecretDecryptor::new(Some(SPEC_KEY.trim_end_matches('='))).unwrap();
        assert_eq!(d.decrypt(SPEC_TOKEN.trim_end_matches('=')).unwrap(), "hello");
    }
}
