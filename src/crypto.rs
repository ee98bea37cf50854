use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::{rngs::OsRng, RngCore};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub const DEFAULT_RSA_BITS: usize = 2048;
pub const DEFAULT_PASSPHRASE: &str = "ThisNeedsToBeChanged";

const NONCE_LEN: usize = 12;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("key generation failed")]
    KeyGeneration,
    #[error("encryption failed")]
    Encryption,
    #[error("decryption failed")]
    Decryption,
    #[error("invalid key format")]
    InvalidKey,
    #[error("passphrase does not unlock this key")]
    Passphrase,
}

/// Base64-armored PKCS#8 public key, suitable for transmission as a text
/// payload. Construction performs no validation; a malformed armor only
/// surfaces when someone encrypts against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArmoredPublicKey(String);

impl ArmoredPublicKey {
    pub fn new(armor: impl Into<String>) -> Self {
        ArmoredPublicKey(armor.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Private half of a key pair, sealed under a passphrase-derived AES key.
/// Must be unlocked before use.
#[derive(Debug, Clone)]
pub struct LockedSecretKey {
    armor: String,
}

pub struct UnlockedSecretKey {
    key: RsaPrivateKey,
}

#[derive(Debug, Clone)]
pub struct KeyPair {
    pub identity: String,
    pub public: ArmoredPublicKey,
    pub secret: LockedSecretKey,
}

/// Wire form of a sealed message: a nonce-prefixed AES-256-GCM body with
/// the AES key wrapped under the recipient's RSA key, both fields base64.
#[derive(Serialize, Deserialize)]
struct SealedEnvelope {
    key: String,
    body: String,
}

fn derive_lock_key(passphrase: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(passphrase.as_bytes());
    hasher.finalize().into()
}

fn seal(plaintext: &[u8], key: &[u8; 32]) -> Result<String, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::Encryption)?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::Encryption)?;

    let mut combined = nonce_bytes.to_vec();
    combined.extend(ciphertext);
    Ok(BASE64.encode(combined))
}

fn unseal(armor: &str, key: &[u8; 32]) -> Result<Vec<u8>, CryptoError> {
    let combined = BASE64.decode(armor).map_err(|_| CryptoError::Decryption)?;
    if combined.len() < NONCE_LEN {
        return Err(CryptoError::Decryption);
    }
    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::Decryption)?;
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| CryptoError::Decryption)
}

/// Generate a fresh RSA key pair. The public half is armored for transport;
/// the private half is locked under `passphrase` immediately and never held
/// in the clear by the pair itself.
pub fn generate_key_pair(
    identity: &str,
    passphrase: &str,
    bits: usize,
) -> Result<KeyPair, CryptoError> {
    let mut rng = OsRng;
    let private = RsaPrivateKey::new(&mut rng, bits).map_err(|_| CryptoError::KeyGeneration)?;
    let public = RsaPublicKey::from(&private);

    let public_der = public
        .to_public_key_der()
        .map_err(|_| CryptoError::KeyGeneration)?;
    let private_der = private
        .to_pkcs8_der()
        .map_err(|_| CryptoError::KeyGeneration)?;

    let lock_key = derive_lock_key(passphrase);
    let locked = seal(private_der.as_bytes(), &lock_key).map_err(|_| CryptoError::KeyGeneration)?;

    Ok(KeyPair {
        identity: identity.to_string(),
        public: ArmoredPublicKey(BASE64.encode(public_der.as_bytes())),
        secret: LockedSecretKey { armor: locked },
    })
}

impl LockedSecretKey {
    pub fn unlock(&self, passphrase: &str) -> Result<UnlockedSecretKey, CryptoError> {
        let lock_key = derive_lock_key(passphrase);
        let der = unseal(&self.armor, &lock_key).map_err(|_| CryptoError::Passphrase)?;
        let key = RsaPrivateKey::from_pkcs8_der(&der).map_err(|_| CryptoError::InvalidKey)?;
        Ok(UnlockedSecretKey { key })
    }
}

/// Seal `plaintext` for the holder of `recipient`: fresh AES key and nonce
/// per call, AES key wrapped with RSA-PKCS#1 v1.5, armored as a JSON
/// envelope of base64 fields.
pub fn encrypt(plaintext: &[u8], recipient: &ArmoredPublicKey) -> Result<String, CryptoError> {
    let der = BASE64
        .decode(recipient.as_str())
        .map_err(|_| CryptoError::InvalidKey)?;
    let public = RsaPublicKey::from_public_key_der(&der).map_err(|_| CryptoError::InvalidKey)?;

    let mut aes_key = [0u8; 32];
    OsRng.fill_bytes(&mut aes_key);
    let body = seal(plaintext, &aes_key)?;

    let mut rng = OsRng;
    let wrapped_key = public
        .encrypt(&mut rng, Pkcs1v15Encrypt, &aes_key)
        .map_err(|_| CryptoError::Encryption)?;

    let envelope = SealedEnvelope {
        key: BASE64.encode(wrapped_key),
        body,
    };
    serde_json::to_string(&envelope).map_err(|_| CryptoError::Encryption)
}

pub fn decrypt(armored: &str, secret: &UnlockedSecretKey) -> Result<Vec<u8>, CryptoError> {
    let envelope: SealedEnvelope =
        serde_json::from_str(armored).map_err(|_| CryptoError::Decryption)?;
    let wrapped_key = BASE64
        .decode(&envelope.key)
        .map_err(|_| CryptoError::Decryption)?;

    let aes_key_bytes = secret
        .key
        .decrypt(Pkcs1v15Encrypt, &wrapped_key)
        .map_err(|_| CryptoError::Decryption)?;
    let aes_key: [u8; 32] = aes_key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::Decryption)?;

    unseal(&envelope.body, &aes_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Small keys keep the tests fast; sizing is a config knob in production.
    const TEST_BITS: usize = 512;

    fn make_pair(identity: &str) -> KeyPair {
        generate_key_pair(identity, "sesame", TEST_BITS).expect("keygen")
    }

    #[test]
    fn round_trip_restores_plaintext() {
        let pair = make_pair("alice");
        let secret = pair.secret.unlock("sesame").expect("unlock");

        let armored = encrypt(b"hello", &pair.public).expect("encrypt");
        let plain = decrypt(&armored, &secret).expect("decrypt");
        assert_eq!(plain, b"hello");
    }

    #[test]
    fn armor_is_printable_text() {
        let pair = make_pair("alice");
        let armored = encrypt(b"\x00\x01\xff binary", &pair.public).expect("encrypt");
        assert!(armored.chars().all(|c| !c.is_control()));
        assert!(pair.public.as_str().chars().all(|c| !c.is_control()));
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let alice = make_pair("alice");
        let mallory = make_pair("mallory");
        let secret = mallory.secret.unlock("sesame").expect("unlock");

        let armored = encrypt(b"hello", &alice.public).expect("encrypt");
        assert_eq!(decrypt(&armored, &secret), Err(CryptoError::Decryption));
    }

    #[test]
    fn wrong_passphrase_does_not_unlock() {
        let pair = make_pair("alice");
        assert!(matches!(
            pair.secret.unlock("not-sesame"),
            Err(CryptoError::Passphrase)
        ));
    }

    #[test]
    fn fresh_pairs_differ() {
        let a = make_pair("alice");
        let b = make_pair("alice");
        assert_ne!(a.public, b.public);
    }

    #[test]
    fn malformed_armor_is_a_decrypt_error() {
        let pair = make_pair("alice");
        let secret = pair.secret.unlock("sesame").expect("unlock");
        assert_eq!(decrypt("not json at all", &secret), Err(CryptoError::Decryption));
    }

    #[test]
    fn encrypting_against_garbage_key_fails() {
        let garbage = ArmoredPublicKey::new("definitely not a key");
        assert_eq!(encrypt(b"hello", &garbage), Err(CryptoError::InvalidKey));
    }
}
