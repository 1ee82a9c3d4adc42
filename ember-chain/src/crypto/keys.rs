//! Key pairs for transaction signing and peer authentication.

use secp256k1::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::{encryption, sign_digest, CryptoError, SECP};
use crate::parameters::Network;
use crate::transparent::Address;

/// A secp256k1 key pair.
///
/// The secret scalar is wiped from memory on drop. There is deliberately no
/// `Clone` impl: a key pair leaves this type only through
/// [`KeyPair::export_encrypted`], which requires a password.
pub struct KeyPair {
    secret_bytes: [u8; 32],
    public: PublicKey,
}

/// A password-encrypted key export blob, as stored in wallet files.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedKey {
    pub version: u32,
    /// Hex-encoded `salt ∥ iv ∥ ciphertext` blob.
    pub ciphertext: String,
    /// Hex-encoded compressed public key, kept in clear for address display.
    pub public_key: String,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS CSPRNG.
    pub fn generate() -> KeyPair {
        loop {
            let candidate = super::random_bytes(32);
            if let Ok(pair) = KeyPair::from_secret_bytes(&candidate) {
                return pair;
            }
            // A rejected scalar (zero or >= group order) is astronomically
            // rare; loop until the CSPRNG produces a valid one.
        }
    }

    /// Build a key pair from a 32-byte secret scalar.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<KeyPair, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidLength {
                expected: 32,
                found: bytes.len(),
            });
        }
        let secret =
            SecretKey::from_slice(bytes).map_err(|_| CryptoError::InvalidSecretKey)?;
        let public = PublicKey::from_secret_key(&SECP, &secret);
        let mut secret_bytes = [0u8; 32];
        secret_bytes.copy_from_slice(bytes);
        Ok(KeyPair {
            secret_bytes,
            public,
        })
    }

    /// Build a key pair from a 64-character hex scalar.
    pub fn from_secret_hex(hex_str: &str) -> Result<KeyPair, CryptoError> {
        let bytes = hex::decode(hex_str).map_err(|_| CryptoError::InvalidHex)?;
        KeyPair::from_secret_bytes(&bytes)
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// The 33-byte compressed public key encoding.
    pub fn public_key_bytes(&self) -> Vec<u8> {
        self.public.serialize().to_vec()
    }

    /// The address derived from this key pair's public key.
    pub fn address(&self, network: Network) -> Address {
        Address::from_public_key(network, &self.public.serialize())
    }

    /// Sign a 32-byte digest with this key pair's secret key.
    pub fn sign(&self, digest: &[u8; 32]) -> Vec<u8> {
        let secret = SecretKey::from_slice(&self.secret_bytes)
            .expect("constructors only accept valid scalars");
        sign_digest(digest, &secret)
    }

    /// Export the secret key as a password-encrypted blob.
    pub fn export_encrypted(&self, password: &str) -> Result<EncryptedKey, CryptoError> {
        let ciphertext = encryption::encrypt_with_password(&self.secret_bytes, password)?;
        Ok(EncryptedKey {
            version: 1,
            ciphertext: hex::encode(ciphertext),
            public_key: hex::encode(self.public.serialize()),
        })
    }

    /// Recover a key pair from a password-encrypted export blob.
    pub fn import_encrypted(
        blob: &EncryptedKey,
        password: &str,
    ) -> Result<KeyPair, CryptoError> {
        let ciphertext = hex::decode(&blob.ciphertext).map_err(|_| CryptoError::InvalidHex)?;
        let secret = encryption::decrypt_with_password(&ciphertext, password)?;
        let pair = KeyPair::from_secret_bytes(&secret)?;
        if blob.public_key != hex::encode(pair.public.serialize()) {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(pair)
    }
}

impl Zeroize for KeyPair {
    fn zeroize(&mut self) {
        self.secret_bytes.zeroize();
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("secret", &"<hidden>")
            .field("public", &hex::encode(self.public.serialize()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_pair_round_trips_through_hex() {
        let pair = KeyPair::generate();
        let hex_str = hex::encode(pair.secret_bytes);
        let restored = KeyPair::from_secret_hex(&hex_str).unwrap();
        assert_eq!(pair.public_key_bytes(), restored.public_key_bytes());
    }

    #[test]
    fn zero_scalar_rejected() {
        assert!(matches!(
            KeyPair::from_secret_bytes(&[0u8; 32]),
            Err(CryptoError::InvalidSecretKey)
        ));
    }

    #[test]
    fn export_import_requires_matching_password() {
        let pair = KeyPair::generate();
        let blob = pair.export_encrypted("hunter2").unwrap();

        let restored = KeyPair::import_encrypted(&blob, "hunter2").unwrap();
        assert_eq!(pair.public_key_bytes(), restored.public_key_bytes());

        assert!(KeyPair::import_encrypted(&blob, "wrong").is_err());
    }

    #[test]
    fn export_blobs_use_fresh_randomness() {
        let pair = KeyPair::generate();
        let a = pair.export_encrypted("pw").unwrap();
        let b = pair.export_encrypted("pw").unwrap();
        // Same key and password, but random salt and IV per export.
        assert_ne!(a.ciphertext, b.ciphertext);
    }
}
