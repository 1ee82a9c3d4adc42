//! Password-based encryption for key exports.
//!
//! The blob layout is `salt(16) ∥ iv(16) ∥ AES-256-CBC ciphertext`. The key
//! is stretched with PBKDF2-HMAC-SHA256; the salt and IV are drawn fresh
//! from the OS CSPRNG for every encryption.

use aes::Aes256;
use block_modes::block_padding::Pkcs7;
use block_modes::{BlockMode, Cbc};
use hmac::Hmac;
use sha2::Sha256;

use super::{random_bytes, CryptoError};

type Aes256Cbc = Cbc<Aes256, Pkcs7>;

const SALT_LEN: usize = 16;
const IV_LEN: usize = 16;
const KEY_LEN: usize = 32;
const PBKDF2_ROUNDS: u32 = 10_000;

fn derive_key(password: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2::<Hmac<Sha256>>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
    key
}

/// Encrypt `plaintext` under `password`.
pub fn encrypt_with_password(plaintext: &[u8], password: &str) -> Result<Vec<u8>, CryptoError> {
    let salt = random_bytes(SALT_LEN);
    let iv = random_bytes(IV_LEN);
    let key = derive_key(password, &salt);

    let cipher = Aes256Cbc::new_from_slices(&key, &iv)
        .map_err(|_| CryptoError::Encryption("bad key or iv length"))?;
    let ciphertext = cipher.encrypt_vec(plaintext);

    let mut blob = Vec::with_capacity(SALT_LEN + IV_LEN + ciphertext.len());
    blob.extend_from_slice(&salt);
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a blob produced by [`encrypt_with_password`].
pub fn decrypt_with_password(blob: &[u8], password: &str) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < SALT_LEN + IV_LEN + 1 {
        return Err(CryptoError::InvalidLength {
            expected: SALT_LEN + IV_LEN + 1,
            found: blob.len(),
        });
    }
    let (salt, rest) = blob.split_at(SALT_LEN);
    let (iv, ciphertext) = rest.split_at(IV_LEN);
    let key = derive_key(password, salt);

    let cipher = Aes256Cbc::new_from_slices(&key, iv)
        .map_err(|_| CryptoError::Encryption("bad key or iv length"))?;
    cipher
        .decrypt_vec(ciphertext)
        .map_err(|_| CryptoError::Encryption("wrong password or corrupt blob"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let blob = encrypt_with_password(b"secret scalar bytes", "correct horse").unwrap();
        let plain = decrypt_with_password(&blob, "correct horse").unwrap();
        assert_eq!(plain, b"secret scalar bytes");
    }

    #[test]
    fn wrong_password_fails() {
        let blob = encrypt_with_password(b"payload", "alpha").unwrap();
        // CBC padding can accept garbage by chance, but never the plaintext.
        match decrypt_with_password(&blob, "beta") {
            Err(_) => {}
            Ok(plain) => assert_ne!(plain, b"payload"),
        }
    }

    #[test]
    fn truncated_blob_fails() {
        let blob = encrypt_with_password(b"payload", "alpha").unwrap();
        assert!(decrypt_with_password(&blob[..SALT_LEN + IV_LEN], "alpha").is_err());
    }

    #[test]
    fn salt_and_iv_are_fresh() {
        let a = encrypt_with_password(b"payload", "alpha").unwrap();
        let b = encrypt_with_password(b"payload", "alpha").unwrap();
        assert_ne!(a, b);
    }
}
