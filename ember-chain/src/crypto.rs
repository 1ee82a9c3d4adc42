//! Cryptographic primitives: hashing, ECDSA signatures over secp256k1, and
//! password-based key encryption.

pub mod encryption;
pub mod keys;

pub use encryption::{decrypt_with_password, encrypt_with_password};
pub use keys::KeyPair;

use lazy_static::lazy_static;
use rand::RngCore;
use ripemd160::{Digest as Ripemd160Digest, Ripemd160};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey, Signature};
use sha2::{Digest, Sha256};
use thiserror::Error;

lazy_static! {
    /// A shared signing/verification context.
    ///
    /// Context creation is expensive; secp256k1 contexts are sync and
    /// reusable across threads.
    pub(crate) static ref SECP: Secp256k1<secp256k1::All> = Secp256k1::new();
}

/// An error produced by a cryptographic primitive.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The input had the wrong length for the primitive.
    #[error("invalid input length: expected {expected}, found {found}")]
    InvalidLength { expected: usize, found: usize },
    /// A hex field failed to decode.
    #[error("invalid hex encoding")]
    InvalidHex,
    /// The secret scalar was zero or out of range.
    #[error("invalid secret key")]
    InvalidSecretKey,
    /// The public key bytes did not encode a curve point.
    #[error("invalid public key")]
    InvalidPublicKey,
    /// The signature was not valid DER or not on the curve.
    #[error("invalid signature encoding")]
    InvalidSignature,
    /// Password-based encryption or decryption failed.
    #[error("encryption error: {0}")]
    Encryption(&'static str),
}

/// SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// Two rounds of SHA-256, as used by wire checksums.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256(&sha256(data))
}

/// RIPEMD-160 digest of `data`.
pub fn ripemd160(data: &[u8]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&Ripemd160::digest(data));
    out
}

/// `RIPEMD160(SHA256(data))`, the address payload hash.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    ripemd160(&sha256(data))
}

/// HMAC-SHA256 of `data` under `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> [u8; 32] {
    use hmac::{Hmac, Mac, NewMac};
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    out
}

/// `n` bytes from the operating system CSPRNG.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    buf
}

/// The compressed public key for a 32-byte secret scalar.
pub fn derive_public_key(secret: &[u8]) -> Result<Vec<u8>, CryptoError> {
    Ok(KeyPair::from_secret_bytes(secret)?.public_key_bytes())
}

/// Sign a 32-byte digest, producing a DER-encoded ECDSA signature.
pub fn sign_digest(digest: &[u8; 32], secret: &SecretKey) -> Vec<u8> {
    let message = Message::from_slice(digest).expect("digest is exactly 32 bytes");
    SECP.sign(&message, secret).serialize_der().to_vec()
}

/// Verify a DER-encoded ECDSA signature over a 32-byte digest.
///
/// Returns `Ok(false)` for a well-formed signature that does not verify, and
/// an error for byte strings that are not signatures or keys at all.
pub fn verify_digest(
    digest: &[u8; 32],
    signature: &[u8],
    public_key: &[u8],
) -> Result<bool, CryptoError> {
    let message = Message::from_slice(digest).expect("digest is exactly 32 bytes");
    let signature =
        Signature::from_der(signature).map_err(|_| CryptoError::InvalidSignature)?;
    let public_key =
        PublicKey::from_slice(public_key).map_err(|_| CryptoError::InvalidPublicKey)?;
    Ok(SECP.verify(&message, &signature, &public_key).is_ok())
}
