//! Authenticated peer identity.
//!
//! A peer is challenged with a random nonce and answers with an ECDSA
//! signature over the challenge digest using its long-term key. The derived
//! `node_id` is the first 16 hex characters of `SHA256(public_key)`, and
//! verified identities are cached for a session lifetime.

use std::collections::HashMap;
use std::convert::TryInto;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use ember_chain::crypto::{self, KeyPair};

use crate::constants::AUTH_SESSION_LIFETIME;
use crate::protocol::message::{AuthChallenge, AuthResponse};

/// The length of a node id: 16 hex characters of the key hash.
pub const NODE_ID_LEN: usize = 16;

/// An authentication failure.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("response answers challenge {found}, expected {expected}")]
    ChallengeMismatch { expected: u64, found: u64 },

    #[error("challenge signature does not verify")]
    BadSignature,

    #[error("claimed node id does not match the public key")]
    NodeIdMismatch,

    #[error("malformed public key or signature")]
    Malformed,
}

/// Derive a node id from a public key encoding.
pub fn node_id_from_public_key(public_key: &[u8]) -> String {
    hex::encode(crypto::sha256(public_key))[..NODE_ID_LEN].to_string()
}

/// The digest a challenge response signs: the challenge id, nonce bytes,
/// and timestamp in issue order.
fn challenge_digest(challenge: &AuthChallenge) -> [u8; 32] {
    let mut preimage = Vec::with_capacity(8 + 32 + 8);
    preimage.extend_from_slice(&challenge.challenge_id.to_le_bytes());
    preimage.extend_from_slice(&challenge.challenge);
    preimage.extend_from_slice(&challenge.timestamp.to_le_bytes());
    crypto::sha256(&preimage)
}

/// Issue a fresh challenge.
pub fn new_challenge(now: u64) -> AuthChallenge {
    let mut challenge = [0u8; 32];
    challenge.copy_from_slice(&crypto::random_bytes(32));
    AuthChallenge {
        challenge_id: u64::from_le_bytes(
            crypto::random_bytes(8).try_into().expect("eight bytes"),
        ),
        challenge,
        timestamp: now,
    }
}

/// Answer a challenge with the node's long-term key.
pub fn respond(keys: &KeyPair, challenge: &AuthChallenge) -> AuthResponse {
    let digest = challenge_digest(challenge);
    let public_key = keys.public_key_bytes();
    AuthResponse {
        challenge_id: challenge.challenge_id,
        signature: keys.sign(&digest),
        node_id: node_id_from_public_key(&public_key),
        public_key,
    }
}

/// Verify a response against the challenge we issued. Returns the verified
/// node id.
pub fn verify(challenge: &AuthChallenge, response: &AuthResponse) -> Result<String, AuthError> {
    if response.challenge_id != challenge.challenge_id {
        return Err(AuthError::ChallengeMismatch {
            expected: challenge.challenge_id,
            found: response.challenge_id,
        });
    }
    let digest = challenge_digest(challenge);
    match crypto::verify_digest(&digest, &response.signature, &response.public_key) {
        Ok(true) => {}
        Ok(false) => return Err(AuthError::BadSignature),
        Err(_) => return Err(AuthError::Malformed),
    }
    let node_id = node_id_from_public_key(&response.public_key);
    if response.node_id != node_id {
        return Err(AuthError::NodeIdMismatch);
    }
    Ok(node_id)
}

/// A cache of verified peer identities.
#[derive(Default)]
pub struct AuthSessions {
    sessions: HashMap<SocketAddr, (String, u64)>,
    lifetime: Option<Duration>,
}

impl AuthSessions {
    pub fn new() -> AuthSessions {
        AuthSessions {
            sessions: HashMap::new(),
            lifetime: Some(AUTH_SESSION_LIFETIME),
        }
    }

    pub fn with_lifetime(lifetime: Duration) -> AuthSessions {
        AuthSessions {
            sessions: HashMap::new(),
            lifetime: Some(lifetime),
        }
    }

    pub fn record(&mut self, addr: SocketAddr, node_id: String, now: u64) {
        self.sessions.insert(addr, (node_id, now));
    }

    /// The cached identity for `addr`, if still within its lifetime.
    pub fn verified_node_id(&self, addr: &SocketAddr, now: u64) -> Option<&str> {
        let (node_id, verified_at) = self.sessions.get(addr)?;
        match self.lifetime {
            Some(lifetime) if now.saturating_sub(*verified_at) > lifetime.as_secs() => None,
            _ => Some(node_id),
        }
    }

    pub fn forget(&mut self, addr: &SocketAddr) {
        self.sessions.remove(addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn challenge_response_round_trip() {
        ember_test::init();

        let keys = KeyPair::generate();
        let challenge = new_challenge(1_000);
        let response = respond(&keys, &challenge);

        let node_id = verify(&challenge, &response).unwrap();
        assert_eq!(node_id.len(), NODE_ID_LEN);
        assert_eq!(node_id, node_id_from_public_key(&keys.public_key_bytes()));
    }

    #[test]
    fn response_to_other_challenge_rejected() {
        ember_test::init();

        let keys = KeyPair::generate();
        let challenge = new_challenge(1_000);
        let other = new_challenge(1_000);
        let response = respond(&keys, &other);

        assert!(matches!(
            verify(&challenge, &response),
            Err(AuthError::ChallengeMismatch { .. })
        ));
    }

    #[test]
    fn forged_node_id_rejected() {
        ember_test::init();

        let keys = KeyPair::generate();
        let challenge = new_challenge(1_000);
        let mut response = respond(&keys, &challenge);
        response.node_id = "0000000000000000".into();

        assert!(matches!(
            verify(&challenge, &response),
            Err(AuthError::NodeIdMismatch)
        ));
    }

    #[test]
    fn signature_by_other_key_rejected() {
        ember_test::init();

        let keys = KeyPair::generate();
        let imposter = KeyPair::generate();
        let challenge = new_challenge(1_000);
        let mut response = respond(&imposter, &challenge);
        // Claim the honest peer's key but keep the imposter's signature.
        response.public_key = keys.public_key_bytes();
        response.node_id = node_id_from_public_key(&response.public_key);

        assert!(matches!(
            verify(&challenge, &response),
            Err(AuthError::BadSignature)
        ));
    }

    #[test]
    fn sessions_expire() {
        ember_test::init();

        let addr: SocketAddr = "127.0.0.1:8645".parse().unwrap();
        let mut sessions = AuthSessions::with_lifetime(Duration::from_secs(100));
        sessions.record(addr, "aabbccddeeff0011".into(), 1_000);

        assert_eq!(
            sessions.verified_node_id(&addr, 1_050),
            Some("aabbccddeeff0011")
        );
        assert_eq!(sessions.verified_node_id(&addr, 1_101), None);
    }
}
