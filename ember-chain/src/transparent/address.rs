//! Transparent address types.

use std::{fmt, io};

use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    crypto,
    parameters::Network,
    serialization::{EmberDeserialize, EmberSerialize, SerializationError},
};

#[cfg(test)]
use crate::EmberDeserializeInto;
#[cfg(test)]
use proptest::{arbitrary::Arbitrary, collection::vec, prelude::*};

/// Version bytes distinguishing the networks addresses belong to.
mod magics {
    pub const MAINNET: u8 = 0x00;
    pub const TESTNET: u8 = 0x6f;
}

/// An Ember address.
///
/// A single version byte is prepended to the 20-byte
/// `RIPEMD160(SHA256(pubkey))` payload; the result is Base58Check encoded
/// for display, and serialized on the wire as the raw 21 bytes behind a
/// length prefix.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Address {
    /// Production, test, or other network
    pub network: Network,
    /// The RIPEMD-160 hash of the SHA-256 hash of the owning public key.
    pub pub_key_hash: [u8; 20],
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Address")
            .field("network", &self.network)
            .field("pub_key_hash", &hex::encode(self.pub_key_hash))
            .finish()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut bytes = [0u8; 21];
        bytes[0] = self.version();
        bytes[1..].copy_from_slice(&self.pub_key_hash);

        f.write_str(&bs58::encode(&bytes[..]).with_check().into_string())
    }
}

impl std::str::FromStr for Address {
    type Err = SerializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|_| SerializationError::Parse("address base58check decoding error"))?;
        Address::from_versioned_bytes(&bytes)
    }
}

impl Address {
    /// The serialized payload length: version byte plus 20 payload bytes.
    pub const fn serialized_len() -> usize {
        21
    }

    pub fn new(network: Network, pub_key_hash: [u8; 20]) -> Address {
        Address {
            network,
            pub_key_hash,
        }
    }

    /// Derive the address owning `public_key` on `network`.
    pub fn from_public_key(network: Network, public_key: &[u8]) -> Address {
        Address {
            network,
            pub_key_hash: crypto::hash160(public_key),
        }
    }

    fn version(&self) -> u8 {
        match self.network {
            Network::Mainnet => magics::MAINNET,
            _ => magics::TESTNET,
        }
    }

    fn from_versioned_bytes(bytes: &[u8]) -> Result<Address, SerializationError> {
        if bytes.len() != Address::serialized_len() {
            return Err(SerializationError::Parse("bad address payload length"));
        }
        let network = match bytes[0] {
            magics::MAINNET => Network::Mainnet,
            magics::TESTNET => Network::Testnet,
            _ => return Err(SerializationError::Parse("bad address version byte")),
        };
        let mut pub_key_hash = [0u8; 20];
        pub_key_hash.copy_from_slice(&bytes[1..]);
        Ok(Address {
            network,
            pub_key_hash,
        })
    }
}

impl EmberSerialize for Address {
    fn ember_serialize<W: io::Write>(&self, mut writer: W) -> Result<(), io::Error> {
        let mut bytes = Vec::with_capacity(Address::serialized_len());
        bytes.push(self.version());
        bytes.extend_from_slice(&self.pub_key_hash);
        bytes.ember_serialize(&mut writer)
    }
}

impl EmberDeserialize for Address {
    fn ember_deserialize<R: io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let bytes = Vec::<u8>::ember_deserialize(&mut reader)?;
        Address::from_versioned_bytes(&bytes)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
impl Arbitrary for Address {
    type Parameters = ();

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        (any::<Network>(), vec(any::<u8>(), 20))
            .prop_map(|(network, payload_bytes)| {
                let mut bytes = [0; 20];
                bytes.copy_from_slice(payload_bytes.as_slice());
                Self {
                    network,
                    pub_key_hash: bytes,
                }
            })
            .boxed()
    }

    type Strategy = BoxedStrategy<Self>;
}

#[cfg(all(not(test), feature = "proptest-impl"))]
impl proptest::arbitrary::Arbitrary for Address {
    type Parameters = ();

    fn arbitrary_with(_args: Self::Parameters) -> Self::Strategy {
        use proptest::prelude::*;
        (
            proptest::arbitrary::any::<Network>(),
            proptest::collection::vec(proptest::arbitrary::any::<u8>(), 20),
        )
            .prop_map(|(network, payload_bytes)| {
                let mut bytes = [0; 20];
                bytes.copy_from_slice(payload_bytes.as_slice());
                Self {
                    network,
                    pub_key_hash: bytes,
                }
            })
            .boxed()
    }

    type Strategy = proptest::strategy::BoxedStrategy<Self>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    #[test]
    fn derived_address_has_hash160_payload() {
        ember_test::init();

        let keys = KeyPair::generate();
        let pk = keys.public_key_bytes();
        let addr = Address::from_public_key(Network::Mainnet, &pk);
        assert_eq!(addr.pub_key_hash, crypto::hash160(&pk));
    }

    #[test]
    fn display_round_trip() {
        ember_test::init();

        let addr = Address::new(Network::Mainnet, [0x11; 20]);
        let displayed = addr.to_string();
        let parsed: Address = displayed.parse().unwrap();
        assert_eq!(addr, parsed);
    }

    #[test]
    fn corrupted_checksum_rejected() {
        ember_test::init();

        let addr = Address::new(Network::Testnet, [0x22; 20]);
        let mut displayed = addr.to_string();
        // Swap the last character for a different base58 digit.
        let last = displayed.pop().unwrap();
        displayed.push(if last == '1' { '2' } else { '1' });
        assert!(displayed.parse::<Address>().is_err());
    }
}

#[cfg(test)]
proptest! {

    #[test]
    fn address_wire_roundtrip(addr in any::<Address>()) {
        ember_test::init();

        let mut data = Vec::new();
        addr.ember_serialize(&mut data).expect("address should serialize");

        let addr2: Address = data.as_slice().ember_deserialize_into()
            .expect("randomized address should deserialize");

        prop_assert_eq![addr, addr2];
    }

    #[test]
    fn address_string_roundtrip(addr in any::<Address>()) {
        ember_test::init();

        let addr2: Address = addr.to_string().parse().expect("base58check should round trip");
        prop_assert_eq![addr, addr2];
    }
}
