use ember_chain::parameters::Network;
use ember_chain::{EmberDeserialize, EmberSerialize, SerializationError};

/// A nonce used in the networking layer to identify messages.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Nonce(pub u64);

impl Default for Nonce {
    fn default() -> Self {
        use rand::{thread_rng, Rng};
        Self(thread_rng().gen())
    }
}

impl EmberSerialize for Nonce {
    fn ember_serialize<W: std::io::Write>(&self, writer: W) -> Result<(), std::io::Error> {
        self.0.ember_serialize(writer)
    }
}

impl EmberDeserialize for Nonce {
    fn ember_deserialize<R: std::io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Nonce(u64::ember_deserialize(reader)?))
    }
}

/// A magic number identifying the network a frame belongs to.
#[derive(Copy, Clone, Eq, PartialEq)]
pub struct Magic(pub [u8; 4]);

impl std::fmt::Debug for Magic {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("Magic").field(&hex::encode(&self.0)).finish()
    }
}

impl From<Network> for Magic {
    fn from(network: Network) -> Self {
        Magic(network.magic())
    }
}

/// A protocol version number.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct ProtocolVersion(pub u32);

impl EmberSerialize for ProtocolVersion {
    fn ember_serialize<W: std::io::Write>(&self, writer: W) -> Result<(), std::io::Error> {
        self.0.ember_serialize(writer)
    }
}

impl EmberDeserialize for ProtocolVersion {
    fn ember_deserialize<R: std::io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(ProtocolVersion(u32::ember_deserialize(reader)?))
    }
}

/// The service bits a node advertises in its `HELLO`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct NodeServices(pub u64);

impl NodeServices {
    /// The node serves full blocks.
    pub const NETWORK: NodeServices = NodeServices(1);
}

impl EmberSerialize for NodeServices {
    fn ember_serialize<W: std::io::Write>(&self, writer: W) -> Result<(), std::io::Error> {
        self.0.ember_serialize(writer)
    }
}

impl EmberDeserialize for NodeServices {
    fn ember_deserialize<R: std::io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(NodeServices(u64::ember_deserialize(reader)?))
    }
}
