//! A Tokio codec mapping byte streams to Ember message streams.

use std::fmt;
use std::io::{Cursor, Write};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use ember_chain::{
    block::Block,
    parameters::Network,
    serialization::{sha256d, EmberDeserialize, EmberSerialize, SerializationError as Error},
    transaction::Transaction,
};

use crate::constants::{self, HEADER_LEN, MAX_PROTOCOL_MESSAGE_LEN};

use super::{
    command::Command,
    inv::InventoryHash,
    message::{AuthChallenge, AuthResponse, Hello, Message},
    types::*,
};

/// A codec which produces Ember messages from byte streams and vice versa.
pub struct Codec {
    builder: Builder,
    state: DecodeState,
}

/// A builder for specifying [`Codec`] options.
pub struct Builder {
    /// The network magic to use in encoding.
    network: Network,
    /// The protocol version to speak when encoding/decoding.
    version: ProtocolVersion,
    /// The maximum allowable message length.
    max_len: usize,
    /// An optional label to use for reporting metrics.
    metrics_label: Option<String>,
}

impl Codec {
    /// Return a builder for constructing a [`Codec`].
    pub fn builder() -> Builder {
        Builder {
            network: Network::Mainnet,
            version: ProtocolVersion(constants::CURRENT_VERSION),
            max_len: MAX_PROTOCOL_MESSAGE_LEN,
            metrics_label: None,
        }
    }

    /// Reconfigure the version used by the codec, e.g., after completing a
    /// handshake.
    pub fn reconfigure_version(&mut self, version: ProtocolVersion) {
        self.builder.version = version;
    }
}

impl Builder {
    /// Finalize the builder and return a [`Codec`].
    pub fn finish(self) -> Codec {
        Codec {
            builder: self,
            state: DecodeState::Head,
        }
    }

    /// Configure the codec for the given [`Network`].
    pub fn for_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Configure the codec for the given protocol version.
    #[allow(dead_code)]
    pub fn for_version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    /// Configure the codec's maximum accepted payload size, in bytes.
    #[allow(dead_code)]
    pub fn with_max_body_len(mut self, len: usize) -> Self {
        self.max_len = len;
        self
    }

    /// Configure the codec for the given peer address.
    pub fn with_metrics_label(mut self, metrics_label: String) -> Self {
        self.metrics_label = Some(metrics_label);
        self
    }
}

// ======== Encoding =========

impl Encoder<Message> for Codec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        use Error::Parse;
        let mut body = Vec::new();
        self.write_body(&item, &mut body)?;

        if body.len() > self.builder.max_len {
            return Err(Parse("body length exceeded maximum size"));
        }

        if let Some(label) = self.builder.metrics_label.clone() {
            metrics::counter!("bytes.written", (body.len() + HEADER_LEN) as u64, "addr" => label);
        }

        let mut header = [0u8; HEADER_LEN];
        let mut header_writer = Cursor::new(&mut header[..]);
        header_writer.write_all(&Magic::from(self.builder.network).0[..])?;
        header_writer.write_all(&[item.command().byte()])?;
        header_writer.write_u32::<LittleEndian>(body.len() as u32)?;
        header_writer.write_all(&sha256d::Checksum::from(&body[..]).0)?;

        dst.reserve(HEADER_LEN + body.len());
        dst.extend_from_slice(&header);
        dst.extend_from_slice(&body);

        Ok(())
    }
}

impl Codec {
    /// Write the body of the message into the given writer. This allows
    /// writing the message body prior to writing the header, so that the
    /// header can contain a checksum of the message body.
    fn write_body<W: Write>(&self, msg: &Message, mut writer: W) -> Result<(), Error> {
        match msg {
            Message::Hello(inner) => inner.ember_serialize(&mut writer)?,
            Message::Ping(nonce) => nonce.ember_serialize(&mut writer)?,
            Message::Pong(nonce) => nonce.ember_serialize(&mut writer)?,
            Message::Inv(hashes) => hashes.ember_serialize(&mut writer)?,
            Message::GetData(hashes) => hashes.ember_serialize(&mut writer)?,
            Message::Tx(transaction) => transaction.ember_serialize(&mut writer)?,
            Message::Block(block) => block.ember_serialize(&mut writer)?,
            Message::AuthChallenge(inner) => inner.ember_serialize(&mut writer)?,
            Message::AuthResponse(inner) => inner.ember_serialize(&mut writer)?,
        }
        Ok(())
    }
}

// ======== Decoding =========

enum DecodeState {
    Head,
    Body {
        body_len: usize,
        command: Command,
        checksum: sha256d::Checksum,
    },
}

impl fmt::Debug for DecodeState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeState::Head => write!(f, "DecodeState::Head"),
            DecodeState::Body {
                body_len,
                command,
                checksum,
            } => f
                .debug_struct("DecodeState::Body")
                .field("body_len", &body_len)
                .field("command", &command)
                .field("checksum", &checksum)
                .finish(),
        }
    }
}

impl Decoder for Codec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        use Error::Parse;
        match self.state {
            DecodeState::Head => {
                // First check that the src buffer contains an entire header.
                if src.len() < HEADER_LEN {
                    // Signal that decoding requires more data.
                    return Ok(None);
                }

                // Now that we know that src contains a header, split off the
                // header section.
                let header = src.split_to(HEADER_LEN);

                // Create a cursor over the header and parse its fields.
                let mut header_reader = Cursor::new(&header);
                let magic = Magic(<[u8; 4]>::ember_deserialize(&mut header_reader)?);
                let command = Command::from_byte(header_reader.read_u8()?)?;
                let body_len = header_reader.read_u32::<LittleEndian>()? as usize;
                let checksum =
                    sha256d::Checksum(<[u8; 4]>::ember_deserialize(&mut header_reader)?);

                if magic != Magic::from(self.builder.network) {
                    return Err(Parse("supplied magic did not meet expectations"));
                }
                if body_len > self.builder.max_len {
                    return Err(Parse("body length exceeded maximum size"));
                }

                if let Some(label) = self.builder.metrics_label.clone() {
                    metrics::counter!("bytes.read", (body_len + HEADER_LEN) as u64, "addr" => label);
                }

                // Reserve buffer space for the expected body and the
                // following header.
                src.reserve(body_len + HEADER_LEN);

                self.state = DecodeState::Body {
                    body_len,
                    command,
                    checksum,
                };

                // Now that the state is updated, recurse to attempt body
                // decoding.
                self.decode(src)
            }
            DecodeState::Body {
                body_len,
                command,
                checksum,
            } => {
                if src.len() < body_len {
                    // Need to wait for the full body.
                    return Ok(None);
                }

                // Now that we know we have the full body, split off the
                // body, and reset the decoder state for the next message.
                // Otherwise we would attempt to read the next header as the
                // current body.
                let body = src.split_to(body_len);
                self.state = DecodeState::Head;

                if checksum != sha256d::Checksum::from(&body[..]) {
                    return Err(Parse(
                        "supplied message checksum does not match computed checksum",
                    ));
                }

                let mut body_reader = Cursor::new(&body);
                let msg = match command {
                    Command::Hello => {
                        Message::Hello(Hello::ember_deserialize(&mut body_reader)?)
                    }
                    Command::Ping => Message::Ping(Nonce::ember_deserialize(&mut body_reader)?),
                    Command::Pong => Message::Pong(Nonce::ember_deserialize(&mut body_reader)?),
                    Command::Inv => {
                        Message::Inv(<Vec<InventoryHash>>::ember_deserialize(&mut body_reader)?)
                    }
                    Command::GetData => Message::GetData(<Vec<InventoryHash>>::ember_deserialize(
                        &mut body_reader,
                    )?),
                    Command::Tx => {
                        Message::Tx(<Arc<Transaction>>::ember_deserialize(&mut body_reader)?)
                    }
                    Command::Block => {
                        Message::Block(<Arc<Block>>::ember_deserialize(&mut body_reader)?)
                    }
                    Command::AuthChallenge => Message::AuthChallenge(
                        AuthChallenge::ember_deserialize(&mut body_reader)?,
                    ),
                    Command::AuthResponse => Message::AuthResponse(
                        AuthResponse::ember_deserialize(&mut body_reader)?,
                    ),
                };
                Ok(Some(msg))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::prelude::*;
    use tokio::runtime::Runtime;

    #[test]
    fn hello_message_round_trip() {
        ember_test::init();

        let rt = Runtime::new().unwrap();

        let v = Message::Hello(Hello {
            version: ProtocolVersion(constants::CURRENT_VERSION),
            user_agent: constants::USER_AGENT.to_owned(),
            services: NodeServices::NETWORK,
            nonce: Nonce(0x9082_4908_8927_9238),
        });

        use tokio_util::codec::{FramedRead, FramedWrite};
        let v_bytes = rt.block_on(async {
            let mut bytes = Vec::new();
            {
                let mut fw = FramedWrite::new(&mut bytes, Codec::builder().finish());
                fw.send(v.clone())
                    .await
                    .expect("message should be serialized");
            }
            bytes
        });

        let v_parsed = rt.block_on(async {
            let mut fr = FramedRead::new(Cursor::new(&v_bytes), Codec::builder().finish());
            fr.next()
                .await
                .expect("a next message should be available")
                .expect("that message should deserialize")
        });

        assert_eq!(v, v_parsed);
    }

    #[test]
    fn wrong_network_magic_rejected() {
        ember_test::init();

        let rt = Runtime::new().unwrap();

        let v = Message::Ping(Nonce(1));

        use tokio_util::codec::{FramedRead, FramedWrite};
        let v_bytes = rt.block_on(async {
            let mut bytes = Vec::new();
            {
                let mut fw = FramedWrite::new(
                    &mut bytes,
                    Codec::builder().for_network(Network::Testnet).finish(),
                );
                fw.send(v).await.expect("message should be serialized");
            }
            bytes
        });

        rt.block_on(async {
            let mut fr = FramedRead::new(
                Cursor::new(&v_bytes),
                Codec::builder().for_network(Network::Mainnet).finish(),
            );
            fr.next()
                .await
                .expect("a next message should be available")
                .expect_err("the message should fail the magic check")
        });
    }

    #[test]
    fn corrupted_checksum_rejected() {
        ember_test::init();

        let rt = Runtime::new().unwrap();

        let v = Message::Ping(Nonce(7));

        use tokio_util::codec::{FramedRead, FramedWrite};
        let mut v_bytes = rt.block_on(async {
            let mut bytes = Vec::new();
            {
                let mut fw = FramedWrite::new(&mut bytes, Codec::builder().finish());
                fw.send(v).await.expect("message should be serialized");
            }
            bytes
        });

        // Flip a payload bit so the checksum no longer matches.
        let last = v_bytes.len() - 1;
        v_bytes[last] ^= 0x01;

        rt.block_on(async {
            let mut fr = FramedRead::new(Cursor::new(&v_bytes), Codec::builder().finish());
            fr.next()
                .await
                .expect("a next message should be available")
                .expect_err("the message should fail the checksum check")
        });
    }

    #[test]
    fn max_msg_size_round_trip() {
        ember_test::init();

        let rt = Runtime::new().unwrap();

        // An inv with two entries has a body of 4 + 2 * 33 = 70 bytes.
        let msg = Message::Inv(vec![
            InventoryHash::Tx(ember_chain::transaction::Hash([1; 32])),
            InventoryHash::Block(ember_chain::block::Hash([2; 32])),
        ]);
        let size = 70;

        use tokio_util::codec::{FramedRead, FramedWrite};

        // Reducing the max size to body size - 1 rejects the encode.
        rt.block_on(async {
            let mut bytes = Vec::new();
            {
                let mut fw = FramedWrite::new(
                    &mut bytes,
                    Codec::builder().with_max_body_len(size - 1).finish(),
                );
                fw.send(msg.clone()).await.expect_err(
                    "message should not encode as it is bigger than the max allowed value",
                );
            }
        });

        // At exactly the body size it encodes.
        let msg_bytes = rt.block_on(async {
            let mut bytes = Vec::new();
            {
                let mut fw = FramedWrite::new(
                    &mut bytes,
                    Codec::builder().with_max_body_len(size).finish(),
                );
                fw.send(msg.clone())
                    .await
                    .expect("message should encode with the msg body size as max allowed value");
            }
            bytes
        });

        // An undersized reader rejects it; a right-sized reader accepts it.
        rt.block_on(async {
            let mut fr = FramedRead::new(
                Cursor::new(&msg_bytes),
                Codec::builder().with_max_body_len(size - 1).finish(),
            );
            fr.next()
                .await
                .expect("a next message should be available")
                .expect_err("message should not decode as it is bigger than the max allowed value")
        });

        let decoded = rt.block_on(async {
            let mut fr = FramedRead::new(
                Cursor::new(&msg_bytes),
                Codec::builder().with_max_body_len(size).finish(),
            );
            fr.next()
                .await
                .expect("a next message should be available")
                .expect("message should decode with the msg body size as max allowed value")
        });
        assert_eq!(msg, decoded);
    }
}
