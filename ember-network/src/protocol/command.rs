use ember_chain::SerializationError;

/// The one-byte message type carried in every frame header.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Hello = 0x01,
    Ping = 0x02,
    Pong = 0x03,
    Inv = 0x04,
    GetData = 0x05,
    Tx = 0x06,
    Block = 0x07,
    AuthChallenge = 0x08,
    AuthResponse = 0x09,
}

impl Command {
    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Result<Command, SerializationError> {
        match byte {
            0x01 => Ok(Command::Hello),
            0x02 => Ok(Command::Ping),
            0x03 => Ok(Command::Pong),
            0x04 => Ok(Command::Inv),
            0x05 => Ok(Command::GetData),
            0x06 => Ok(Command::Tx),
            0x07 => Ok(Command::Block),
            0x08 => Ok(Command::AuthChallenge),
            0x09 => Ok(Command::AuthResponse),
            _ => Err(SerializationError::Parse("unknown message type byte")),
        }
    }
}
