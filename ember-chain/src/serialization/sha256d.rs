//! SHA-256d, the doubled SHA-256 used for wire-frame checksums.

use sha2::{Digest, Sha256};
use std::io;

/// A type that lets you write out SHA-256d (double SHA-256) digests.
#[derive(Default)]
pub struct Writer {
    hash: Sha256,
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hash.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Writer {
    /// Consume the Writer and produce the hash result.
    pub fn finish(self) -> [u8; 32] {
        let result = Sha256::digest(&self.hash.finalize());
        let mut buffer = [0u8; 32];
        buffer[0..32].copy_from_slice(&result);
        buffer
    }
}

/// A 4-byte checksum using truncated double-SHA256 (two rounds of SHA-256).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Checksum(pub [u8; 4]);

impl<'a> From<&'a [u8]> for Checksum {
    fn from(bytes: &'a [u8]) -> Self {
        let hash1 = Sha256::digest(bytes);
        let hash2 = Sha256::digest(&hash1);
        let mut checksum = [0u8; 4];
        checksum[0..4].copy_from_slice(&hash2[0..4]);
        Self(checksum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn checksum_matches_writer() {
        let payload = b"checksum test payload";
        let mut writer = Writer::default();
        writer.write_all(payload).unwrap();
        let full = writer.finish();

        let checksum = Checksum::from(&payload[..]);
        assert_eq!(checksum.0, full[0..4]);
    }

    #[test]
    fn empty_payload_checksum() {
        let a = Checksum::from(&b""[..]);
        let b = Checksum::from(&b""[..]);
        assert_eq!(a, b);
        assert_ne!(a, Checksum::from(&b"x"[..]));
    }
}
