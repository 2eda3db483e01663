//! STREAM packet encoding
//!
//! The sender only needs `encode`/`decode`; the byte layout is owned by the
//! codec implementation. The default codec uses bincode, which is
//! deterministic for a given packet.

use crate::{
    packet::{StreamPacket, STREAM_VERSION},
    Error, Result,
};

/// Encodes and decodes the plaintext STREAM packet
pub trait StreamCodec: Send + Sync {
    /// Packet → plaintext bytes
    fn encode(&self, packet: &StreamPacket) -> Result<Vec<u8>>;

    /// Plaintext bytes → packet
    fn decode(&self, bytes: &[u8]) -> Result<StreamPacket>;
}

/// Bincode codec
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl StreamCodec for BincodeCodec {
    fn encode(&self, packet: &StreamPacket) -> Result<Vec<u8>> {
        Ok(bincode::serialize(packet)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<StreamPacket> {
        let packet: StreamPacket = bincode::deserialize(bytes)?;
        if packet.version != STREAM_VERSION {
            return Err(Error::InvalidPacket(format!(
                "Unsupported STREAM version {}",
                packet.version
            )));
        }
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{Frame, IlpPacketType};

    #[test]
    fn test_encoding_is_deterministic() {
        let packet = StreamPacket::new(
            IlpPacketType::Prepare,
            42,
            1_000,
            vec![Frame::StreamMoney {
                stream_id: 1,
                shares: 1,
            }],
        );

        let codec = BincodeCodec;
        let first = codec.encode(&packet).unwrap();
        let second = codec.encode(&packet).unwrap();
        assert_eq!(first, second);
        assert_eq!(codec.decode(&first).unwrap(), packet);
    }

    #[test]
    fn test_rejects_unknown_version() {
        let mut packet = StreamPacket::new(IlpPacketType::Prepare, 1, 0, vec![]);
        packet.version = 9;
        let bytes = bincode::serialize(&packet).unwrap();

        assert!(matches!(
            BincodeCodec.decode(&bytes),
            Err(Error::InvalidPacket(_))
        ));
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        assert!(BincodeCodec.decode(&[0xff, 0x01]).is_err());
    }
}
