//! Media packet format
//!
//! ```text
//! ┌──────────────┬─────────────────────┐
//! │ media_id u16 │ codec payload       │
//! │ big endian   │ (opaque)            │
//! └──────────────┴─────────────────────┘
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::MAX_PACKET_SIZE;
use crate::error::NetworkError;

pub const HEADER_SIZE: usize = 2;

/// Largest media id the header can carry
pub const MAX_MEDIA_ID: u64 = u16::MAX as u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPacket {
    pub media_id: u16,
    pub payload: Bytes,
}

impl MediaPacket {
    pub fn new(media_id: u64, payload: Bytes) -> Result<Self, NetworkError> {
        let media_id = u16::try_from(media_id).map_err(|_| NetworkError::InvalidPacket)?;
        if HEADER_SIZE + payload.len() > MAX_PACKET_SIZE {
            return Err(NetworkError::PacketTooLarge(HEADER_SIZE + payload.len()));
        }
        Ok(Self { media_id, payload })
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u16(self.media_id);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, NetworkError> {
        if data.len() < HEADER_SIZE {
            return Err(NetworkError::InvalidPacket);
        }
        if data.len() > MAX_PACKET_SIZE {
            return Err(NetworkError::PacketTooLarge(data.len()));
        }
        Ok(Self {
            media_id: u16::from_be_bytes([data[0], data[1]]),
            payload: Bytes::copy_from_slice(&data[HEADER_SIZE..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_layout() {
        let packet = MediaPacket::new(0x0102, Bytes::from_static(b"abc")).unwrap();
        let wire = packet.serialize();
        assert_eq!(&wire[..], &[0x01, 0x02, b'a', b'b', b'c']);
        assert_eq!(MediaPacket::deserialize(&wire).unwrap(), packet);
    }

    #[test]
    fn test_rejects_bad_packets() {
        assert!(matches!(
            MediaPacket::deserialize(&[1]),
            Err(NetworkError::InvalidPacket)
        ));
        assert!(matches!(
            MediaPacket::new(70_000, Bytes::new()),
            Err(NetworkError::InvalidPacket)
        ));
        assert!(matches!(
            MediaPacket::new(1, Bytes::from(vec![0u8; MAX_PACKET_SIZE])),
            Err(NetworkError::PacketTooLarge(_))
        ));
    }
}
