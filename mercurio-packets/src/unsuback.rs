use bytes::Buf;

use mercurio_core::codec::{Decoder, Encoder, VariableByteInteger};

/// MQTT 3.1.1 UNSUBACK carries only the packet identifier.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct UnsubAckPacket {
    pub packet_id: u16,
}

const PACKET_TYPE: u8 = 0x0b;

impl Encoder for UnsubAckPacket {
    fn encode(&self, buffer: &mut bytes::BytesMut) {
        let fixed_header: u8 = PACKET_TYPE << 4;
        fixed_header.encode(buffer);

        VariableByteInteger(self.packet_id.encoded_size() as u32).encode(buffer);
        self.packet_id.encode(buffer);
    }
}

impl Decoder for UnsubAckPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        let _ = VariableByteInteger::decode(buffer)?;
        let packet_id = u16::decode(buffer)?;

        Ok(UnsubAckPacket { packet_id })
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use crate::unsuback::*;

    #[test]
    fn test_unsuback_packet_encode_decode() {
        let expected = vec![0xb0, 0x02, 0x00, 0x01];

        let packet = UnsubAckPacket { packet_id: 1 };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        assert_eq!(encoded.to_vec(), expected);

        let mut bytes = Bytes::from(expected);

        let new_packet = UnsubAckPacket::decode(&mut bytes).expect("Unexpected error");
        assert_eq!(packet, new_packet);
    }
}
