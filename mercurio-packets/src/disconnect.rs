use bytes::{Buf, BufMut, BytesMut};

use mercurio_core::codec::{Decoder, Encoder, VariableByteInteger};

/// MQTT 3.1.1 DISCONNECT carries no variable header or payload.
#[derive(PartialEq, Eq, Debug, Default)]
pub struct DisconnectPacket {}

const PACKET_TYPE: u8 = 0x0e;

impl Encoder for DisconnectPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);
        VariableByteInteger(0).encode(buffer);
    }
}

impl Decoder for DisconnectPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        let _ = VariableByteInteger::decode(buffer)?;
        Ok(Self {})
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use crate::disconnect::DisconnectPacket;
    use mercurio_core::codec::{Decoder, Encoder};

    #[test]
    fn test_disconnect_encode_decode() {
        let packet = DisconnectPacket::default();
        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);
        assert_eq!(encoded.to_vec(), vec![0xe0, 0x00]);

        let mut bytes = Bytes::from(encoded.to_vec());
        assert_eq!(DisconnectPacket::decode(&mut bytes).unwrap(), packet);
    }
}
