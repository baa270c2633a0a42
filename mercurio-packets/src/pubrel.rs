use bytes::{Buf, BufMut, BytesMut};

use mercurio_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    reason::ReasonCode,
};

#[derive(Default, Debug, PartialEq, Eq, Clone, Copy)]
pub struct PubRelPacket {
    pub packet_id: u16,
}

const PACKET_TYPE: u8 = 0x06;

impl Encoder for PubRelPacket {
    fn encode(&self, buffer: &mut BytesMut) {
        // PUBREL fixed header reserved bits are 0b0010, per the spec.
        buffer.put_u8((PACKET_TYPE << 4) | 0b0010);
        VariableByteInteger(self.packet_id.encoded_size() as u32).encode(buffer);
        self.packet_id.encode(buffer);
    }
}

impl Decoder for PubRelPacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let fixed_header = buffer.get_u8();
        if (fixed_header & 0x0f) != 0b0010 {
            return Err(ReasonCode::MalformedPacket.into());
        }

        let _ = VariableByteInteger::decode(buffer)?;
        let packet_id = u16::decode(buffer)?;

        Ok(PubRelPacket { packet_id })
    }
}
