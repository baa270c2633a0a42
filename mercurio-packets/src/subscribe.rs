use bytes::{Buf, BufMut};

use mercurio_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    qos::QoS,
    reason::ReasonCode,
};

/// MQTT 3.1.1 subscription options: bits 2-7 of the byte are reserved and
/// must be zero, only the requested QoS occupies bits 0-1.
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct SubscriptionOptions {
    pub qos: QoS,
}

impl Encoder for SubscriptionOptions {
    fn encode(&self, buffer: &mut bytes::BytesMut) {
        buffer.put_u8(self.qos as u8);
    }

    fn encoded_size(&self) -> usize {
        std::mem::size_of::<u8>()
    }
}

impl Decoder for SubscriptionOptions {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let opt = buffer.get_u8();

        if (opt & 0b1111_1100) != 0 {
            return Err(ReasonCode::MalformedPacket.into());
        }

        let qos: QoS = (opt & 0b0000_0011).into();
        if qos == QoS::Invalid {
            return Err(ReasonCode::MalformedPacket.into());
        }

        Ok(SubscriptionOptions { qos })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct SubscribePayload {
    pub topic_filter: String,
    pub subs_opt: SubscriptionOptions,
}

impl Encoder for SubscribePayload {
    fn encode(&self, buffer: &mut bytes::BytesMut) {
        self.topic_filter.encode(buffer);
        self.subs_opt.encode(buffer);
    }

    fn encoded_size(&self) -> usize {
        self.topic_filter.encoded_size() + self.subs_opt.encoded_size()
    }
}

impl Decoder for SubscribePayload {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let topic_filter = String::decode(buffer)?;
        let subs_opt = SubscriptionOptions::decode(buffer)?;

        Ok(SubscribePayload {
            topic_filter,
            subs_opt,
        })
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct SubscribePacket {
    pub packet_id: u16,
    pub payload: Vec<SubscribePayload>,
}

const PACKET_TYPE: u8 = 0x08;

impl Encoder for SubscribePacket {
    fn encode(&self, buffer: &mut bytes::BytesMut) {
        let mut remaining_len = 0;

        let mut fixed_header: u8 = PACKET_TYPE << 4;
        fixed_header |= 0b0000_0010;
        fixed_header.encode(buffer);

        remaining_len += self.packet_id.encoded_size();
        remaining_len += self.payload.encoded_size();

        VariableByteInteger(remaining_len as u32).encode(buffer);

        self.packet_id.encode(buffer);
        self.payload.encode(buffer);
    }
}

impl Decoder for SubscribePacket {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        buffer.advance(1);
        let remaining_len = VariableByteInteger::decode(buffer)?.0 as usize;
        let buffer_len = buffer.remaining();

        let packet_id = u16::decode(buffer)?;

        if !buffer.has_remaining() {
            return Err(ReasonCode::ProtocolError.into());
        }

        let next_packet = buffer_len - remaining_len;
        let mut payload = Vec::new();

        while buffer.remaining() > next_packet {
            payload.push(SubscribePayload::decode(buffer)?);
        }

        if payload.is_empty() {
            return Err(ReasonCode::ProtocolError.into());
        }

        Ok(SubscribePacket { packet_id, payload })
    }
}

#[cfg(test)]
mod tests {
    use bytes::{Bytes, BytesMut};

    use crate::subscribe::*;

    #[test]
    fn test_subscribe_packet_encode_decode() {
        let expected = vec![
            0x82, 0x0f, 0x00, 0x01, 0x00, 0x0a, 0x74, 0x65, 0x73, 0x74, 0x5f, 0x74, 0x6f, 0x70,
            0x69, 0x63, 0x01,
        ];

        let packet = SubscribePacket {
            packet_id: 1,
            payload: vec![SubscribePayload {
                topic_filter: "test_topic".to_string(),
                subs_opt: SubscriptionOptions {
                    qos: QoS::AtLeastOnce,
                },
            }],
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        assert_eq!(encoded.to_vec(), expected);

        let mut bytes = Bytes::from(expected);

        let new_packet = SubscribePacket::decode(&mut bytes).expect("Unexpected error");
        assert_eq!(packet, new_packet);
    }

    #[test]
    fn test_subscribe_packet_multiple_filters() {
        let packet = SubscribePacket {
            packet_id: 7,
            payload: vec![
                SubscribePayload {
                    topic_filter: "a/#".to_string(),
                    subs_opt: SubscriptionOptions { qos: QoS::AtMostOnce },
                },
                SubscribePayload {
                    topic_filter: "b/+/c".to_string(),
                    subs_opt: SubscriptionOptions {
                        qos: QoS::ExactlyOnce,
                    },
                },
            ],
        };

        let mut encoded = BytesMut::new();
        packet.encode(&mut encoded);

        let mut bytes = Bytes::from(encoded.to_vec());
        let new_packet = SubscribePacket::decode(&mut bytes).expect("Unexpected error");
        assert_eq!(packet, new_packet);
    }
}
