use bytes::{Buf, BufMut, BytesMut};

use mercurio_core::{
    codec::{Decoder, Encoder, VariableByteInteger},
    protocol::ProtocolVersion,
    reason::ReasonCode,
};

#[derive(Default, Debug, PartialEq, Eq)]
pub struct ConnAckFlags {
    pub session_present: bool,
}

impl Encoder for ConnAckFlags {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(self.session_present as u8);
    }

    fn encoded_size(&self) -> usize {
        std::mem::size_of::<u8>()
    }
}

impl Decoder for ConnAckFlags {
    fn decode<T: Buf>(buffer: &mut T) -> crate::Result<Self> {
        let byte = buffer.get_u8();
        if (byte & 0b1111_1110) != 0 {
            return Err(ReasonCode::MalformedPacket.into());
        }

        Ok(ConnAckFlags {
            session_present: (byte & 0b0000_0001) != 0,
        })
    }
}

/// CONNACK return codes as defined for MQTT 3.1/3.1.1.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnAckReturnCode {
    #[default]
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUsernameOrPassword = 4,
    NotAuthorized = 5,
}

impl Encoder for ConnAckReturnCode {
    fn encode(&self, buffer: &mut BytesMut) {
        buffer.put_u8(*self as u8);
    }

    fn encoded_size(&self) -> usize {
        std::mem::size_of::<u8>()
    }
}

impl From<ReasonCode> for ConnAckReturnCode {
    fn from(reason: ReasonCode) -> Self {
        match reason {
            ReasonCode::Success => ConnAckReturnCode::Accepted,
            ReasonCode::UnsupportedProtocolVersion => {
                ConnAckReturnCode::UnacceptableProtocolVersion
            }
            ReasonCode::ClientIdentifierNotValid => ConnAckReturnCode::IdentifierRejected,
            ReasonCode::ServerUnavailable => ConnAckReturnCode::ServerUnavailable,
            ReasonCode::BadUserNameOrPassword => ConnAckReturnCode::BadUsernameOrPassword,
            ReasonCode::NotAuthorized => ConnAckReturnCode::NotAuthorized,
            _ => ConnAckReturnCode::ServerUnavailable,
        }
    }
}

impl From<ConnAckReturnCode> for ReasonCode {
    fn from(code: ConnAckReturnCode) -> Self {
        match code {
            ConnAckReturnCode::Accepted => ReasonCode::Success,
            ConnAckReturnCode::UnacceptableProtocolVersion => {
                ReasonCode::UnsupportedProtocolVersion
            }
            ConnAckReturnCode::IdentifierRejected => ReasonCode::ClientIdentifierNotValid,
            ConnAckReturnCode::ServerUnavailable => ReasonCode::ServerUnavailable,
            ConnAckReturnCode::BadUsernameOrPassword => ReasonCode::BadUserNameOrPassword,
            ConnAckReturnCode::NotAuthorized => ReasonCode::NotAuthorized,
        }
    }
}

#[derive(Debug, Eq, PartialEq)]
pub struct ConnAckPacket {
    pub protocol_version: ProtocolVersion,
    pub flags: ConnAckFlags,
    pub return_code: ConnAckReturnCode,
}

const PACKET_TYPE: u8 = 0x02;

impl Encoder for ConnAckPacket {
    fn encode(&self, buffer: &mut bytes::BytesMut) {
        buffer.put_u8(PACKET_TYPE << 4);

        let remaining_len = self.flags.encoded_size() + self.return_code.encoded_size();
        VariableByteInteger(remaining_len as u32).encode(buffer);

        self.flags.encode(buffer);
        self.return_code.encode(buffer);
    }
}

impl ConnAckPacket {
    /// `version` is only retained to distinguish 3.1 from 3.1.1 on the
    /// returned packet; the wire format is identical for both.
    pub fn decode<T: Buf>(buffer: &mut T, version: ProtocolVersion) -> crate::Result<Self> {
        buffer.advance(1);
        let _ = VariableByteInteger::decode(buffer)?;

        let flags = ConnAckFlags::decode(buffer)?;
        let return_code = match buffer.get_u8() {
            0x00 => ConnAckReturnCode::Accepted,
            0x01 => ConnAckReturnCode::UnacceptableProtocolVersion,
            0x02 => ConnAckReturnCode::IdentifierRejected,
            0x03 => ConnAckReturnCode::ServerUnavailable,
            0x04 => ConnAckReturnCode::BadUsernameOrPassword,
            0x05 => ConnAckReturnCode::NotAuthorized,
            _ => return Err(ReasonCode::MalformedPacket.into()),
        };

        Ok(ConnAckPacket {
            protocol_version: version,
            flags,
            return_code,
        })
    }
}
