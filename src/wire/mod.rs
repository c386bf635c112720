//! Art-Net wire codec (C1).
//!
//! Every packet shares an 8-byte `"Art-Net\0"` id and a little-endian
//! 2-byte opcode; the `version` field inside each body is big-endian 14
//! (a protocol quirk — everything else multi-byte is little-endian unless
//! noted on the field). Layouts follow the byte-exact offsets used by the
//! reference ArtNet node this crate's node core is modeled on.

mod dmx;
mod ip_prog;
mod poll;
mod poll_reply;
mod rdm;
mod time_code;
mod tod;

pub use dmx::ArtDmx;
pub use ip_prog::ArtIpProg;
pub use poll::ArtPoll;
pub use poll_reply::ArtPollReply;
pub use rdm::ArtRdm;
pub use time_code::ArtTimeCode;
pub use tod::{ArtTodControl, ArtTodData, ArtTodRequest, TOD_FLUSH_COMMAND};

use crate::error::WireError;

/// 8-byte literal that opens every Art-Net datagram.
pub const ARTNET_ID: &[u8; 8] = b"Art-Net\0";

/// Protocol version this node speaks and requires of peers.
pub const ARTNET_VERSION: u16 = 14;

/// UDP port Art-Net always binds and sends to.
pub const ARTNET_PORT: u16 = 6454;

/// Maximum RDM UIDs carried in a single `ArtTodData` fragment.
pub const MAX_UIDS_PER_TOD_BLOCK: usize = 200;

/// Maximum universe addresses carried in a single `ArtTodRequest`.
pub const MAX_RDM_ADDRESS_COUNT: usize = 32;

/// Maximum RDM payload an `ArtRdm` frame can carry.
pub const MAX_RDM_DATA: usize = 232;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum OpCode {
    Poll = 0x2000,
    PollReply = 0x2100,
    Dmx = 0x5000,
    TodRequest = 0x8000,
    TodData = 0x8100,
    TodControl = 0x8200,
    Rdm = 0x8300,
    IpProg = 0xf800,
    TimeCode = 0x9700,
}

impl OpCode {
    fn from_u16(value: u16) -> Option<Self> {
        Some(match value {
            0x2000 => OpCode::Poll,
            0x2100 => OpCode::PollReply,
            0x5000 => OpCode::Dmx,
            0x8000 => OpCode::TodRequest,
            0x8100 => OpCode::TodData,
            0x8200 => OpCode::TodControl,
            0x8300 => OpCode::Rdm,
            0xf800 => OpCode::IpProg,
            0x9700 => OpCode::TimeCode,
            _ => return None,
        })
    }
}

/// A decoded Art-Net packet of any opcode this node understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Poll(ArtPoll),
    PollReply(Box<ArtPollReply>),
    Dmx(ArtDmx),
    TodRequest(ArtTodRequest),
    TodData(ArtTodData),
    TodControl(ArtTodControl),
    Rdm(ArtRdm),
    IpProg(ArtIpProg),
    TimeCode(ArtTimeCode),
}

impl Packet {
    fn opcode(&self) -> OpCode {
        match self {
            Packet::Poll(_) => OpCode::Poll,
            Packet::PollReply(_) => OpCode::PollReply,
            Packet::Dmx(_) => OpCode::Dmx,
            Packet::TodRequest(_) => OpCode::TodRequest,
            Packet::TodData(_) => OpCode::TodData,
            Packet::TodControl(_) => OpCode::TodControl,
            Packet::Rdm(_) => OpCode::Rdm,
            Packet::IpProg(_) => OpCode::IpProg,
            Packet::TimeCode(_) => OpCode::TimeCode,
        }
    }
}

/// Encode any supported packet to a complete UDP datagram body.
pub fn encode(packet: &Packet) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    out.extend_from_slice(ARTNET_ID);
    out.extend_from_slice(&(packet.opcode() as u16).to_le_bytes());
    match packet {
        Packet::Poll(p) => p.encode_body(&mut out),
        Packet::PollReply(p) => p.encode_body(&mut out),
        Packet::Dmx(p) => p.encode_body(&mut out),
        Packet::TodRequest(p) => p.encode_body(&mut out),
        Packet::TodData(p) => p.encode_body(&mut out),
        Packet::TodControl(p) => p.encode_body(&mut out),
        Packet::Rdm(p) => p.encode_body(&mut out),
        Packet::IpProg(p) => p.encode_body(&mut out),
        Packet::TimeCode(p) => p.encode_body(&mut out),
    }
    out
}

/// Decode a UDP datagram into a [`Packet`].
///
/// Fails with [`WireError::BadId`] when the 8-byte prefix doesn't match,
/// [`WireError::TooShort`] when the body is shorter than the opcode's fixed
/// header, and [`WireError::LengthOverflow`] when a declared sub-length
/// exceeds the datagram.
pub fn decode(data: &[u8]) -> Result<Packet, WireError> {
    if data.len() < 10 {
        return Err(WireError::TooShort {
            actual: data.len(),
            expected: 10,
        });
    }
    if &data[0..8] != ARTNET_ID {
        return Err(WireError::BadId);
    }
    let op_value = u16::from_le_bytes([data[8], data[9]]);
    let op = OpCode::from_u16(op_value).ok_or(WireError::UnknownOpCode(op_value))?;
    let body = &data[10..];
    Ok(match op {
        OpCode::Poll => Packet::Poll(ArtPoll::decode_body(body)?),
        OpCode::PollReply => Packet::PollReply(Box::new(ArtPollReply::decode_body(body)?)),
        OpCode::Dmx => Packet::Dmx(ArtDmx::decode_body(body)?),
        OpCode::TodRequest => Packet::TodRequest(ArtTodRequest::decode_body(body)?),
        OpCode::TodData => Packet::TodData(ArtTodData::decode_body(body)?),
        OpCode::TodControl => Packet::TodControl(ArtTodControl::decode_body(body)?),
        OpCode::Rdm => Packet::Rdm(ArtRdm::decode_body(body)?),
        OpCode::IpProg => Packet::IpProg(ArtIpProg::decode_body(body)?),
        OpCode::TimeCode => Packet::TimeCode(ArtTimeCode::decode_body(body)?),
    })
}

/// Extract a null-terminated (or full-width) ASCII/UTF-8 string from a fixed
/// field, the way `ArtPollReply`'s name fields are carried.
pub(crate) fn extract_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).to_string()
}

/// Write `s` into a fixed-width, NUL-padded field.
pub(crate) fn put_padded_str(out: &mut Vec<u8>, s: &str, width: usize) {
    let bytes = s.as_bytes();
    let n = bytes.len().min(width.saturating_sub(1));
    out.extend_from_slice(&bytes[..n]);
    out.resize(out.len() + (width - n), 0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_id() {
        let data = [0u8; 20];
        assert_eq!(
            decode(&data),
            Err(WireError::BadId)
        );
    }

    #[test]
    fn rejects_short_packet() {
        let data = b"Art-Net\0";
        assert_eq!(
            decode(data),
            Err(WireError::TooShort {
                actual: 8,
                expected: 10
            })
        );
    }

    #[test]
    fn rejects_unknown_opcode() {
        let mut data = ARTNET_ID.to_vec();
        data.extend_from_slice(&0xbeefu16.to_le_bytes());
        assert_eq!(decode(&data), Err(WireError::UnknownOpCode(0xbeef)));
    }
}
