//! RDM types consumed by the node core.
//!
//! The RDM command serializer itself — turning an in-memory [`RdmRequest`]
//! or [`RdmResponse`] into the PID-specific parameter bytes RDM devices
//! expect, and back — is treated as an external collaborator: the node
//! only needs `pack`/`inflate` on some type implementing [`RdmCommandCodec`].
//! [`NullCodec`] is a minimal stand-in used by the test suite; a real
//! deployment plugs in its own RDM stack.

use std::fmt;

/// A 6-byte RDM device identifier: 2-byte manufacturer ID + 4-byte device ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid(pub [u8; 6]);

impl Uid {
    /// The UID that addresses every device from every manufacturer.
    pub const BROADCAST_ALL_MANUFACTURERS: Uid = Uid([0xff; 6]);

    pub fn new(manufacturer_id: u16, device_id: u32) -> Self {
        let m = manufacturer_id.to_be_bytes();
        let d = device_id.to_be_bytes();
        Uid([m[0], m[1], d[0], d[1], d[2], d[3]])
    }

    pub fn manufacturer_id(&self) -> u16 {
        u16::from_be_bytes([self.0[0], self.0[1]])
    }

    pub fn device_id(&self) -> u32 {
        u32::from_be_bytes([self.0[2], self.0[3], self.0[4], self.0[5]])
    }

    /// True for the all-manufacturers broadcast UID, or any manufacturer's
    /// own broadcast UID (device id 0xffffffff for that manufacturer).
    pub fn is_broadcast(&self) -> bool {
        self.device_id() == 0xffff_ffff
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:08x}", self.manufacturer_id(), self.device_id())
    }
}

/// Sub-device sentinel meaning "every sub-device on the responder".
pub const ALL_SUBDEVICES: u16 = 0xffff;

/// The PID that relaxes response-matching rules: a responder answers a
/// `GET_COMMAND` for a queued message with whatever command class and PID
/// the queued message actually was.
pub const PID_QUEUED_MESSAGE: u16 = 0x0020;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    DiscoverCommand,
    DiscoverCommandResponse,
    GetCommand,
    GetCommandResponse,
    SetCommand,
    SetCommandResponse,
}

impl CommandClass {
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            CommandClass::DiscoverCommandResponse
                | CommandClass::GetCommandResponse
                | CommandClass::SetCommandResponse
        )
    }
}

/// An in-flight RDM request, as submitted to [`crate::port::InputPort::send_rdm_request`].
#[derive(Debug, Clone)]
pub struct RdmRequest {
    pub source_uid: Uid,
    pub destination_uid: Uid,
    pub command_class: CommandClass,
    pub param_id: u16,
    pub sub_device: u16,
    pub params: Vec<u8>,
}

/// A parsed RDM response.
#[derive(Debug, Clone)]
pub struct RdmResponse {
    pub source_uid: Uid,
    pub destination_uid: Uid,
    pub command_class: CommandClass,
    pub param_id: u16,
    pub sub_device: u16,
    pub params: Vec<u8>,
}

/// Converts in-memory RDM commands to/from the byte slices an `ArtRdm`
/// frame carries. Real implementations speak the full RDM wire format
/// (checksums, message length, etc); this is the seam where that plugs in.
pub trait RdmCommandCodec {
    fn pack_request(&self, request: &RdmRequest, out: &mut Vec<u8>);
    fn pack_response(&self, response: &RdmResponse, out: &mut Vec<u8>);
    fn inflate_request(&self, data: &[u8]) -> Option<RdmRequest>;
    fn inflate_response(&self, data: &[u8]) -> Option<RdmResponse>;
}

/// A compact, non-standard encoding used by the node's own tests. Does not
/// implement the real RDM wire checksum/length framing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCodec;

fn command_class_byte(cc: CommandClass) -> u8 {
    match cc {
        CommandClass::DiscoverCommand => 0x10,
        CommandClass::DiscoverCommandResponse => 0x11,
        CommandClass::GetCommand => 0x20,
        CommandClass::GetCommandResponse => 0x21,
        CommandClass::SetCommand => 0x30,
        CommandClass::SetCommandResponse => 0x31,
    }
}

fn command_class_from_byte(b: u8) -> Option<CommandClass> {
    Some(match b {
        0x10 => CommandClass::DiscoverCommand,
        0x11 => CommandClass::DiscoverCommandResponse,
        0x20 => CommandClass::GetCommand,
        0x21 => CommandClass::GetCommandResponse,
        0x30 => CommandClass::SetCommand,
        0x31 => CommandClass::SetCommandResponse,
        _ => return None,
    })
}

impl RdmCommandCodec for NullCodec {
    fn pack_request(&self, request: &RdmRequest, out: &mut Vec<u8>) {
        out.extend_from_slice(&request.source_uid.0);
        out.extend_from_slice(&request.destination_uid.0);
        out.push(command_class_byte(request.command_class));
        out.extend_from_slice(&request.param_id.to_be_bytes());
        out.extend_from_slice(&request.sub_device.to_be_bytes());
        out.push(request.params.len() as u8);
        out.extend_from_slice(&request.params);
    }

    fn pack_response(&self, response: &RdmResponse, out: &mut Vec<u8>) {
        out.extend_from_slice(&response.source_uid.0);
        out.extend_from_slice(&response.destination_uid.0);
        out.push(command_class_byte(response.command_class));
        out.extend_from_slice(&response.param_id.to_be_bytes());
        out.extend_from_slice(&response.sub_device.to_be_bytes());
        out.push(response.params.len() as u8);
        out.extend_from_slice(&response.params);
    }

    fn inflate_request(&self, data: &[u8]) -> Option<RdmRequest> {
        if data.len() < 18 {
            return None;
        }
        let source_uid = Uid(data[0..6].try_into().ok()?);
        let destination_uid = Uid(data[6..12].try_into().ok()?);
        let command_class = command_class_from_byte(data[12])?;
        let param_id = u16::from_be_bytes([data[13], data[14]]);
        let sub_device = u16::from_be_bytes([data[15], data[16]]);
        let len = *data.get(17)? as usize;
        let params = data.get(18..18 + len)?.to_vec();
        Some(RdmRequest {
            source_uid,
            destination_uid,
            command_class,
            param_id,
            sub_device,
            params,
        })
    }

    fn inflate_response(&self, data: &[u8]) -> Option<RdmResponse> {
        let req = self.inflate_request(data)?;
        Some(RdmResponse {
            source_uid: req.source_uid,
            destination_uid: req.destination_uid,
            command_class: req.command_class,
            param_id: req.param_id,
            sub_device: req.sub_device,
            params: req.params,
        })
    }
}
