use super::ARTNET_VERSION;
use crate::error::WireError;
use crate::rdm::Uid;

/// Issued in `ArtTodControl`'s `command` field: discard the current TOD and
/// rebuild it from scratch.
pub const TOD_FLUSH_COMMAND: u8 = 0x01;

/// `ArtTodRequest` (0x8000): asks a node for the TOD of the listed universes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtTodRequest {
    pub version: u16,
    pub net: u8,
    /// Always 0x00 (TodFull) on the wire; any other value is rejected.
    pub command: u8,
    /// One entry per universe (`net` combined with each entry gives the
    /// addressed universe).
    pub addresses: Vec<u8>,
}

impl ArtTodRequest {
    pub fn new(net: u8, addresses: Vec<u8>) -> Self {
        Self {
            version: ARTNET_VERSION,
            net,
            command: 0,
            addresses,
        }
    }

    pub(crate) fn decode_body(data: &[u8]) -> Result<Self, WireError> {
        const FIXED: usize = 13;
        if data.len() < FIXED {
            return Err(WireError::TooShort {
                actual: data.len(),
                expected: FIXED,
            });
        }
        let addr_count = data[12] as usize;
        let available = data.len() - FIXED;
        if addr_count > available {
            return Err(WireError::LengthOverflow {
                declared: addr_count,
                available,
            });
        }
        Ok(Self {
            version: u16::from_be_bytes([data[0], data[1]]),
            net: data[10],
            command: data[11],
            addresses: data[FIXED..FIXED + addr_count].to_vec(),
        })
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_be_bytes()); // ProtVer
        out.extend_from_slice(&[0u8; 8]); // Filler1-2 + Spare1-6
        out.push(self.net);
        out.push(self.command);
        out.push(self.addresses.len() as u8);
        out.extend_from_slice(&self.addresses);
    }
}

/// `ArtTodData` (0x8100): one fragment of a node's RDM Table of Devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtTodData {
    pub version: u16,
    pub rdm_version: u8,
    /// 1-based physical port this TOD belongs to.
    pub port: u8,
    pub command_response: u8,
    pub net: u8,
    pub address: u8,
    pub uid_total: u16,
    pub block_count: u8,
    pub uids: Vec<Uid>,
}

impl ArtTodData {
    pub fn new(net: u8, port: u8, address: u8, uid_total: u16, block_count: u8, uids: Vec<Uid>) -> Self {
        Self {
            version: ARTNET_VERSION,
            rdm_version: 0x01,
            port,
            command_response: 0,
            net,
            address,
            uid_total,
            block_count,
            uids,
        }
    }

    pub(crate) fn decode_body(data: &[u8]) -> Result<Self, WireError> {
        const FIXED: usize = 17;
        if data.len() < FIXED {
            return Err(WireError::TooShort {
                actual: data.len(),
                expected: FIXED,
            });
        }
        let uid_count = data[16] as usize;
        let available = (data.len() - FIXED) / 6;
        if uid_count > available {
            return Err(WireError::LengthOverflow {
                declared: uid_count * 6,
                available: data.len() - FIXED,
            });
        }
        let mut uids = Vec::with_capacity(uid_count);
        for i in 0..uid_count {
            let start = FIXED + i * 6;
            uids.push(Uid(data[start..start + 6].try_into().unwrap()));
        }
        Ok(Self {
            version: u16::from_be_bytes([data[0], data[1]]),
            rdm_version: data[2],
            port: data[3],
            command_response: data[10],
            net: data[11],
            address: data[12],
            uid_total: u16::from_be_bytes([data[13], data[14]]),
            block_count: data[15],
            uids,
        })
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_be_bytes());
        out.push(self.rdm_version);
        out.push(self.port);
        out.extend_from_slice(&[0u8; 6]); // Spare1-6
        out.push(self.command_response);
        out.push(self.net);
        out.push(self.address);
        out.extend_from_slice(&self.uid_total.to_be_bytes());
        out.push(self.block_count);
        out.push(self.uids.len() as u8);
        for uid in &self.uids {
            out.extend_from_slice(&uid.0);
        }
    }
}

/// `ArtTodControl` (0x8200): instructs a node to flush and rebuild its TOD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtTodControl {
    pub version: u16,
    pub net: u8,
    pub command: u8,
    pub address: u8,
}

impl ArtTodControl {
    pub fn new(net: u8, command: u8, address: u8) -> Self {
        Self {
            version: ARTNET_VERSION,
            net,
            command,
            address,
        }
    }

    pub(crate) fn decode_body(data: &[u8]) -> Result<Self, WireError> {
        const FIXED: usize = 13;
        if data.len() < FIXED {
            return Err(WireError::TooShort {
                actual: data.len(),
                expected: FIXED,
            });
        }
        Ok(Self {
            version: u16::from_be_bytes([data[0], data[1]]),
            net: data[10],
            command: data[11],
            address: data[12],
        })
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&[0u8; 8]); // Filler1-2 + Spare1-6
        out.push(self.net);
        out.push(self.command);
        out.push(self.address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{decode, encode, Packet};

    #[test]
    fn tod_request_round_trips() {
        let req = ArtTodRequest::new(3, vec![0, 1, 2]);
        let encoded = encode(&Packet::TodRequest(req.clone()));
        match decode(&encoded).unwrap() {
            Packet::TodRequest(decoded) => assert_eq!(decoded, req),
            other => panic!("expected TodRequest, got {other:?}"),
        }
    }

    #[test]
    fn tod_data_round_trips_with_uids() {
        let data = ArtTodData::new(0, 1, 1, 2, 0, vec![Uid::new(0x4850, 1), Uid::new(0x4850, 2)]);
        let encoded = encode(&Packet::TodData(data.clone()));
        match decode(&encoded).unwrap() {
            Packet::TodData(decoded) => assert_eq!(decoded, data),
            other => panic!("expected TodData, got {other:?}"),
        }
    }

    #[test]
    fn tod_control_round_trips() {
        let ctrl = ArtTodControl::new(0, TOD_FLUSH_COMMAND, 7);
        let encoded = encode(&Packet::TodControl(ctrl));
        match decode(&encoded).unwrap() {
            Packet::TodControl(decoded) => assert_eq!(decoded, ctrl),
            other => panic!("expected TodControl, got {other:?}"),
        }
    }

    #[test]
    fn tod_request_rejects_length_overflow() {
        let mut body = ARTNET_VERSION.to_be_bytes().to_vec();
        body.extend_from_slice(&[0u8; 8]);
        body.push(0); // net
        body.push(0); // command
        body.push(10); // claims 10 addresses
        body.push(1); // only 1 present
        assert_eq!(
            ArtTodRequest::decode_body(&body),
            Err(WireError::LengthOverflow {
                declared: 10,
                available: 1
            })
        );
    }
}
