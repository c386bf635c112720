use crate::error::WireError;

/// `ArtIpProg` (0xf800): remote IP (re)configuration. Parsed enough to
/// acknowledge and hand off to a caller that wants to act on it — this node
/// never changes its own IP configuration in response to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtIpProg {
    pub command: u8,
    pub prog_ip: [u8; 4],
    pub prog_subnet: [u8; 4],
    pub prog_port: u16,
}

impl ArtIpProg {
    pub(crate) fn decode_body(data: &[u8]) -> Result<Self, WireError> {
        const FIXED: usize = 14;
        if data.len() < FIXED {
            return Err(WireError::TooShort {
                actual: data.len(),
                expected: FIXED,
            });
        }
        Ok(Self {
            command: data[2],
            prog_ip: data[4..8].try_into().unwrap(),
            prog_subnet: data[8..12].try_into().unwrap(),
            prog_port: u16::from_be_bytes([data[12], data[13]]),
        })
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[0, 0]); // filler
        out.push(self.command);
        out.push(0); // filler4
        out.extend_from_slice(&self.prog_ip);
        out.extend_from_slice(&self.prog_subnet);
        out.extend_from_slice(&self.prog_port.to_be_bytes());
        out.extend_from_slice(&[0; 8]); // spare 2-7
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{decode, encode, Packet};

    #[test]
    fn round_trips_addresses() {
        let prog = ArtIpProg {
            command: 0x80,
            prog_ip: [10, 0, 0, 9],
            prog_subnet: [255, 255, 255, 0],
            prog_port: 6454,
        };
        let encoded = encode(&Packet::IpProg(prog));
        match decode(&encoded).unwrap() {
            Packet::IpProg(decoded) => assert_eq!(decoded, prog),
            other => panic!("expected IpProg, got {other:?}"),
        }
    }
}
