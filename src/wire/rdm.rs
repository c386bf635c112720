use super::{ARTNET_VERSION, MAX_RDM_DATA};
use crate::error::WireError;

/// `ArtRdm` (0x8300): an RDM request or response tunneled over Art-Net.
///
/// The `data` payload is opaque here; turning it into a [`crate::rdm::RdmRequest`]
/// or [`crate::rdm::RdmResponse`] is the job of a [`crate::rdm::RdmCommandCodec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtRdm {
    pub version: u16,
    /// Always 0x01 per the protocol; included verbatim for fidelity.
    pub rdm_version: u8,
    pub net: u8,
    /// Always 0x00 (the only defined value); any other value is rejected.
    pub command: u8,
    pub address: u8,
    pub data: Vec<u8>,
}

impl ArtRdm {
    pub fn new(net: u8, address: u8, data: Vec<u8>) -> Self {
        Self {
            version: ARTNET_VERSION,
            rdm_version: 0x01,
            net,
            command: 0,
            address,
            data,
        }
    }

    pub(crate) fn decode_body(data: &[u8]) -> Result<Self, WireError> {
        const FIXED: usize = 11;
        if data.len() < FIXED {
            return Err(WireError::TooShort {
                actual: data.len(),
                expected: FIXED,
            });
        }
        let version = u16::from_be_bytes([data[0], data[1]]);
        let rdm_version = data[2];
        let command = data[3];
        let net = data[9];
        let address = data[10];
        let payload = &data[FIXED..];
        if payload.len() > MAX_RDM_DATA {
            return Err(WireError::LengthOverflow {
                declared: payload.len(),
                available: MAX_RDM_DATA,
            });
        }
        Ok(Self {
            version,
            rdm_version,
            net,
            command,
            address,
            data: payload.to_vec(),
        })
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_be_bytes());
        out.push(self.rdm_version);
        out.push(self.command);
        out.extend_from_slice(&[0; 5]); // filler/spare 2-6
        out.push(self.net);
        out.push(self.address);
        out.extend_from_slice(&self.data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{decode, encode, Packet};

    #[test]
    fn round_trips() {
        let rdm = ArtRdm::new(0, 3, vec![0xcc, 0x01, 0x02]);
        let encoded = encode(&Packet::Rdm(rdm.clone()));
        match decode(&encoded).unwrap() {
            Packet::Rdm(decoded) => assert_eq!(decoded, rdm),
            other => panic!("expected Rdm, got {other:?}"),
        }
    }

    #[test]
    fn rejects_oversized_payload() {
        let mut body = ARTNET_VERSION.to_be_bytes().to_vec();
        body.push(0x01);
        body.push(0);
        body.extend_from_slice(&[0; 5]);
        body.push(0);
        body.push(0);
        body.extend_from_slice(&vec![0u8; MAX_RDM_DATA + 1]);
        assert_eq!(
            ArtRdm::decode_body(&body),
            Err(WireError::LengthOverflow {
                declared: MAX_RDM_DATA + 1,
                available: MAX_RDM_DATA
            })
        );
    }
}
