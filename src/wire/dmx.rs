use super::ARTNET_VERSION;
use crate::error::WireError;

/// `ArtDmx` (0x5000): one universe's worth of DMX512 data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtDmx {
    pub version: u16,
    pub sequence: u8,
    pub physical: u8,
    /// Low 4 bits of the universe address.
    pub sub_uni: u8,
    /// High 7 bits of the universe address.
    pub net: u8,
    pub data: Vec<u8>,
}

impl ArtDmx {
    pub fn new(net: u8, sub_uni: u8, data: Vec<u8>) -> Self {
        Self {
            version: ARTNET_VERSION,
            sequence: 0,
            physical: 0,
            sub_uni,
            net,
            data,
        }
    }

    /// The combined 15-bit universe address.
    pub fn universe(&self) -> u16 {
        ((self.net as u16) << 8) | self.sub_uni as u16
    }

    pub(crate) fn decode_body(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < 8 {
            return Err(WireError::TooShort {
                actual: data.len(),
                expected: 8,
            });
        }
        let length = u16::from_be_bytes([data[6], data[7]]) as usize;
        let available = data.len() - 8;
        if length > available {
            return Err(WireError::LengthOverflow {
                declared: length,
                available,
            });
        }
        Ok(Self {
            version: u16::from_be_bytes([data[0], data[1]]),
            sequence: data[2],
            physical: data[3],
            sub_uni: data[4],
            net: data[5],
            data: data[8..8 + length].to_vec(),
        })
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_be_bytes());
        out.push(self.sequence);
        out.push(self.physical);
        out.push(self.sub_uni);
        out.push(self.net);
        // Art-Net requires an even, non-zero data length.
        let mut data = self.data.clone();
        if data.len() % 2 != 0 {
            data.push(0);
        }
        out.extend_from_slice(&(data.len() as u16).to_be_bytes());
        out.extend_from_slice(&data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{decode, encode, Packet};

    #[test]
    fn round_trips_odd_length_payload_padded_even() {
        let dmx = ArtDmx::new(0, 1, vec![1, 2, 3]);
        let encoded = encode(&Packet::Dmx(dmx));
        match decode(&encoded).unwrap() {
            Packet::Dmx(decoded) => assert_eq!(decoded.data, vec![1, 2, 3, 0]),
            other => panic!("expected Dmx, got {other:?}"),
        }
    }

    #[test]
    fn universe_combines_net_and_sub_uni() {
        let dmx = ArtDmx::new(1, 2, vec![]);
        assert_eq!(dmx.universe(), (1u16 << 8) | 2);
    }

    #[test]
    fn rejects_length_overflow() {
        let mut body = ARTNET_VERSION.to_be_bytes().to_vec();
        body.extend_from_slice(&[0, 0, 0, 0]); // sequence, physical, sub_uni, net
        body.extend_from_slice(&100u16.to_be_bytes()); // claims 100 bytes of data
        body.extend_from_slice(&[1, 2, 3]); // only 3 present
        assert_eq!(
            ArtDmx::decode_body(&body),
            Err(WireError::LengthOverflow {
                declared: 100,
                available: 3
            })
        );
    }
}
