use crate::error::WireError;

/// SMPTE/EBU/Film/25fps frame types carried in `ArtTimeCode`'s `type_` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TimeCodeType {
    Film = 0,
    Ebu = 1,
    Drop = 2,
    Smpte = 3,
}

impl TimeCodeType {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => TimeCodeType::Ebu,
            2 => TimeCodeType::Drop,
            3 => TimeCodeType::Smpte,
            _ => TimeCodeType::Film,
        }
    }
}

/// `ArtTimeCode` (0x9700): relays an external timecode source to other nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtTimeCode {
    pub frames: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u8,
    pub type_: TimeCodeType,
}

impl ArtTimeCode {
    pub(crate) fn decode_body(data: &[u8]) -> Result<Self, WireError> {
        const FIXED: usize = 7;
        if data.len() < FIXED {
            return Err(WireError::TooShort {
                actual: data.len(),
                expected: FIXED,
            });
        }
        Ok(Self {
            frames: data[2],
            seconds: data[3],
            minutes: data[4],
            hours: data[5],
            type_: TimeCodeType::from_u8(data[6]),
        })
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&[0, 0]); // filler
        out.push(self.frames);
        out.push(self.seconds);
        out.push(self.minutes);
        out.push(self.hours);
        out.push(self.type_ as u8);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{decode, encode, Packet};

    #[test]
    fn round_trips() {
        let tc = ArtTimeCode {
            frames: 12,
            seconds: 34,
            minutes: 56,
            hours: 1,
            type_: TimeCodeType::Smpte,
        };
        let encoded = encode(&Packet::TimeCode(tc));
        match decode(&encoded).unwrap() {
            Packet::TimeCode(decoded) => assert_eq!(decoded, tc),
            other => panic!("expected TimeCode, got {other:?}"),
        }
    }
}
