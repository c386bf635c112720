use super::ARTNET_VERSION;
use crate::error::WireError;

/// `ArtPoll` (0x2000): broadcast by controllers to solicit `ArtPollReply`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArtPoll {
    pub version: u16,
    /// Bit 1 set = "send ArtPollReply on state change" (`talk_to_me`).
    pub talk_to_me: u8,
    pub priority: u8,
}

impl ArtPoll {
    /// Requests unsolicited replies whenever a polled node's state changes.
    pub const TALK_TO_ME_SEND_ON_CHANGE: u8 = 0x02;

    pub fn new() -> Self {
        Self {
            version: ARTNET_VERSION,
            talk_to_me: Self::TALK_TO_ME_SEND_ON_CHANGE,
            priority: 0x10,
        }
    }

    pub(crate) fn decode_body(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < 4 {
            return Err(WireError::TooShort {
                actual: data.len(),
                expected: 4,
            });
        }
        Ok(Self {
            version: u16::from_be_bytes([data[0], data[1]]),
            talk_to_me: data[2],
            priority: data[3],
        })
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.version.to_be_bytes());
        out.push(self.talk_to_me);
        out.push(self.priority);
    }
}

impl Default for ArtPoll {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{decode, encode, Packet};

    #[test]
    fn round_trips() {
        let poll = ArtPoll::new();
        let encoded = encode(&Packet::Poll(poll));
        match decode(&encoded).unwrap() {
            Packet::Poll(decoded) => assert_eq!(decoded, poll),
            other => panic!("expected Poll, got {other:?}"),
        }
    }
}
