use super::{extract_string, put_padded_str};
use crate::error::WireError;

pub const SHORT_NAME_LEN: usize = 18;
pub const LONG_NAME_LEN: usize = 64;
pub const REPORT_LEN: usize = 64;
pub const MAX_PORTS_PER_REPLY: usize = 4;

const BODY_LEN: usize = 203;

/// `ArtPollReply` (0x2100): a node's self-description, sent in response to
/// `ArtPoll` or unsolicited on state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtPollReply {
    pub ip_address: [u8; 4],
    pub port: u16,
    pub version_info: u16,
    pub net_switch: u8,
    pub sub_switch: u8,
    pub oem: u16,
    pub ubea_version: u8,
    pub status1: u8,
    pub esta_manufacturer: u16,
    pub short_name: String,
    pub long_name: String,
    pub node_report: String,
    pub num_ports: u16,
    pub port_types: [u8; 4],
    pub good_input: [u8; 4],
    pub good_output: [u8; 4],
    pub sw_in: [u8; 4],
    pub sw_out: [u8; 4],
    pub style: u8,
    pub mac_address: [u8; 6],
    pub bind_ip: [u8; 4],
    pub bind_index: u8,
    pub status2: u8,
}

impl Default for ArtPollReply {
    fn default() -> Self {
        Self {
            ip_address: [0; 4],
            port: super::ARTNET_PORT,
            version_info: 0,
            net_switch: 0,
            sub_switch: 0,
            oem: 0,
            ubea_version: 0,
            status1: 0,
            esta_manufacturer: 0,
            short_name: String::new(),
            long_name: String::new(),
            node_report: String::new(),
            num_ports: 0,
            port_types: [0; 4],
            good_input: [0; 4],
            good_output: [0; 4],
            sw_in: [0; 4],
            sw_out: [0; 4],
            style: 0,
            mac_address: [0; 6],
            bind_ip: [0; 4],
            bind_index: 0,
            status2: 0,
        }
    }
}

impl ArtPollReply {
    pub(crate) fn decode_body(data: &[u8]) -> Result<Self, WireError> {
        // HandleReplyPacket accepts older, shorter replies that predate the
        // bind_ip/bind_index/status2/filler fields.
        const MIN_LEN: usize = 190;
        if data.len() < MIN_LEN {
            return Err(WireError::TooShort {
                actual: data.len(),
                expected: MIN_LEN,
            });
        }

        let mut reply = ArtPollReply {
            ip_address: data[0..4].try_into().unwrap(),
            port: u16::from_le_bytes([data[4], data[5]]),
            version_info: u16::from_be_bytes([data[6], data[7]]),
            net_switch: data[8],
            sub_switch: data[9],
            oem: u16::from_be_bytes([data[10], data[11]]),
            ubea_version: data[12],
            status1: data[13],
            esta_manufacturer: u16::from_le_bytes([data[14], data[15]]),
            short_name: extract_string(&data[16..16 + SHORT_NAME_LEN]),
            long_name: extract_string(
                &data[16 + SHORT_NAME_LEN..16 + SHORT_NAME_LEN + LONG_NAME_LEN],
            ),
            node_report: extract_string(
                &data[16 + SHORT_NAME_LEN + LONG_NAME_LEN
                    ..16 + SHORT_NAME_LEN + LONG_NAME_LEN + REPORT_LEN],
            ),
            ..Default::default()
        };

        let after_strings = 16 + SHORT_NAME_LEN + LONG_NAME_LEN + REPORT_LEN;
        reply.num_ports = u16::from_be_bytes([data[after_strings], data[after_strings + 1]]);
        reply
            .port_types
            .copy_from_slice(&data[after_strings + 2..after_strings + 6]);
        reply
            .good_input
            .copy_from_slice(&data[after_strings + 6..after_strings + 10]);
        reply
            .good_output
            .copy_from_slice(&data[after_strings + 10..after_strings + 14]);
        reply
            .sw_in
            .copy_from_slice(&data[after_strings + 14..after_strings + 18]);
        reply
            .sw_out
            .copy_from_slice(&data[after_strings + 18..after_strings + 22]);

        // 6 reserved bytes (SwVideo, SwMacro, SwRemote, Spare1-3) then Style.
        let style_offset = after_strings + 22 + 6;
        if data.len() > style_offset {
            reply.style = data[style_offset];
        }
        let mac_offset = style_offset + 1;
        if data.len() >= mac_offset + 6 {
            reply.mac_address.copy_from_slice(&data[mac_offset..mac_offset + 6]);
        }
        let bind_ip_offset = mac_offset + 6;
        if data.len() >= bind_ip_offset + 4 {
            reply.bind_ip.copy_from_slice(&data[bind_ip_offset..bind_ip_offset + 4]);
        }
        let bind_index_offset = bind_ip_offset + 4;
        if data.len() > bind_index_offset {
            reply.bind_index = data[bind_index_offset];
        }
        let status2_offset = bind_index_offset + 1;
        if data.len() > status2_offset {
            reply.status2 = data[status2_offset];
        }

        Ok(reply)
    }

    pub(crate) fn encode_body(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.ip_address);
        out.extend_from_slice(&self.port.to_le_bytes());
        out.extend_from_slice(&self.version_info.to_be_bytes());
        out.push(self.net_switch);
        out.push(self.sub_switch);
        out.extend_from_slice(&self.oem.to_be_bytes());
        out.push(self.ubea_version);
        out.push(self.status1);
        out.extend_from_slice(&self.esta_manufacturer.to_le_bytes());
        put_padded_str(out, &self.short_name, SHORT_NAME_LEN);
        put_padded_str(out, &self.long_name, LONG_NAME_LEN);
        put_padded_str(out, &self.node_report, REPORT_LEN);
        out.extend_from_slice(&self.num_ports.to_be_bytes());
        out.extend_from_slice(&self.port_types);
        out.extend_from_slice(&self.good_input);
        out.extend_from_slice(&self.good_output);
        out.extend_from_slice(&self.sw_in);
        out.extend_from_slice(&self.sw_out);
        out.extend_from_slice(&[0u8; 6]); // SwVideo, SwMacro, SwRemote, Spare1-3
        out.push(self.style);
        out.extend_from_slice(&self.mac_address);
        out.extend_from_slice(&self.bind_ip);
        out.push(self.bind_index);
        out.push(self.status2);
        debug_assert_eq!(out.len() - 10, BODY_LEN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{decode, encode, Packet};

    fn sample() -> ArtPollReply {
        ArtPollReply {
            ip_address: [10, 0, 0, 5],
            port: super::super::ARTNET_PORT,
            net_switch: 0,
            sub_switch: 1,
            status1: 0xd2,
            short_name: "node".into(),
            long_name: "a long node name".into(),
            node_report: "#0001 [1] ok".into(),
            num_ports: 4,
            port_types: [0xc0, 0xc0, 0xc0, 0xc0],
            good_output: [0x80, 0, 0, 0],
            sw_out: [1, 2, 3, 4],
            style: 0,
            mac_address: [0, 1, 2, 3, 4, 5],
            bind_ip: [10, 0, 0, 5],
            status2: 0x08,
            ..Default::default()
        }
    }

    #[test]
    fn round_trips() {
        let reply = sample();
        let encoded = encode(&Packet::PollReply(Box::new(reply.clone())));
        match decode(&encoded).unwrap() {
            Packet::PollReply(decoded) => assert_eq!(*decoded, reply),
            other => panic!("expected PollReply, got {other:?}"),
        }
    }

    #[test]
    fn accepts_older_short_replies_without_bind_ip() {
        let reply = sample();
        let mut encoded = encode(&Packet::PollReply(Box::new(reply)));
        encoded.truncate(10 + 190);
        assert!(decode(&encoded).is_ok());
    }
}
