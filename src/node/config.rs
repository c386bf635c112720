//! Node-wide configuration.
//!
//! This has no reader or writer of its own — the node never loads or
//! persists a config file or any other state across restarts — but the
//! struct derives `Serialize`/`Deserialize` so a host application can still
//! round-trip it through whatever config store or IPC boundary it uses.

use serde::{Deserialize, Serialize};

use crate::timing::BROADCAST_THRESHOLD_DEFAULT;

/// Maximum length, including the terminating NUL, of an `ArtPollReply` short
/// name field.
pub const SHORT_NAME_MAX: usize = 17;
/// Maximum length, including the terminating NUL, of an `ArtPollReply` long
/// name field.
pub const LONG_NAME_MAX: usize = 63;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub short_name: String,
    pub long_name: String,
    /// 0..127; the high 7 bits of every universe address this node speaks on.
    pub net_address: u8,
    /// Default subnet nibble applied when a port's universe is configured
    /// with only a 4-bit universe value.
    pub subnet_address: u8,
    pub oem: u16,
    pub esta_manufacturer: u16,
    /// Subscriber count at which `send_dmx` switches to a single broadcast.
    pub broadcast_threshold: usize,
    pub always_broadcast: bool,
    pub use_limited_broadcast: bool,
    /// Emit an unsolicited `ArtPollReply` whenever a setter changes
    /// user-visible configuration while the node is running.
    pub send_reply_on_change: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            short_name: String::new(),
            long_name: String::new(),
            net_address: 0,
            subnet_address: 0,
            oem: 0,
            esta_manufacturer: 0,
            broadcast_threshold: BROADCAST_THRESHOLD_DEFAULT,
            always_broadcast: false,
            use_limited_broadcast: false,
            send_reply_on_change: true,
        }
    }
}

impl NodeConfig {
    pub fn set_short_name(&mut self, name: &str) {
        self.short_name = truncate(name, SHORT_NAME_MAX);
    }

    pub fn set_long_name(&mut self, name: &str) {
        self.long_name = truncate(name, LONG_NAME_MAX);
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    s.chars().take(max_len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_truncated_to_field_limits() {
        let mut config = NodeConfig::default();
        config.set_short_name(&"x".repeat(40));
        config.set_long_name(&"y".repeat(90));
        assert_eq!(config.short_name.len(), SHORT_NAME_MAX);
        assert_eq!(config.long_name.len(), LONG_NAME_MAX);
    }
}
