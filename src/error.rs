//! Error taxonomy for the Art-Net node.
//!
//! Most errors here are local to a single datagram or a single RDM
//! transaction; they never propagate as a hard failure of the node itself.
//! Only [`NodeError::NetworkUnavailable`] can fail a node's `start`.

use thiserror::Error;

/// Failures that can occur while decoding a datagram off the wire.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum WireError {
    #[error("packet too short: got {actual} bytes, need at least {expected}")]
    TooShort { actual: usize, expected: usize },

    #[error("missing or corrupt \"Art-Net\\0\" id prefix")]
    BadId,

    #[error("unknown or unsupported opcode 0x{0:04x}")]
    UnknownOpCode(u16),

    #[error("declared sub-length {declared} exceeds datagram size {available}")]
    LengthOverflow { declared: usize, available: usize },
}

/// Errors surfaced by the node core.
#[derive(Debug, Error)]
pub enum NodeError {
    /// A received datagram failed to parse. Always handled by logging and
    /// dropping the datagram; never propagated to a caller.
    #[error("malformed packet: {0}")]
    MalformedPacket(#[from] WireError),

    /// A received packet declared a protocol version other than
    /// [`crate::wire::ARTNET_VERSION`].
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u16),

    /// A received packet's `net` field didn't match this node's configured
    /// net address.
    #[error("net mismatch: packet net {packet_net} != node net {node_net}")]
    NetMismatch { packet_net: u8, node_net: u8 },

    /// The UDP socket could not be bound or configured for broadcast.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(#[from] std::io::Error),

    /// `port_id` was outside `0..ARTNET_MAX_PORTS`.
    #[error("port index {0} out of bounds")]
    InvalidPortId(u8),

    /// The named port is not enabled for the requested operation.
    #[error("port {port} is not enabled for {action}")]
    PortDisabled { port: u8, action: &'static str },
}

/// The outcome of a single RDM request/response transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdmResponseCode {
    /// A correctly matched response was received.
    CompletedOk,
    /// No response arrived within `RDM_REQUEST_TIMEOUT_MS`.
    Timeout,
    /// The request could not be put on the wire at all.
    FailedToSend,
    /// The destination UID was a broadcast address; no response will arrive.
    WasBroadcast,
    /// The request used the `DISCOVER_COMMAND` class, which Art-Net does not
    /// tunnel (it has its own TOD-based discovery instead).
    PluginDiscoveryNotSupported,
    /// The output-port responder reported that it no longer owns the
    /// destination UID.
    UnknownUid,
}
