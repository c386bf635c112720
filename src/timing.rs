//! Timeouts and protocol constants shared across the node core and ports.

use std::time::Duration;

/// Number of input/output port slots the wire format's bind-index scheme
/// fixes at 4.
pub const ARTNET_MAX_PORTS: usize = 4;

/// Universe-address sentinel meaning "this port is not in use".
pub const ARTNET_DISABLE_PORT: u8 = 0xf0;

/// Default subscriber count at which `send_dmx` switches from per-subscriber
/// unicast to a single broadcast frame.
pub const BROADCAST_THRESHOLD_DEFAULT: usize = 30;

/// A subscriber entry older than this is treated as absent.
pub const NODE_TIMEOUT: Duration = Duration::from_secs(30);

/// A DMX merge source older than this no longer contributes to the merge.
pub const MERGE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for an RDM response before failing the request.
pub const RDM_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);

/// How long a TOD discovery session runs before it is force-released.
pub const RDM_TOD_TIMEOUT: Duration = Duration::from_millis(4000);

/// A UID missing from this many consecutive discovery rounds is evicted.
pub const RDM_MISSED_TODDATA_LIMIT: u8 = 3;
