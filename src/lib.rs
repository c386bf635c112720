//! An Art-Net node: a bidirectional UDP endpoint that transports DMX512
//! lighting control data and tunnels RDM (Remote Device Management) traffic
//! on a local IPv4 broadcast domain.
//!
//! [`node::Node`] is the entry point: it owns 4 [`port::InputPort`]s and 4
//! [`port::OutputPort`]s, decodes/encodes frames through [`wire`], and is
//! driven by anything implementing [`reactor::Reactor`] (a Tokio-backed one,
//! [`reactor::TokioReactor`], is provided). The generic DMX buffer
//! ([`dmx::DmxBuffer`]) and RDM command serializer ([`rdm::RdmCommandCodec`])
//! are treated as swappable collaborators, the way the node this crate is
//! modeled on treats its surrounding plugin framework and RDM controller as
//! external.

pub mod dmx;
pub mod error;
pub mod interface;
pub mod node;
pub mod port;
pub mod rdm;
pub mod reactor;
pub mod timing;
pub mod transport;
pub mod wire;

pub use dmx::DmxBuffer;
pub use error::{NodeError, RdmResponseCode, WireError};
pub use interface::Interface;
pub use node::{Node, NodeConfig};
pub use port::{InputPort, MergeMode, OutputPort};
pub use rdm::{CommandClass, RdmCommandCodec, RdmRequest, RdmResponse, Uid};
pub use reactor::{Reactor, TokioReactor};
pub use timing::ARTNET_MAX_PORTS;
pub use wire::ARTNET_PORT;
