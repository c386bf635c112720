//! Minimal standalone demonstration of wiring up a [`Node`]: detects the
//! primary network interface, enables one input and one output port, and
//! logs every merged DMX update until interrupted.
//!
//! Run with `cargo run --bin artnet-node-demo`.

use std::cell::RefCell;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

use anyhow::Context;

use artnet_node::dmx::DmxBuffer;
use artnet_node::interface::detect_primary_interface;
use artnet_node::node::{Node, NodeConfig};
use artnet_node::rdm::NullCodec;
use artnet_node::reactor::TokioReactor;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let local = tokio::task::LocalSet::new();
    local.run_until(run()).await
}

async fn run() -> anyhow::Result<()> {
    let interface = detect_primary_interface().context("detecting local network interface")?;
    log::info!("binding on {}", interface.ip_address);

    let mut config = NodeConfig::default();
    config.set_short_name("demo-node");
    config.set_long_name("artnet-node demo binary");

    let node = Node::new(interface, config, TokioReactor::new(), Box::new(NullCodec));
    node.start(Ipv4Addr::UNSPECIFIED)
        .await
        .context("starting node")?;

    node.set_input_universe(0, 0x00).await?;
    node.set_output_universe(0, 0x00).await?;

    let buffer = Rc::new(RefCell::new(DmxBuffer::new()));
    let printable = Rc::clone(&buffer);
    node.set_dmx_handler(
        0,
        Rc::clone(&buffer),
        Box::new(move || {
            log::info!("port 0 merged buffer: {:?}", printable.borrow().as_slice());
        }),
    )?;

    let mut ticker = tokio::time::interval(Duration::from_secs(10));
    loop {
        ticker.tick().await;
        node.send_poll().await;
    }
}
