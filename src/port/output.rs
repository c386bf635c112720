//! Output-port logic (C5): multi-source DMX merging, RDM handler dispatch.

use std::net::Ipv4Addr;
use std::time::Instant;

use crate::dmx::DmxBuffer;
use crate::error::RdmResponseCode;
use crate::port::MergeMode;
use crate::rdm::{RdmRequest, RdmResponse};
use crate::timing::{ARTNET_DISABLE_PORT, MERGE_TIMEOUT};

/// One slot of a 2-source merge buffer. `address == None` means empty.
#[derive(Debug, Clone)]
pub struct DmxSource {
    pub address: Option<Ipv4Addr>,
    pub timestamp: Instant,
    pub buffer: DmxBuffer,
}

impl Default for DmxSource {
    fn default() -> Self {
        Self {
            address: None,
            timestamp: Instant::now(),
            buffer: DmxBuffer::new(),
        }
    }
}

/// Maximum concurrent DMX sources a single output port merges.
pub const MAX_MERGE_SOURCES: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Neither an existing slot nor a free slot was available.
    Dropped,
    Applied { became_merging: bool },
}

/// Bound to the source IP, port id, and universe in effect when an RDM
/// request arrived, so a late completion can detect a universe
/// reconfiguration and drop its response instead of misdelivering it.
pub struct RdmCompletionContext {
    pub source_ip: Ipv4Addr,
    pub port_id: usize,
    pub universe_at_submit: u8,
}

type RdmRequestHandler = Box<dyn FnMut(RdmRequest, RdmCompletionContext)>;

#[derive(Default)]
pub struct OutputPort {
    pub universe_address: u8,
    pub enabled: bool,
    pub merge_mode: MergeMode,
    pub is_merging: bool,
    sources: [DmxSource; MAX_MERGE_SOURCES],
    on_data: Option<Box<dyn FnMut()>>,
    on_flush: Option<Box<dyn FnMut()>>,
    on_discover: Option<Box<dyn FnMut()>>,
    on_rdm_request: Option<RdmRequestHandler>,
}

impl OutputPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_universe(&mut self, universe: u8) {
        self.universe_address = universe;
        self.enabled = universe != ARTNET_DISABLE_PORT;
        self.sources = Default::default();
        self.is_merging = false;
    }

    pub fn set_dmx_handler(&mut self, on_data: Box<dyn FnMut()>) {
        self.on_data = Some(on_data);
    }

    pub fn set_output_rdm_handlers(
        &mut self,
        on_discover: Box<dyn FnMut()>,
        on_flush: Box<dyn FnMut()>,
        on_rdm_request: RdmRequestHandler,
    ) {
        self.on_discover = Some(on_discover);
        self.on_flush = Some(on_flush);
        self.on_rdm_request = Some(on_rdm_request);
    }

    /// The merge core (§4.5 step 1-4): locates or assigns a source slot,
    /// expiring stale ones along the way, and updates `is_merging`. Does
    /// *not* touch the externally-owned output buffer — the caller performs
    /// the HTP/LTP fold using [`Self::active_sources`] after this returns.
    pub fn update_from_source(&mut self, now: Instant, source_ip: Ipv4Addr, data: &[u8]) -> UpdateOutcome {
        let mut source_slot = None;
        let mut first_empty = None;
        let mut other_active = 0usize;

        for (i, slot) in self.sources.iter_mut().enumerate() {
            if slot.address.is_some() && now.duration_since(slot.timestamp) >= MERGE_TIMEOUT {
                slot.address = None;
            }
            match slot.address {
                Some(addr) if addr == source_ip => source_slot = Some(i),
                Some(_) => other_active += 1,
                None => {
                    if first_empty.is_none() {
                        first_empty = Some(i);
                    }
                }
            }
        }

        let slot_idx = match source_slot.or(first_empty) {
            Some(i) => i,
            None => {
                self.is_merging = other_active >= 2;
                return UpdateOutcome::Dropped;
            }
        };

        let was_merging = self.is_merging;
        self.is_merging = other_active + 1 >= 2;
        self.sources[slot_idx] = DmxSource {
            address: Some(source_ip),
            timestamp: now,
            buffer: DmxBuffer::from_slice(data),
        };

        UpdateOutcome::Applied {
            became_merging: !was_merging && self.is_merging,
        }
    }

    /// Buffers of every slot still considered active, in slot order.
    pub fn active_sources(&self) -> impl Iterator<Item = &DmxBuffer> {
        self.sources.iter().filter(|s| s.address.is_some()).map(|s| &s.buffer)
    }

    /// Takes the `on_data` callback out of the port so the caller can invoke
    /// it after releasing any borrow on the surrounding node state — a
    /// handler that calls back into the node (e.g. `send_dmx`) would
    /// otherwise hit an `already borrowed` panic. Restore it with
    /// [`Self::restore_on_data`] once the callback returns.
    pub fn take_on_data(&mut self) -> Option<Box<dyn FnMut()>> {
        self.on_data.take()
    }

    pub fn restore_on_data(&mut self, cb: Box<dyn FnMut()>) {
        self.on_data = Some(cb);
    }

    pub fn take_on_flush(&mut self) -> Option<Box<dyn FnMut()>> {
        self.on_flush.take()
    }

    pub fn restore_on_flush(&mut self, cb: Box<dyn FnMut()>) {
        self.on_flush = Some(cb);
    }

    pub fn take_on_discover(&mut self) -> Option<Box<dyn FnMut()>> {
        self.on_discover.take()
    }

    pub fn restore_on_discover(&mut self, cb: Box<dyn FnMut()>) {
        self.on_discover = Some(cb);
    }

    pub fn take_on_rdm_request(&mut self) -> Option<RdmRequestHandler> {
        self.on_rdm_request.take()
    }

    pub fn restore_on_rdm_request(&mut self, cb: RdmRequestHandler) {
        self.on_rdm_request = Some(cb);
    }
}

/// Splits a UID set into ≤200-UID fragments for `ArtTodData`, returning
/// `(fragment, block_count)` pairs. `block_count` is the Art-Net convention
/// of "how many more blocks follow this one".
pub fn fragment_tod(uids: &[crate::rdm::Uid]) -> Vec<(Vec<crate::rdm::Uid>, u8)> {
    use crate::wire::MAX_UIDS_PER_TOD_BLOCK;

    if uids.is_empty() {
        return vec![(Vec::new(), 0)];
    }
    let chunks: Vec<&[crate::rdm::Uid]> = uids.chunks(MAX_UIDS_PER_TOD_BLOCK).collect();
    let total = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| (chunk.to_vec(), (total - 1 - i) as u8))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_source_does_not_merge() {
        let mut port = OutputPort::new();
        let now = Instant::now();
        let outcome = port.update_from_source(now, Ipv4Addr::new(10, 0, 0, 2), &[1, 2, 3]);
        assert_eq!(outcome, UpdateOutcome::Applied { became_merging: false });
        assert!(!port.is_merging);
    }

    #[test]
    fn second_source_transitions_into_merging() {
        let mut port = OutputPort::new();
        let now = Instant::now();
        port.update_from_source(now, Ipv4Addr::new(10, 0, 0, 2), &[1]);
        let outcome = port.update_from_source(now, Ipv4Addr::new(10, 0, 0, 3), &[2]);
        assert_eq!(outcome, UpdateOutcome::Applied { became_merging: true });
        assert!(port.is_merging);
    }

    #[test]
    fn third_source_is_dropped_when_no_slot_free() {
        let mut port = OutputPort::new();
        let now = Instant::now();
        port.update_from_source(now, Ipv4Addr::new(10, 0, 0, 2), &[1]);
        port.update_from_source(now, Ipv4Addr::new(10, 0, 0, 3), &[2]);
        let outcome = port.update_from_source(now, Ipv4Addr::new(10, 0, 0, 4), &[3]);
        assert_eq!(outcome, UpdateOutcome::Dropped);
    }

    #[test]
    fn stale_source_expires_and_is_no_longer_merging() {
        use std::time::Duration;
        let mut port = OutputPort::new();
        let t0 = Instant::now();
        port.update_from_source(t0, Ipv4Addr::new(10, 0, 0, 2), &[1]);
        port.update_from_source(t0, Ipv4Addr::new(10, 0, 0, 3), &[2]);
        assert!(port.is_merging);

        let later = t0 + Duration::from_secs(11);
        // Re-touch source 2; source 3 should have expired by now.
        let outcome = port.update_from_source(later, Ipv4Addr::new(10, 0, 0, 2), &[9]);
        assert_eq!(outcome, UpdateOutcome::Applied { became_merging: false });
        assert!(!port.is_merging);
    }

    #[test]
    fn reconfiguring_universe_evicts_stale_sources() {
        let mut port = OutputPort::new();
        let now = Instant::now();
        port.update_from_source(now, Ipv4Addr::new(10, 0, 0, 2), &[1]);
        port.update_from_source(now, Ipv4Addr::new(10, 0, 0, 3), &[2]);
        assert!(port.is_merging);

        port.set_universe(5);
        assert!(!port.is_merging);
        assert_eq!(port.active_sources().count(), 0);

        // A source from the old universe re-arriving starts fresh, not merged.
        let outcome = port.update_from_source(now, Ipv4Addr::new(10, 0, 0, 2), &[9]);
        assert_eq!(outcome, UpdateOutcome::Applied { became_merging: false });
    }

    #[test]
    fn fragments_large_uid_sets_at_200() {
        let uids: Vec<crate::rdm::Uid> = (0..450u32).map(|n| crate::rdm::Uid::new(0x4850, n)).collect();
        let fragments = fragment_tod(&uids);
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].1, 2);
        assert_eq!(fragments[2].1, 0);
    }
}
