//! Input-port logic (C4): source tracking, RDM request lifecycle, discovery.
//!
//! Every method here is a pure function of the port's own state — no socket
//! or reactor access. [`crate::node::NodeCore`] glues these decisions to
//! actual packet emission and timer registration, since only it holds the
//! interface address and the reactor handle.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::time::Instant;

use crate::error::RdmResponseCode;
use crate::rdm::{CommandClass, RdmRequest, RdmResponse, Uid, ALL_SUBDEVICES, PID_QUEUED_MESSAGE};
use crate::reactor::TimeoutId;
use crate::timing::{ARTNET_DISABLE_PORT, NODE_TIMEOUT};

type RdmCallback = Box<dyn FnOnce(RdmResponseCode, Option<RdmResponse>)>;
type TodCallback = Box<dyn FnMut(HashSet<Uid>)>;
type DiscoveryCallback = Box<dyn FnOnce(HashSet<Uid>)>;

/// What `send_dmx` should do once subscriber staleness has been accounted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DmxTargets {
    /// No subscribers and not in always-broadcast mode: nothing to send.
    Suppressed,
    /// Subscriber count crossed the broadcast threshold (or `always_broadcast`).
    Broadcast,
    /// Send one unicast frame per listed address.
    Unicast(Vec<Ipv4Addr>),
}

/// Outcome of attempting to begin an RDM request.
#[derive(Debug, Clone, Copy)]
pub enum RdmBeginResult {
    AwaitingResponse { destination: Ipv4Addr },
    ImmediateBroadcast { destination: Ipv4Addr },
    Failed(RdmResponseCode),
}

/// Outcome of entering the discovery state machine.
pub enum DiscoveryBegin {
    /// A discovery session was already running; its current UID set is handed
    /// back so the caller can deliver it synchronously to the new callback
    /// without disturbing the session in progress.
    AlreadyRunning(HashSet<Uid>),
    Started,
}

#[derive(Default)]
pub struct InputPort {
    pub universe_address: u8,
    pub enabled: bool,
    pub sequence_number: u8,
    subscribed_nodes: HashMap<Ipv4Addr, Instant>,
    uids: HashMap<Uid, (Ipv4Addr, u8)>,
    tod_callback: Option<TodCallback>,
    discovery_callback: Option<DiscoveryCallback>,
    pub(crate) discovery_timeout: Option<TimeoutId>,
    discovery_node_set: HashSet<Ipv4Addr>,
    rdm_request_callback: Option<RdmCallback>,
    pending_request: Option<RdmRequest>,
    rdm_ip_destination: Option<Ipv4Addr>,
    pub(crate) rdm_send_timeout: Option<TimeoutId>,
}

impl InputPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the port's universe. Disables the port when `universe`
    /// equals `ARTNET_DISABLE_PORT`.
    pub fn set_universe(&mut self, universe: u8) {
        self.universe_address = universe;
        self.enabled = universe != ARTNET_DISABLE_PORT;
    }

    fn prune_subscribers(&mut self, now: Instant) {
        self.subscribed_nodes
            .retain(|_, last_seen| now.duration_since(*last_seen) < NODE_TIMEOUT);
    }

    /// Records that `ip` advertised interest in this port's universe. Never
    /// records the node's own address (invariant 5).
    pub fn note_subscriber(&mut self, ip: Ipv4Addr, own_ip: Ipv4Addr, now: Instant) {
        if ip != own_ip {
            self.subscribed_nodes.insert(ip, now);
        }
    }

    /// The currently live subscriber set, pruned of stale entries.
    pub fn subscribed_nodes(&mut self, now: Instant) -> Vec<Ipv4Addr> {
        self.prune_subscribers(now);
        self.subscribed_nodes.keys().copied().collect()
    }

    pub fn set_tod_callback(&mut self, callback: TodCallback) {
        self.tod_callback = Some(callback);
    }

    fn current_uid_set(&self) -> HashSet<Uid> {
        self.uids.keys().copied().collect()
    }

    pub fn plan_dmx_targets(
        &mut self,
        now: Instant,
        broadcast_threshold: usize,
        always_broadcast: bool,
    ) -> DmxTargets {
        let subscribers = self.subscribed_nodes(now);
        if always_broadcast || subscribers.len() >= broadcast_threshold {
            DmxTargets::Broadcast
        } else if subscribers.is_empty() {
            DmxTargets::Suppressed
        } else {
            DmxTargets::Unicast(subscribers)
        }
    }

    pub fn bump_sequence(&mut self) {
        self.sequence_number = self.sequence_number.wrapping_add(1);
    }

    /// Attempt to begin an RDM request. Does not mutate state beyond what's
    /// necessary to report `FailedToSend` for a busy/disabled port; the
    /// caller stores the pending-request bookkeeping via
    /// [`Self::store_pending_request`] only for the `AwaitingResponse` case.
    pub fn begin_rdm_request(&self, request: &RdmRequest, bcast_addr: Ipv4Addr) -> RdmBeginResult {
        if request.command_class == CommandClass::DiscoverCommand {
            return RdmBeginResult::Failed(RdmResponseCode::PluginDiscoveryNotSupported);
        }
        if !self.enabled || self.pending_request.is_some() {
            return RdmBeginResult::Failed(RdmResponseCode::FailedToSend);
        }
        let destination = self
            .uids
            .get(&request.destination_uid)
            .map(|(ip, _)| *ip)
            .unwrap_or(bcast_addr);
        if request.destination_uid.is_broadcast() {
            RdmBeginResult::ImmediateBroadcast { destination }
        } else {
            RdmBeginResult::AwaitingResponse { destination }
        }
    }

    pub fn store_pending_request(
        &mut self,
        request: RdmRequest,
        destination: Ipv4Addr,
        callback: RdmCallback,
        timeout_id: TimeoutId,
    ) {
        self.pending_request = Some(request);
        self.rdm_ip_destination = Some(destination);
        self.rdm_request_callback = Some(callback);
        self.rdm_send_timeout = Some(timeout_id);
    }

    /// True iff `response` satisfies every correlation rule in §4.4 against
    /// the currently pending request.
    pub fn try_match_response(&self, response: &RdmResponse, source_ip: Ipv4Addr, bcast_addr: Ipv4Addr) -> bool {
        let pending = match &self.pending_request {
            Some(p) => p,
            None => return false,
        };
        if pending.source_uid != response.destination_uid || pending.destination_uid != response.source_uid {
            return false;
        }
        let relaxed = pending.param_id == PID_QUEUED_MESSAGE;
        if !relaxed {
            if pending.param_id != response.param_id {
                return false;
            }
            if pending.sub_device != response.sub_device && pending.sub_device != ALL_SUBDEVICES {
                return false;
            }
            let expected = match pending.command_class {
                CommandClass::GetCommand => CommandClass::GetCommandResponse,
                CommandClass::SetCommand => CommandClass::SetCommandResponse,
                _ => return false,
            };
            if response.command_class != expected {
                return false;
            }
        }
        match self.rdm_ip_destination {
            Some(dest) => dest == source_ip || dest == bcast_addr,
            None => false,
        }
    }

    /// Clears pending-request state and hands back the stored callback for
    /// the caller to invoke (and to cancel the reactor timeout with, using
    /// the id returned alongside).
    pub fn complete_pending(&mut self) -> (Option<RdmCallback>, Option<TimeoutId>) {
        self.pending_request = None;
        self.rdm_ip_destination = None;
        let timeout_id = self.rdm_send_timeout.take();
        (self.rdm_request_callback.take(), timeout_id)
    }

    pub fn has_pending_request(&self) -> bool {
        self.pending_request.is_some()
    }

    pub fn begin_discovery(&mut self, now: Instant) -> DiscoveryBegin {
        if self.discovery_callback.is_some() {
            return DiscoveryBegin::AlreadyRunning(self.current_uid_set());
        }
        for (_, missed) in self.uids.values_mut() {
            *missed += 1;
        }
        self.discovery_node_set = self.subscribed_nodes(now).into_iter().collect();
        DiscoveryBegin::Started
    }

    pub fn store_discovery(&mut self, callback: DiscoveryCallback, timeout_id: TimeoutId) {
        self.discovery_callback = Some(callback);
        self.discovery_timeout = Some(timeout_id);
    }

    pub fn discovery_active(&self) -> bool {
        self.discovery_callback.is_some()
    }

    /// Upserts every UID in an inbound `ArtTodData` fragment; on a
    /// single-block fragment (`uid_count >= uid_total`), evicts any
    /// previously-known UID from `source_ip` that's absent from this
    /// fragment. Runs whether or not a discovery session is active — it's
    /// the table maintenance the spec calls "Collection", shared with the
    /// unsolicited-TOD path.
    pub fn ingest_tod_data(&mut self, source_ip: Ipv4Addr, uid_total: u16, uids: &[Uid]) {
        for uid in uids {
            self.uids
                .entry(*uid)
                .and_modify(|(ip, missed)| {
                    *ip = source_ip;
                    *missed = 0;
                })
                .or_insert((source_ip, 0));
        }
        if uids.len() as u16 >= uid_total {
            let present: HashSet<Uid> = uids.iter().copied().collect();
            self.uids
                .retain(|uid, (ip, _)| *ip != source_ip || present.contains(uid));
        }
    }

    /// Records that `source_ip` finished answering this discovery round
    /// (single-block fragment received); returns true once every node in
    /// `discovery_node_set` has reported in.
    pub fn note_discovery_source_done(&mut self, source_ip: Ipv4Addr) -> bool {
        self.discovery_node_set.remove(&source_ip);
        self.discovery_node_set.is_empty()
    }

    /// Deletes UIDs that have aged past `RDM_MISSED_TODDATA_LIMIT`, clears
    /// session state, and returns `(callback, final uid set)` for the caller
    /// to invoke.
    pub fn release_discovery(&mut self) -> (Option<DiscoveryCallback>, HashSet<Uid>) {
        self.uids
            .retain(|_, (_, missed)| *missed < crate::timing::RDM_MISSED_TODDATA_LIMIT);
        self.discovery_node_set.clear();
        self.discovery_timeout = None;
        (self.discovery_callback.take(), self.current_uid_set())
    }

    /// Delivers the current full UID set to the unsolicited-TOD handler, if
    /// one is registered. Only meaningful while no discovery is active.
    pub fn notify_unsolicited_tod(&mut self) {
        let set = self.current_uid_set();
        if let Some(cb) = &mut self.tod_callback {
            cb(set);
        }
    }

    pub fn uid_count(&self) -> usize {
        self.uids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn uid(n: u32) -> Uid {
        Uid::new(0x4850, n)
    }

    #[test]
    fn disabled_port_sets_from_sentinel_universe() {
        let mut port = InputPort::new();
        port.set_universe(0x05);
        assert!(port.enabled);
        port.set_universe(ARTNET_DISABLE_PORT);
        assert!(!port.enabled);
    }

    #[test]
    fn broadcast_threshold_selects_broadcast_plan() {
        let mut port = InputPort::new();
        let now = Instant::now();
        port.note_subscriber(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::UNSPECIFIED, now);
        assert_eq!(port.plan_dmx_targets(now, 1, false), DmxTargets::Broadcast);
    }

    #[test]
    fn below_threshold_unicasts_to_each_subscriber() {
        let mut port = InputPort::new();
        let now = Instant::now();
        port.note_subscriber(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::UNSPECIFIED, now);
        port.note_subscriber(Ipv4Addr::new(10, 0, 0, 3), Ipv4Addr::UNSPECIFIED, now);
        match port.plan_dmx_targets(now, 30, false) {
            DmxTargets::Unicast(mut ips) => {
                ips.sort();
                assert_eq!(
                    ips,
                    vec![Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::new(10, 0, 0, 3)]
                );
            }
            other => panic!("expected Unicast, got {other:?}"),
        }
    }

    #[test]
    fn no_subscribers_suppresses_send() {
        let mut port = InputPort::new();
        let now = Instant::now();
        assert_eq!(port.plan_dmx_targets(now, 30, false), DmxTargets::Suppressed);
    }

    #[test]
    fn never_subscribes_own_address() {
        let mut port = InputPort::new();
        let now = Instant::now();
        let own = Ipv4Addr::new(10, 0, 0, 1);
        port.note_subscriber(own, own, now);
        assert!(port.subscribed_nodes(now).is_empty());
    }

    #[test]
    fn stale_subscribers_are_pruned() {
        let mut port = InputPort::new();
        let past = Instant::now() - Duration::from_secs(31);
        port.note_subscriber(Ipv4Addr::new(10, 0, 0, 2), Ipv4Addr::UNSPECIFIED, past);
        assert!(port.subscribed_nodes(Instant::now()).is_empty());
    }

    #[test]
    fn single_block_tod_evicts_missing_uids_from_same_source() {
        let mut port = InputPort::new();
        let src = Ipv4Addr::new(10, 0, 0, 2);
        port.ingest_tod_data(src, 2, &[uid(1), uid(2)]);
        assert_eq!(port.uid_count(), 2);
        // Next discovery round, same source now only reports one uid.
        port.ingest_tod_data(src, 1, &[uid(1)]);
        assert_eq!(port.uid_count(), 1);
    }

    #[test]
    fn discovery_increments_missed_count_before_collection() {
        let mut port = InputPort::new();
        let src = Ipv4Addr::new(10, 0, 0, 2);
        port.ingest_tod_data(src, 1, &[uid(1)]);
        let now = Instant::now();
        match port.begin_discovery(now) {
            DiscoveryBegin::Started => {}
            _ => panic!("expected Started"),
        }
        // Missed count incremented to 1; still far from the eviction limit.
        let (_, set) = port.release_discovery();
        assert!(set.contains(&uid(1)));
    }

    #[test]
    fn uid_aged_past_limit_is_evicted_on_release() {
        let mut port = InputPort::new();
        let src = Ipv4Addr::new(10, 0, 0, 2);
        port.ingest_tod_data(src, 1, &[uid(1)]);
        for _ in 0..crate::timing::RDM_MISSED_TODDATA_LIMIT {
            port.begin_discovery(Instant::now());
            port.release_discovery();
        }
        let (_, set) = port.release_discovery();
        assert!(!set.contains(&uid(1)));
    }
}
