//! The gossip engine: socket loops, liveness tracking, event delivery.
//!
//! One [`Membership`] instance per process.  `start` binds the UDP
//! socket and spawns two tasks:
//!
//! 1. **Receive loop** — decodes datagrams and applies them to the
//!    member table.  A malformed datagram is logged and skipped; the
//!    loop never dies on bad input.
//! 2. **Gossip ticker** — every `gossip_interval` sends the full member
//!    table to a few random peers (anti-entropy) and runs the silence
//!    based failure detector (alive → suspect → failed → reaped).
//!
//! Liveness is refreshed only by datagrams received *from* a member
//! itself (sync, join, user event); second-hand gossip about a node
//! never counts as hearing from it.  `suspect_timeout` should therefore
//! comfortably exceed `gossip_interval × cluster_size / fanout`.

use {
    crate::{
        config::MembershipConfig,
        error::{MembershipError, Result},
        member::{GossipMessage, Member, MemberStatus, UserEventFrame},
    },
    log::{debug, info, warn},
    rand::seq::SliceRandom,
    std::{
        collections::{hash_map::Entry, HashMap, HashSet, VecDeque},
        net::SocketAddr,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc, Mutex,
        },
        time::{Duration, Instant, SystemTime, UNIX_EPOCH},
    },
    tokio::{net::UdpSocket, sync::mpsc, time},
    tokio_util::sync::CancellationToken,
};

/// Bound on the remembered (origin, seq) pairs used for user-event
/// dedup.
const SEEN_EVENTS_CAP: usize = 1_024;

/// A user event as delivered to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct UserEvent {
    pub name: String,
    pub payload: Vec<u8>,
}

/// Asynchronous membership events, delivered on a single channel.
#[derive(Debug, Clone)]
pub enum MemberEvent {
    /// A member joined (or rejoined) the cluster.
    Join(Member),
    /// A member left gracefully.
    Leave(Member),
    /// A member was declared dead by the failure detector.
    Failed(Member),
    /// A member's state changed without joining or leaving (suspicion,
    /// recovery, tag refresh).
    Update(Member),
    /// A disseminated user event.
    User(UserEvent),
}

struct MemberRecord {
    member: Member,
    last_heard: Instant,
}

#[derive(Default)]
struct GossipState {
    members: HashMap<String, MemberRecord>,
    /// Dedup of user events: remembered (origin, seq) pairs.
    seen_events: HashSet<(String, u64)>,
    seen_order: VecDeque<(String, u64)>,
    /// Highest seq delivered per (origin, event name); consulted only
    /// for coalescable events.
    coalesce_high: HashMap<(String, String), u64>,
}

/// Gossip-based cluster membership handle.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct Membership {
    config: MembershipConfig,
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    state: Arc<Mutex<GossipState>>,
    event_tx: mpsc::Sender<MemberEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<MemberEvent>>>,
    user_event_seq: AtomicU64,
    cancel: CancellationToken,
}

impl Membership {
    /// Bind the gossip socket and start the receive and ticker tasks.
    pub async fn start(config: MembershipConfig, cancel: CancellationToken) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(&config.bind_addr)
            .await
            .map_err(|source| MembershipError::Bind {
                addr: config.bind_addr.clone(),
                source,
            })?;
        let local_addr = socket.local_addr()?;
        info!("[{}] gossip listening on {}", config.node_name, local_addr);

        let (event_tx, event_rx) = mpsc::channel(config.event_channel_size);

        let local = Member {
            name: config.node_name.clone(),
            addr: local_addr,
            tags: config.tags.clone(),
            status: MemberStatus::Alive,
            incarnation: unix_millis(),
        };

        let mut state = GossipState::default();
        state.members.insert(
            local.name.clone(),
            MemberRecord {
                member: local.clone(),
                last_heard: Instant::now(),
            },
        );

        let membership = Arc::new(Self {
            config,
            socket: Arc::new(socket),
            local_addr,
            state: Arc::new(Mutex::new(state)),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
            user_event_seq: AtomicU64::new(0),
            cancel,
        });

        // The local member's own join is delivered like any other.
        membership.deliver(MemberEvent::Join(local)).await;

        let recv = membership.clone();
        tokio::spawn(async move { recv.receive_loop().await });
        let tick = membership.clone();
        tokio::spawn(async move { tick.gossip_loop().await });

        Ok(membership)
    }

    /// The address the gossip socket actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// This node's current member record.
    pub fn local_member(&self) -> Member {
        let state = self.state.lock().expect("membership lock poisoned");
        state.members[&self.config.node_name].member.clone()
    }

    /// Snapshot of all known members, the local node included.
    pub fn members(&self) -> Vec<Member> {
        let state = self.state.lock().expect("membership lock poisoned");
        state.members.values().map(|r| r.member.clone()).collect()
    }

    /// Take the event receiver.  Yields `Some` exactly once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<MemberEvent>> {
        self.event_rx.lock().expect("membership lock poisoned").take()
    }

    /// Dial the given seeds and wait until at least one other member is
    /// known.  Fatal when no seed answers within the join timeout.
    pub async fn join(&self, seeds: &[String]) -> Result<usize> {
        let hello = GossipMessage::Join(self.local_member()).serialize()?;
        let mut reached_any = false;
        for seed in seeds {
            match tokio::net::lookup_host(seed.as_str()).await {
                Ok(mut addrs) => {
                    if let Some(addr) = addrs.next() {
                        if let Err(err) = self.socket.send_to(&hello, addr).await {
                            warn!("[{}] join datagram to {seed} failed: {err}", self.name());
                        } else {
                            reached_any = true;
                        }
                    }
                }
                Err(err) => warn!("[{}] cannot resolve seed {seed}: {err}", self.name()),
            }
        }
        if !reached_any {
            return Err(MembershipError::JoinFailed(seeds.to_vec()));
        }

        let deadline = Duration::from_millis(self.config.join_timeout_ms);
        let waited = time::timeout(deadline, async {
            loop {
                if self.member_count() > 1 {
                    return;
                }
                time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        match waited {
            Ok(()) => Ok(self.member_count()),
            Err(_) => Err(MembershipError::JoinFailed(seeds.to_vec())),
        }
    }

    /// Best-effort dissemination of a named payload to every member.
    ///
    /// The event is also looped back locally: the emitter hears its own
    /// events, like everyone else.
    pub async fn emit_user_event(
        &self,
        name: &str,
        payload: Vec<u8>,
        coalesce: bool,
    ) -> Result<()> {
        if payload.len() > self.config.max_user_event_bytes {
            return Err(MembershipError::UserEventTooLarge {
                name: name.to_string(),
                size: payload.len(),
                max: self.config.max_user_event_bytes,
            });
        }

        let frame = UserEventFrame {
            origin: self.name().to_string(),
            seq: self.user_event_seq.fetch_add(1, Ordering::Relaxed),
            name: name.to_string(),
            payload,
            coalesce,
        };
        let bytes = GossipMessage::UserEvent(frame.clone()).serialize()?;

        let targets: Vec<SocketAddr> = {
            let state = self.state.lock().expect("membership lock poisoned");
            state
                .members
                .values()
                .filter(|r| {
                    r.member.name != self.name() && r.member.status <= MemberStatus::Suspect
                })
                .map(|r| r.member.addr)
                .collect()
        };

        for addr in targets {
            if let Err(err) = self.socket.send_to(&bytes, addr).await {
                warn!("[{}] user event '{name}' to {addr} failed: {err}", self.name());
            }
        }

        self.mark_event_seen(&frame);
        self.deliver(MemberEvent::User(UserEvent {
            name: frame.name,
            payload: frame.payload,
        }))
        .await;
        Ok(())
    }

    /// Announce departure to every member and stop both loops.
    pub async fn leave(&self) {
        let bytes = match (GossipMessage::Leave {
            name: self.name().to_string(),
        })
        .serialize()
        {
            Ok(b) => b,
            Err(err) => {
                warn!("[{}] cannot encode leave: {err}", self.name());
                self.cancel.cancel();
                return;
            }
        };
        let targets: Vec<SocketAddr> = {
            let state = self.state.lock().expect("membership lock poisoned");
            state
                .members
                .values()
                .filter(|r| r.member.name != self.name())
                .map(|r| r.member.addr)
                .collect()
        };
        for addr in targets {
            let _ = self.socket.send_to(&bytes, addr).await;
        }
        info!("[{}] left the cluster", self.name());
        self.cancel.cancel();
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn name(&self) -> &str {
        &self.config.node_name
    }

    fn member_count(&self) -> usize {
        let state = self.state.lock().expect("membership lock poisoned");
        state.members.len()
    }

    async fn deliver(&self, event: MemberEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("[{}] event receiver dropped", self.name());
        }
    }

    async fn receive_loop(&self) {
        let mut buf = vec![0u8; self.config.max_datagram_bytes];
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => self.handle_datagram(&buf[..len], from).await,
                    Err(err) => warn!("[{}] gossip recv error: {err}", self.name()),
                },
            }
        }
        debug!("[{}] gossip receive loop stopped", self.name());
    }

    async fn handle_datagram(&self, data: &[u8], from: SocketAddr) {
        let msg = match GossipMessage::deserialize(data) {
            Ok(msg) => msg,
            Err(err) => {
                warn!("[{}] undecodable datagram from {from}: {err}", self.name());
                return;
            }
        };
        debug!("[{}] {} from {from}", self.name(), msg.kind());

        match msg {
            GossipMessage::Join(member) => {
                let events = self.apply_member(member, true);
                for event in events {
                    self.deliver(event).await;
                }
                // Answer with our member table so the joiner learns the
                // whole cluster in one round trip.
                let snapshot = GossipMessage::JoinAck {
                    members: self.members(),
                };
                match snapshot.serialize() {
                    Ok(bytes) => {
                        if let Err(err) = self.socket.send_to(&bytes, from).await {
                            warn!("[{}] join ack to {from} failed: {err}", self.name());
                        }
                    }
                    Err(err) => warn!("[{}] cannot encode join ack: {err}", self.name()),
                }
            }
            GossipMessage::JoinAck { members } => {
                for member in members {
                    for event in self.apply_member(member, false) {
                        self.deliver(event).await;
                    }
                }
            }
            GossipMessage::Sync { from: sender, members } => {
                self.refresh_liveness(&sender);
                for member in members {
                    let direct = member.name == sender;
                    for event in self.apply_member(member, direct) {
                        self.deliver(event).await;
                    }
                }
            }
            GossipMessage::Leave { name } => {
                let event = {
                    let mut state = self.state.lock().expect("membership lock poisoned");
                    state.members.get_mut(&name).and_then(|rec| {
                        if rec.member.status != MemberStatus::Left {
                            rec.member.status = MemberStatus::Left;
                            Some(MemberEvent::Leave(rec.member.clone()))
                        } else {
                            None
                        }
                    })
                };
                if let Some(event) = event {
                    info!("[{}] member {name} left", self.name());
                    self.deliver(event).await;
                }
            }
            GossipMessage::UserEvent(frame) => {
                self.refresh_liveness(&frame.origin);
                if !self.mark_event_seen(&frame) {
                    return;
                }
                self.deliver(MemberEvent::User(UserEvent {
                    name: frame.name,
                    payload: frame.payload,
                }))
                .await;
            }
        }
    }

    /// Merge one incoming member view, returning the events it implies.
    ///
    /// `direct` marks datagrams received from the member itself, which
    /// refresh its liveness; second-hand views never do.
    fn apply_member(&self, incoming: Member, direct: bool) -> Vec<MemberEvent> {
        let mut events = Vec::new();
        let mut state = self.state.lock().expect("membership lock poisoned");

        if incoming.name == self.name() {
            // Refute rumours of our own demise: outlive the rumour's
            // incarnation and gossip ourselves alive again.
            let rec = state
                .members
                .get_mut(self.name())
                .expect("local member present");
            if incoming.status > MemberStatus::Alive
                && incoming.incarnation >= rec.member.incarnation
            {
                rec.member.incarnation = incoming.incarnation + 1;
                rec.member.status = MemberStatus::Alive;
                debug!(
                    "[{}] refuted {:?} rumour, incarnation now {}",
                    self.config.node_name, incoming.status, rec.member.incarnation
                );
            }
            return events;
        }

        match state.members.entry(incoming.name.clone()) {
            Entry::Occupied(mut entry) => {
                let rec = entry.get_mut();
                let before = rec.member.status;
                let mut changed = rec.member.merge(&incoming);
                if direct {
                    rec.last_heard = Instant::now();
                    // Hearing from a suspect directly clears the
                    // suspicion.
                    if rec.member.status == MemberStatus::Suspect {
                        rec.member.status = MemberStatus::Alive;
                        changed = true;
                    }
                }
                if changed {
                    let after = rec.member.clone();
                    events.push(match after.status {
                        MemberStatus::Alive if before >= MemberStatus::Failed => {
                            MemberEvent::Join(after)
                        }
                        MemberStatus::Alive | MemberStatus::Suspect => MemberEvent::Update(after),
                        MemberStatus::Failed => MemberEvent::Failed(after),
                        MemberStatus::Left => MemberEvent::Leave(after),
                    });
                }
            }
            Entry::Vacant(entry) => {
                let status = incoming.status;
                info!(
                    "[{}] learned member {} ({status:?})",
                    self.config.node_name, incoming.name
                );
                events.push(MemberEvent::Join(incoming.clone()));
                match status {
                    MemberStatus::Failed => events.push(MemberEvent::Failed(incoming.clone())),
                    MemberStatus::Left => events.push(MemberEvent::Leave(incoming.clone())),
                    _ => {}
                }
                entry.insert(MemberRecord {
                    member: incoming,
                    last_heard: Instant::now(),
                });
            }
        }
        events
    }

    fn refresh_liveness(&self, name: &str) {
        if name == self.name() {
            return;
        }
        let event = {
            let mut state = self.state.lock().expect("membership lock poisoned");
            state.members.get_mut(name).and_then(|rec| {
                rec.last_heard = Instant::now();
                if rec.member.status == MemberStatus::Suspect {
                    rec.member.status = MemberStatus::Alive;
                    Some(MemberEvent::Update(rec.member.clone()))
                } else {
                    None
                }
            })
        };
        if let Some(event) = event {
            if let Err(err) = self.event_tx.try_send(event) {
                debug!("[{}] dropped liveness update: {err}", self.name());
            }
        }
    }

    /// Record a user event in the dedup window.  Returns `false` when
    /// the event was already seen or superseded (coalesced).
    fn mark_event_seen(&self, frame: &UserEventFrame) -> bool {
        let mut state = self.state.lock().expect("membership lock poisoned");
        let key = (frame.origin.clone(), frame.seq);
        if state.seen_events.contains(&key) {
            return false;
        }
        if frame.coalesce {
            let high = state
                .coalesce_high
                .entry((frame.origin.clone(), frame.name.clone()))
                .or_insert(0);
            if frame.seq < *high {
                debug!(
                    "coalesced stale '{}' event from {} (seq {} < {})",
                    frame.name, frame.origin, frame.seq, high
                );
                return false;
            }
            *high = frame.seq;
        }
        state.seen_events.insert(key.clone());
        state.seen_order.push_back(key);
        while state.seen_order.len() > SEEN_EVENTS_CAP {
            if let Some(old) = state.seen_order.pop_front() {
                state.seen_events.remove(&old);
            }
        }
        true
    }

    async fn gossip_loop(&self) {
        let interval = Duration::from_millis(self.config.gossip_interval_ms);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = time::sleep(interval) => {}
            }

            for event in self.detect_failures() {
                self.deliver(event).await;
            }

            let (snapshot, targets) = {
                let state = self.state.lock().expect("membership lock poisoned");
                let snapshot: Vec<Member> =
                    state.members.values().map(|r| r.member.clone()).collect();
                let candidates: Vec<SocketAddr> = state
                    .members
                    .values()
                    .filter(|r| {
                        r.member.name != self.name()
                            && r.member.status <= MemberStatus::Suspect
                    })
                    .map(|r| r.member.addr)
                    .collect();
                let mut rng = rand::thread_rng();
                let targets: Vec<SocketAddr> = candidates
                    .choose_multiple(&mut rng, self.config.gossip_fanout)
                    .copied()
                    .collect();
                (snapshot, targets)
            };
            if targets.is_empty() {
                continue;
            }

            let msg = GossipMessage::Sync {
                from: self.name().to_string(),
                members: snapshot,
            };
            let bytes = match msg.serialize() {
                Ok(b) => b,
                Err(err) => {
                    warn!("[{}] cannot encode sync: {err}", self.name());
                    continue;
                }
            };
            if bytes.len() > self.config.max_datagram_bytes {
                warn!(
                    "[{}] member table too large for one datagram ({} bytes), skipping round",
                    self.name(),
                    bytes.len()
                );
                continue;
            }
            for addr in targets {
                if let Err(err) = self.socket.send_to(&bytes, addr).await {
                    debug!("[{}] sync to {addr} failed: {err}", self.name());
                }
            }
        }
        debug!("[{}] gossip ticker stopped", self.name());
    }

    /// Silence-based failure detection plus reaping of long-dead
    /// entries.
    fn detect_failures(&self) -> Vec<MemberEvent> {
        let suspect_after = Duration::from_millis(self.config.suspect_timeout_ms);
        let failed_after = Duration::from_millis(self.config.failed_timeout_ms);
        let reap_after = Duration::from_millis(self.config.reap_timeout_ms);

        let mut events = Vec::new();
        let mut state = self.state.lock().expect("membership lock poisoned");
        let mut reap = Vec::new();

        for (name, rec) in state.members.iter_mut() {
            if name == self.name() {
                continue;
            }
            let silence = rec.last_heard.elapsed();
            match rec.member.status {
                MemberStatus::Alive if silence > suspect_after => {
                    rec.member.status = MemberStatus::Suspect;
                    warn!("[{}] member {name} is suspect (silent {silence:?})", self.config.node_name);
                    events.push(MemberEvent::Update(rec.member.clone()));
                }
                MemberStatus::Suspect if silence > failed_after => {
                    rec.member.status = MemberStatus::Failed;
                    warn!("[{}] member {name} failed (silent {silence:?})", self.config.node_name);
                    events.push(MemberEvent::Failed(rec.member.clone()));
                }
                MemberStatus::Failed | MemberStatus::Left if silence > reap_after => {
                    reap.push(name.clone());
                }
                _ => {}
            }
        }
        for name in reap {
            debug!("[{}] reaped {name}", self.config.node_name);
            state.members.remove(&name);
        }
        events
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Tests ───────────────────────────────────────────────────────────────────
