//! Keeps the local topology in step with the cluster.
//!
//! Three duties:
//!
//! 1. **Event → graph**: consume the membership event channel and turn
//!    joins, failures, and the two gossip user events into graph
//!    mutations.
//! 2. **Local change → gossip**: `register_link` / `unregister_link`
//!    mutate the local graph and broadcast a `link-update` event so the
//!    rest of the cluster converges.
//! 3. **Periodic reconciliation**: broadcast the full deduplicated edge
//!    set every `sync_interval` as a `topology-sync` event; receivers
//!    merge with min-cost-wins, so two nodes that exchange one sync
//!    each end up with identical edge sets.
//!
//! Every successful mutation fires the change-notification callback
//! (installed once at bootstrap) which triggers route recomputation.
//! Per-event errors are logged and swallowed: one malformed gossip
//! payload must never take the dispatcher down.

use {
    crate::error::{CoreError, Result},
    log::{debug, info, warn},
    spanmesh_membership::{MemberEvent, Membership, UserEvent},
    spanmesh_net::{
        LinkEntry, LinkUpdateEvent, TopologySyncEvent, EVENT_LINK_UPDATE, EVENT_TOPOLOGY_SYNC,
    },
    spanmesh_topology::{edge_id, NodeInfo, NodeStatus, Topology},
    std::{
        collections::HashSet,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Mutex, RwLock,
        },
        time::Duration,
    },
    tokio::{sync::mpsc, time},
    tokio_util::sync::CancellationToken,
};

/// Callback fired on every accepted topology change.
pub type ChangeCallback = Box<dyn Fn() + Send + Sync>;

/// The topology synchronization layer.
///
/// Constructed without a membership handle it runs standalone: all
/// broadcasts are silently skipped while incoming mutations (driven by
/// tests or by an embedding process) behave normally.
pub struct TopologySync {
    node_id: String,
    topology: Arc<Topology>,
    membership: Option<Arc<Membership>>,
    on_change: Mutex<Option<ChangeCallback>>,
    sync_interval: RwLock<Duration>,
    sync_enabled: AtomicBool,
}

impl TopologySync {
    pub fn new(
        node_id: impl Into<String>,
        topology: Arc<Topology>,
        membership: Option<Arc<Membership>>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            topology,
            membership,
            on_change: Mutex::new(None),
            sync_interval: RwLock::new(Duration::from_secs(
                crate::config::DEFAULT_SYNC_INTERVAL_SECS,
            )),
            sync_enabled: AtomicBool::new(true),
        }
    }

    /// Install the change-notification callback.  Set once at bootstrap
    /// by the route-manager wiring.
    pub fn set_change_callback(&self, callback: ChangeCallback) {
        let mut slot = self.on_change.lock().expect("callback lock poisoned");
        if slot.is_some() {
            warn!("[{}] change callback replaced", self.node_id);
        }
        *slot = Some(callback);
    }

    pub fn set_sync_interval(&self, interval: Duration) {
        let mut current = self.sync_interval.write().expect("interval lock poisoned");
        *current = interval;
    }

    pub fn sync_interval(&self) -> Duration {
        *self.sync_interval.read().expect("interval lock poisoned")
    }

    /// Gate the periodic broadcast.  Incoming sync events are always
    /// accepted regardless of this flag.
    pub fn enable_sync(&self, enabled: bool) {
        self.sync_enabled.store(enabled, Ordering::Relaxed);
        info!(
            "[{}] periodic topology sync {}",
            self.node_id,
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.sync_enabled.load(Ordering::Relaxed)
    }

    /// Spawn the event dispatcher and the periodic reconciliation loop.
    pub fn start(
        self: &Arc<Self>,
        events: Option<mpsc::Receiver<MemberEvent>>,
        cancel: &CancellationToken,
    ) {
        if let Some(rx) = events {
            let sync = self.clone();
            let token = cancel.clone();
            tokio::spawn(async move { sync.event_loop(rx, token).await });
        }
        let sync = self.clone();
        let token = cancel.clone();
        tokio::spawn(async move { sync.periodic_loop(token).await });
    }

    // ── Event → graph ───────────────────────────────────────────────────

    async fn event_loop(&self, mut events: mpsc::Receiver<MemberEvent>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
            }
        }
        debug!("[{}] topology event loop stopped", self.node_id);
    }

    fn handle_event(&self, event: MemberEvent) {
        match event {
            MemberEvent::Join(member) => {
                let port = member
                    .tags
                    .get("port")
                    .and_then(|p| p.parse::<u16>().ok())
                    .unwrap_or(0);
                let ip = member
                    .tags
                    .get("ip")
                    .cloned()
                    .unwrap_or_else(|| member.addr.ip().to_string());
                info!("[{}] node joined: {} ({ip}:{port})", self.node_id, member.name);
                self.topology.add_node(NodeInfo {
                    id: member.name,
                    ip,
                    port,
                    rpc_addr: String::new(),
                    status: NodeStatus::Alive,
                });
                self.trigger_change();
            }
            MemberEvent::Leave(member) | MemberEvent::Failed(member) => {
                info!("[{}] node left: {}", self.node_id, member.name);
                self.topology.remove_node(&member.name);
                self.trigger_change();
            }
            MemberEvent::Update(member) => {
                debug!(
                    "[{}] member update: {} ({:?})",
                    self.node_id, member.name, member.status
                );
            }
            MemberEvent::User(event) => self.handle_user_event(event),
        }
    }

    fn handle_user_event(&self, event: UserEvent) {
        match event.name.as_str() {
            EVENT_LINK_UPDATE => match serde_json::from_slice::<LinkUpdateEvent>(&event.payload) {
                Ok(update) => self.handle_link_update(update),
                Err(err) => warn!("[{}] undecodable link-update: {err}", self.node_id),
            },
            EVENT_TOPOLOGY_SYNC => {
                match serde_json::from_slice::<TopologySyncEvent>(&event.payload) {
                    Ok(sync) => self.handle_topology_sync(sync),
                    Err(err) => warn!("[{}] undecodable topology-sync: {err}", self.node_id),
                }
            }
            other => debug!("[{}] ignoring user event '{other}'", self.node_id),
        }
    }

    fn handle_link_update(&self, event: LinkUpdateEvent) {
        match event.op.as_str() {
            "add" | "update" => {
                if !valid_cost(event.cost) {
                    warn!(
                        "[{}] rejecting link {}-{} with cost {}",
                        self.node_id, event.from, event.to, event.cost
                    );
                    return;
                }
                self.topology.update_link(&event.from, &event.to, event.cost);
                info!(
                    "[{}] link updated: {}-{} cost={:.2}",
                    self.node_id, event.from, event.to, event.cost
                );
            }
            "remove" => {
                self.topology.remove_link(&event.from, &event.to);
                info!("[{}] link removed: {}-{}", self.node_id, event.from, event.to);
            }
            other => {
                warn!("[{}] unknown link op '{other}'", self.node_id);
                return;
            }
        }
        self.trigger_change();
    }

    /// Merge a full topology sync: adopt unknown links, adopt cheaper
    /// costs, keep local otherwise.  Notifies only when something was
    /// adopted, so replaying the same sync is quiet.
    fn handle_topology_sync(&self, event: TopologySyncEvent) {
        if event.node_id == self.node_id {
            return;
        }
        debug!(
            "[{}] topology sync from {} ({} links)",
            self.node_id,
            event.node_id,
            event.links.len()
        );

        let mut changed = false;
        for link in &event.links {
            if !valid_cost(link.cost) {
                warn!(
                    "[{}] rejecting synced link {}-{} with cost {}",
                    self.node_id, link.from, link.to, link.cost
                );
                continue;
            }
            match self.topology.get_cost(&link.from, &link.to) {
                None => {
                    self.topology.update_link(&link.from, &link.to, link.cost);
                    info!(
                        "[{}] learned link from {}: {}-{} cost={:.2}",
                        self.node_id, event.node_id, link.from, link.to, link.cost
                    );
                    changed = true;
                }
                Some(existing) if link.cost < existing => {
                    self.topology.update_link(&link.from, &link.to, link.cost);
                    info!(
                        "[{}] cheaper link from {}: {}-{} cost {:.2} -> {:.2}",
                        self.node_id, event.node_id, link.from, link.to, existing, link.cost
                    );
                    changed = true;
                }
                Some(_) => {}
            }
        }
        if changed {
            self.trigger_change();
        }
    }

    // ── Local change → gossip ───────────────────────────────────────────

    /// Update a local link and broadcast it to the cluster.
    ///
    /// The local mutation and the change notification stand even when
    /// the broadcast fails; the error is returned so the caller can log
    /// or retry it.
    pub async fn register_link(&self, from: &str, to: &str, cost: f64) -> Result<()> {
        if !valid_cost(cost) {
            return Err(CoreError::Config(format!(
                "link {from}-{to} cost must be finite and non-negative, got {cost}"
            )));
        }
        self.topology.update_link(from, to, cost);
        info!("[{}] registered link {from}-{to} cost={cost:.2}", self.node_id);
        self.trigger_change();

        self.broadcast_link_update(LinkUpdateEvent {
            from: from.to_string(),
            to: to.to_string(),
            cost,
            op: "update".to_string(),
        })
        .await
    }

    /// Remove a local link and broadcast the removal.
    pub async fn unregister_link(&self, from: &str, to: &str) -> Result<()> {
        self.topology.remove_link(from, to);
        info!("[{}] unregistered link {from}-{to}", self.node_id);
        self.trigger_change();

        self.broadcast_link_update(LinkUpdateEvent {
            from: from.to_string(),
            to: to.to_string(),
            cost: 0.0,
            op: "remove".to_string(),
        })
        .await
    }

    async fn broadcast_link_update(&self, event: LinkUpdateEvent) -> Result<()> {
        let Some(membership) = &self.membership else {
            return Ok(());
        };
        let payload = serde_json::to_vec(&event)?;
        membership
            .emit_user_event(EVENT_LINK_UPDATE, payload, false)
            .await?;
        Ok(())
    }

    // ── Periodic reconciliation ─────────────────────────────────────────

    async fn periodic_loop(&self, cancel: CancellationToken) {
        loop {
            // Interval changes take effect on the following tick, never
            // mid-sleep.
            let interval = self.sync_interval();
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = time::sleep(interval) => {}
            }
            if let Err(err) = self.broadcast_full_topology().await {
                warn!("[{}] topology broadcast failed: {err}", self.node_id);
            }
        }
        debug!("[{}] periodic sync loop stopped", self.node_id);
    }

    /// Assemble and emit one full `topology-sync` event.
    ///
    /// Quietly a no-op while disabled or when running standalone.
    pub async fn broadcast_full_topology(&self) -> Result<()> {
        let Some(membership) = &self.membership else {
            return Ok(());
        };
        if !self.is_sync_enabled() {
            return Ok(());
        }

        let links = self.collect_links();
        let count = links.len();
        let event = TopologySyncEvent {
            node_id: self.node_id.clone(),
            links,
        };
        let payload = serde_json::to_vec(&event)?;
        membership
            .emit_user_event(EVENT_TOPOLOGY_SYNC, payload, false)
            .await?;
        debug!("[{}] broadcast full topology: {count} links", self.node_id);
        Ok(())
    }

    /// The local edge set with each unordered pair listed once.
    fn collect_links(&self) -> Vec<LinkEntry> {
        let adjacency = self.topology.get_adjacency();
        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for (from, neighbors) in adjacency {
            for (to, cost) in neighbors {
                if seen.insert(edge_id(&from, &to)) {
                    links.push(LinkEntry {
                        from: from.clone(),
                        to,
                        cost,
                    });
                }
            }
        }
        links
    }

    fn trigger_change(&self) {
        let slot = self.on_change.lock().expect("callback lock poisoned");
        if let Some(callback) = slot.as_ref() {
            callback();
        }
    }
}

fn valid_cost(cost: f64) -> bool {
    cost.is_finite() && cost >= 0.0
}

// ── Tests ───────────────────────────────────────────────────────────────────
