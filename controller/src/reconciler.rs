//! Snapshot reconciliation.
//!
//! Owns desired-vs-observed topology: on every snapshot from the dynamics
//! engine it diffs the wanted link and uplink state against the persisted
//! records and closes the gap with agent RPCs. A failed RPC leaves the
//! record untouched — the next snapshot retries the same step, which is
//! the only rollback mechanism this control plane has or needs.
//!
//! Fan-out: operations for distinct links run concurrently on a bounded
//! pool; calls to the same node are serialised through a per-node lock so
//! an interface always exists before the link that references it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use net_topology::addressing::{subnet_hosts, AddressPools, LoopbackAllocator, SubnetAllocator};
use net_topology::frr;
use net_topology::graph::{pair_key, NetGraph};
use sim_api::{
    FrrConfig, InterfaceConfig, LinkConfig, LinkState, NodeKind, PositionUpdate, Snapshot, UpLinks,
    UplinkConfig,
};

use crate::agent_rpc::AgentRpc;
use crate::events::EventLog;
use crate::store::{LinkRecord, NodeRecord, StateStore, StoreError, UplinkRecord};

/// Link shaping is reprogrammed only when the delay moved at least this far.
pub const DELAY_HYSTERESIS_MS: f64 = 0.1;

/// Bounded fan-out for agent RPCs within one reconciliation.
const FANOUT_LIMIT: usize = 32;

const SUBNET_CURSOR: &str = "subnet_cursor";
const LOOPBACK_CURSOR: &str = "loopback_cursor";

type NodeLocks = Arc<HashMap<String, Arc<Mutex<()>>>>;

enum RpcCall {
    Interface(String, InterfaceConfig),
    Link(String, LinkConfig),
    Uplink(String, UplinkConfig),
}

impl RpcCall {
    fn node(&self) -> &str {
        match self {
            RpcCall::Interface(node, _) | RpcCall::Link(node, _) | RpcCall::Uplink(node, _) => node,
        }
    }

    async fn invoke(&self, rpc: &dyn AgentRpc) -> crate::agent_rpc::Result<()> {
        match self {
            RpcCall::Interface(node, cfg) => rpc.configure_interface(node, cfg.clone()).await,
            RpcCall::Link(node, cfg) => rpc.configure_link(node, cfg.clone()).await,
            RpcCall::Uplink(node, cfg) => rpc.configure_uplink(node, cfg.clone()).await,
        }
    }
}

enum StoreAction {
    UpsertLink(LinkRecord),
    UpsertUplink(UplinkRecord),
}

/// One unit of reconciliation: the RPC sequence to issue and the record to
/// persist once every call succeeded.
struct ReconcileOp {
    describe: String,
    calls: Vec<RpcCall>,
    action: StoreAction,
}

pub struct Reconciler {
    graph: NetGraph,
    pools: AddressPools,
    store: StateStore,
    rpc: Arc<dyn AgentRpc>,
    subnet_alloc: SubnetAllocator,
    loopback_alloc: LoopbackAllocator,
    events: EventLog,
    node_locks: HashMap<String, Arc<Mutex<()>>>,
}

impl Reconciler {
    pub fn new(
        mut graph: NetGraph,
        pools: AddressPools,
        store: StateStore,
        rpc: Arc<dyn AgentRpc>,
        events: EventLog,
    ) -> Result<Self, StoreError> {
        // Interface counters restart from the annotation on every boot;
        // walk the persisted uplinks so runtime-issued names never collide
        // with ones already in the field.
        for uplink in store.all_uplinks()? {
            bump_if_count(&mut graph, &uplink.ground, &uplink.ground_interface);
            bump_if_count(&mut graph, &uplink.satellite, &uplink.satellite_interface);
        }

        let subnet_alloc = match store.get_meta_u32(SUBNET_CURSOR)? {
            Some(cursor) => SubnetAllocator::resume_at(pools.link, cursor),
            None => SubnetAllocator::after_annotation(pools.link, &graph),
        };
        // Annotated loopbacks occupy the low host indices; runtime-observed
        // nodes allocate past them.
        let loopback_alloc = match store.get_meta_u32(LOOPBACK_CURSOR)? {
            Some(cursor) => LoopbackAllocator::resume_at(pools.loopback, cursor),
            None => {
                LoopbackAllocator::resume_at(pools.loopback, graph.nodes().count() as u32 + 1)
            }
        };

        Ok(Self {
            graph,
            pools,
            store,
            rpc,
            subnet_alloc,
            loopback_alloc,
            events,
            node_locks: HashMap::new(),
        })
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn graph(&self) -> &NetGraph {
        &self.graph
    }

    /// Startup provisioning: persist node records with their annotated
    /// loopbacks, push routing configs and loopback interfaces, and create
    /// link records for every graph edge. All agent traffic is best-effort;
    /// whatever fails here is retried by snapshot reconciliation.
    pub async fn provision(&mut self) -> Result<(), StoreError> {
        let now = Utc::now().timestamp();

        let node_meta: Vec<(String, NodeKind, Option<String>)> = self
            .graph
            .nodes()
            .map(|n| {
                let kind = if n.is_satellite() {
                    NodeKind::Satellite
                } else if matches!(
                    n.variant,
                    net_topology::graph::NodeVariant::Ground { .. }
                ) {
                    NodeKind::GroundStation
                } else {
                    NodeKind::Vessel
                };
                (n.name.clone(), kind, n.loopback.map(|ip| ip.to_string()))
            })
            .collect();

        for (name, kind, loopback_ip) in &node_meta {
            if self.store.get_node(name)?.is_none() {
                self.store.upsert_node(&NodeRecord {
                    name: name.clone(),
                    kind: *kind,
                    loopback_ip: loopback_ip.clone(),
                    position: None,
                    created_at: now,
                })?;
                self.events.log(&format!("Registered {} node: {}", kind, name));
            }
        }

        // Loopback interface + routing config per node, fan-out bounded.
        let rpc = self.rpc.clone();
        let locks = self.locks_for(node_meta.iter().map(|(n, _, _)| n.as_str()));
        let pools = self.pools;
        let configs: Vec<(String, Option<String>, HashMap<String, String>)> = node_meta
            .iter()
            .map(|(name, _, loopback)| {
                (
                    name.clone(),
                    loopback.clone(),
                    frr::node_config_files(&self.graph, name, &pools),
                )
            })
            .collect();

        stream::iter(configs)
            .for_each_concurrent(FANOUT_LIMIT, |(name, loopback, files)| {
                let rpc = rpc.clone();
                let locks = locks.clone();
                async move {
                    let _guard = locks[&name].lock().await;
                    if let Some(ip) = loopback {
                        let cfg = InterfaceConfig {
                            name: format!("{}-lo", name),
                            ip: Some(ip),
                            prefix_len: Some(32),
                            status: None,
                        };
                        if let Err(e) = rpc.configure_interface(&name, cfg).await {
                            debug!("loopback provisioning for {} deferred: {}", name, e);
                        }
                    }
                    if let Err(e) = rpc.configure_frr(&name, FrrConfig { files }).await {
                        debug!("routing config for {} deferred: {}", name, e);
                    }
                }
            })
            .await;

        // Link records for the static ISL mesh.
        let mut ops = Vec::new();
        let pairs: Vec<(String, String)> = {
            let mut seen = std::collections::HashSet::new();
            self.graph
                .edges()
                .map(|e| e.key())
                .filter(|k| seen.insert(k.clone()))
                .collect()
        };
        for (a, b) in pairs {
            ops.extend(self.create_isl_ops(&a, &b, 1.0)?);
        }
        self.run_ops(ops).await;

        self.events.log("Network provisioning completed");
        self.store.flush()?;
        Ok(())
    }

    /// Apply one dynamics snapshot. Per-link failures are logged and
    /// skipped; the snapshot as a whole always completes.
    pub async fn apply_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.events.log(&format!(
            "Applied positions snapshot: {} satellites, {} links, {} uplink groups",
            snapshot.satellites.len(),
            snapshot.satellite_links.len(),
            snapshot.ground_uplinks.len(),
        ));

        self.push_positions(snapshot).await?;
        self.reconcile_isls(&snapshot.satellite_links).await?;
        self.reconcile_uplinks(&snapshot.ground_uplinks).await?;
        Ok(())
    }

    /// Manual link override (`PUT /link`). Unlike snapshot reconciliation
    /// this path forces the state through even when the record already
    /// matches. Returns false if any RPC failed.
    pub async fn update_link_state(
        &mut self,
        node1: &str,
        node2: &str,
        up: bool,
        delay: Option<f64>,
    ) -> Result<bool, StoreError> {
        let records = self.store.links_between(node1, node2)?;
        if records.is_empty() {
            warn!(
                "link between {} and {} not found - will be created at next provision",
                node1, node2
            );
            return Ok(false);
        }

        // One op per record: the combined status + delay calls persist a
        // single final state, so concurrent upserts cannot clobber it.
        let mut ops = Vec::new();
        for record in records {
            let status = if up { "up" } else { "down" };
            let mut calls: Vec<RpcCall> = [&record.node1, &record.node2]
                .into_iter()
                .map(|node| {
                    RpcCall::Interface(
                        node.clone(),
                        InterfaceConfig {
                            name: record.interfaces[node].clone(),
                            ip: None,
                            prefix_len: None,
                            status: Some(status.to_string()),
                        },
                    )
                })
                .collect();

            let mut updated = record.clone();
            updated.up = up;
            updated.updated_at = Utc::now().timestamp();

            if let Some(delay_ms) = delay {
                updated.delay_ms = delay_ms;
                calls.extend(
                    [
                        (&record.node1, &record.node2),
                        (&record.node2, &record.node1),
                    ]
                    .into_iter()
                    .map(|(node, neighbor)| {
                        RpcCall::Link(
                            node.clone(),
                            LinkConfig {
                                neighbor: neighbor.clone(),
                                local_ip: record.ips[node].clone(),
                                remote_ip: record.ips[neighbor].clone(),
                                interface: record.interfaces[node].clone(),
                                delay_ms: Some(delay_ms),
                            },
                        )
                    }),
                );
            }

            ops.push(ReconcileOp {
                describe: format!(
                    "Updated link between {} and {} - status: {}{}",
                    record.node1,
                    record.node2,
                    status,
                    delay
                        .map(|d| format!(", delay: {}ms", d))
                        .unwrap_or_default(),
                ),
                calls,
                action: StoreAction::UpsertLink(updated),
            });
        }

        let outcomes = self.run_ops(ops).await;
        Ok(outcomes.iter().all(|ok| *ok))
    }

    // ---- positions ----

    async fn push_positions(&mut self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut updates: Vec<(String, NodeKind, PositionUpdate)> = Vec::new();
        for sat in &snapshot.satellites {
            updates.push((
                sat.name.clone(),
                NodeKind::Satellite,
                PositionUpdate {
                    lat: sat.lat,
                    lon: sat.lon,
                    alt: Some(sat.height),
                },
            ));
        }
        for gs in &snapshot.ground_stations {
            updates.push((
                gs.name.clone(),
                NodeKind::GroundStation,
                PositionUpdate {
                    lat: gs.lat,
                    lon: gs.lon,
                    alt: None,
                },
            ));
        }
        for vessel in &snapshot.vessels {
            updates.push((
                vessel.name.clone(),
                NodeKind::Vessel,
                PositionUpdate {
                    lat: vessel.lat,
                    lon: vessel.lon,
                    alt: None,
                },
            ));
        }

        let now = Utc::now().timestamp();
        for (name, kind, update) in &updates {
            let mut record = match self.store.get_node(name)? {
                Some(record) => record,
                None => {
                    // A node outside the annotated topology still gets a
                    // unique loopback so routing configs can reference it.
                    let loopback_ip = match self.loopback_alloc.next_ip() {
                        Ok(ip) => {
                            self.store
                                .set_meta_u32(LOOPBACK_CURSOR, self.loopback_alloc.cursor())?;
                            Some(ip.to_string())
                        }
                        Err(e) => {
                            self.events.log(&format!("Loopback for {} refused: {}", name, e));
                            None
                        }
                    };
                    NodeRecord {
                        name: name.clone(),
                        kind: *kind,
                        loopback_ip,
                        position: None,
                        created_at: now,
                    }
                }
            };
            record.position = Some((update.lat, update.lon, update.alt));
            self.store.upsert_node(&record)?;
        }

        // Telemetry fan-out; cosmetic, so failures are only debug noise.
        let rpc = self.rpc.clone();
        let locks = self.locks_for(updates.iter().map(|(n, _, _)| n.as_str()));
        stream::iter(updates)
            .for_each_concurrent(FANOUT_LIMIT, |(name, _, update)| {
                let rpc = rpc.clone();
                let locks = locks.clone();
                async move {
                    let _guard = locks[&name].lock().await;
                    if let Err(e) = rpc.update_position(&name, update).await {
                        debug!("position push to {} failed: {}", name, e);
                    }
                }
            })
            .await;

        Ok(())
    }

    // ---- inter-satellite links ----

    async fn reconcile_isls(&mut self, links: &[LinkState]) -> Result<(), StoreError> {
        // Parallel links share one wire identity; dedupe by endpoint pair.
        let mut desired: BTreeMap<(String, String), &LinkState> = BTreeMap::new();
        for link in links {
            desired
                .entry(pair_key(&link.node1_name, &link.node2_name))
                .or_insert(link);
        }

        let mut ops = Vec::new();
        for ((a, b), want) in desired {
            let records = self.store.links_between(&a, &b)?;

            if records.is_empty() {
                if want.up {
                    ops.extend(self.create_isl_ops(&a, &b, want.delay)?);
                }
                continue;
            }

            for record in records {
                if record.up != want.up {
                    ops.push(self.status_op(&record, want.up));
                } else if want.up && (record.delay_ms - want.delay).abs() >= DELAY_HYSTERESIS_MS {
                    ops.push(self.delay_op(&record, want.delay));
                }
            }
        }

        self.run_ops(ops).await;
        Ok(())
    }

    /// Ops creating records (and agent state) for every un-persisted edge
    /// between a pair. Edges of the static mesh reuse their annotated
    /// subnet; a pair absent from the graph gets a runtime allocation.
    fn create_isl_ops(
        &mut self,
        a: &str,
        b: &str,
        delay_ms: f64,
    ) -> Result<Vec<ReconcileOp>, StoreError> {
        let now = Utc::now().timestamp();
        let mut ops = Vec::new();

        let annotated: Vec<LinkRecord> = self
            .graph
            .edges_between(a, b)
            .into_iter()
            .enumerate()
            .filter_map(|(index, edge)| {
                let subnet = edge.subnet?;
                Some(LinkRecord {
                    node1: edge.node1.clone(),
                    node2: edge.node2.clone(),
                    index: index as u32,
                    subnet: subnet.to_string(),
                    ips: edge
                        .addrs
                        .iter()
                        .map(|(k, v)| (k.clone(), v.to_string()))
                        .collect(),
                    interfaces: edge.interfaces.clone(),
                    inter_ring: edge.inter_ring,
                    up: true,
                    delay_ms,
                    updated_at: now,
                })
            })
            .collect();

        let records = if annotated.is_empty() {
            // Unknown pair: allocate from the runtime pool.
            let subnet = match self.subnet_alloc.next_subnet() {
                Ok(s) => s,
                Err(e) => {
                    self.events
                        .log(&format!("Link {}-{} skipped: {}", a, b, e));
                    return Ok(Vec::new());
                }
            };
            self.store
                .set_meta_u32(SUBNET_CURSOR, self.subnet_alloc.cursor())?;
            let (ip1, ip2) = subnet_hosts(subnet);
            let intf1 = self.claim_interface(a);
            let intf2 = self.claim_interface(b);
            vec![LinkRecord {
                node1: a.to_string(),
                node2: b.to_string(),
                index: 0,
                subnet: subnet.to_string(),
                ips: [
                    (a.to_string(), ip1.to_string()),
                    (b.to_string(), ip2.to_string()),
                ]
                .into_iter()
                .collect(),
                interfaces: [(a.to_string(), intf1), (b.to_string(), intf2)]
                    .into_iter()
                    .collect(),
                inter_ring: false,
                up: true,
                delay_ms,
                updated_at: now,
            }]
        } else {
            annotated
        };

        for record in records {
            if self
                .store
                .links_between(&record.node1, &record.node2)?
                .iter()
                .any(|existing| existing.index == record.index)
            {
                continue;
            }

            let calls = vec![
                RpcCall::Interface(
                    record.node1.clone(),
                    InterfaceConfig {
                        name: record.interfaces[&record.node1].clone(),
                        ip: Some(record.ips[&record.node1].clone()),
                        prefix_len: Some(30),
                        status: None,
                    },
                ),
                RpcCall::Interface(
                    record.node2.clone(),
                    InterfaceConfig {
                        name: record.interfaces[&record.node2].clone(),
                        ip: Some(record.ips[&record.node2].clone()),
                        prefix_len: Some(30),
                        status: None,
                    },
                ),
                RpcCall::Link(
                    record.node1.clone(),
                    LinkConfig {
                        neighbor: record.node2.clone(),
                        local_ip: record.ips[&record.node1].clone(),
                        remote_ip: record.ips[&record.node2].clone(),
                        interface: record.interfaces[&record.node1].clone(),
                        delay_ms: Some(record.delay_ms),
                    },
                ),
                RpcCall::Link(
                    record.node2.clone(),
                    LinkConfig {
                        neighbor: record.node1.clone(),
                        local_ip: record.ips[&record.node2].clone(),
                        remote_ip: record.ips[&record.node1].clone(),
                        interface: record.interfaces[&record.node2].clone(),
                        delay_ms: Some(record.delay_ms),
                    },
                ),
            ];

            ops.push(ReconcileOp {
                describe: format!("Created link between {} and {}", record.node1, record.node2),
                calls,
                action: StoreAction::UpsertLink(record),
            });
        }

        Ok(ops)
    }

    fn status_op(&self, record: &LinkRecord, up: bool) -> ReconcileOp {
        let status = if up { "up" } else { "down" };
        let calls = [&record.node1, &record.node2]
            .into_iter()
            .map(|node| {
                RpcCall::Interface(
                    node.clone(),
                    InterfaceConfig {
                        name: record.interfaces[node].clone(),
                        ip: None,
                        prefix_len: None,
                        status: Some(status.to_string()),
                    },
                )
            })
            .collect();

        let mut updated = record.clone();
        updated.up = up;
        updated.updated_at = Utc::now().timestamp();

        ReconcileOp {
            describe: format!(
                "Updated link between {} and {} - status: {}",
                record.node1, record.node2, status
            ),
            calls,
            action: StoreAction::UpsertLink(updated),
        }
    }

    fn delay_op(&self, record: &LinkRecord, delay_ms: f64) -> ReconcileOp {
        let calls = [
            (&record.node1, &record.node2),
            (&record.node2, &record.node1),
        ]
        .into_iter()
        .map(|(node, neighbor)| {
            RpcCall::Link(
                node.clone(),
                LinkConfig {
                    neighbor: neighbor.clone(),
                    local_ip: record.ips[node].clone(),
                    remote_ip: record.ips[neighbor].clone(),
                    interface: record.interfaces[node].clone(),
                    delay_ms: Some(delay_ms),
                },
            )
        })
        .collect();

        let mut updated = record.clone();
        updated.delay_ms = delay_ms;
        updated.updated_at = Utc::now().timestamp();

        ReconcileOp {
            describe: format!(
                "Updated link between {} and {} - delay: {}ms",
                record.node1, record.node2, delay_ms
            ),
            calls,
            action: StoreAction::UpsertLink(updated),
        }
    }

    // ---- uplinks ----

    async fn reconcile_uplinks(&mut self, groups: &[UpLinks]) -> Result<(), StoreError> {
        for group in groups {
            let ground = &group.ground_node;
            let candidates: BTreeMap<&str, &sim_api::UpLink> = group
                .uplinks
                .iter()
                .map(|u| (u.sat_node.as_str(), u))
                .collect();

            // Lapsed uplinks go first so a transferred default is possible
            // in the same tick.
            for old in self.store.uplinks_for(ground)? {
                if !candidates.contains_key(old.satellite.as_str()) {
                    self.remove_uplink(&old).await?;
                }
            }

            let mut has_default = self
                .store
                .uplinks_for(ground)?
                .iter()
                .any(|u| u.default);

            let mut ops = Vec::new();
            for (sat, candidate) in candidates {
                match self.store.get_uplink(ground, sat)? {
                    Some(existing) => {
                        if (existing.delay_ms - candidate.delay).abs() >= DELAY_HYSTERESIS_MS {
                            ops.push(self.uplink_update_op(
                                &existing,
                                candidate.distance as f64,
                                candidate.delay,
                            ));
                        }
                    }
                    None => {
                        let default = !has_default;
                        has_default = true;
                        match self.uplink_create_op(
                            ground,
                            sat,
                            candidate.distance as f64,
                            candidate.delay,
                            default,
                        )? {
                            Some(op) => ops.push(op),
                            None => continue,
                        }
                    }
                }
            }

            self.run_ops(ops).await;
        }
        Ok(())
    }

    /// Deletion policy for lapsed uplinks: bring the satellite-side
    /// interface down (best effort), then drop the record. The /30 leaks
    /// only across a full restart, which is accepted.
    async fn remove_uplink(&mut self, old: &UplinkRecord) -> Result<(), StoreError> {
        let call = RpcCall::Interface(
            old.satellite.clone(),
            InterfaceConfig {
                name: old.satellite_interface.clone(),
                ip: None,
                prefix_len: None,
                status: Some("down".to_string()),
            },
        );
        let locks = self.locks_for([old.satellite.as_str()].into_iter());
        {
            let _guard = locks[&old.satellite].lock().await;
            if let Err(e) = call.invoke(self.rpc.as_ref()).await {
                self.events.log(&format!(
                    "Failed to lower {} for lapsed uplink from {} ({})",
                    old.satellite_interface, old.ground, e
                ));
            }
        }

        self.store.delete_uplink(&old.ground, &old.satellite)?;
        self.events.log(&format!(
            "Removed uplink from {} to {}",
            old.ground, old.satellite
        ));
        Ok(())
    }

    fn uplink_create_op(
        &mut self,
        ground: &str,
        satellite: &str,
        distance_km: f64,
        delay_ms: f64,
        default: bool,
    ) -> Result<Option<ReconcileOp>, StoreError> {
        let subnet = match self.subnet_alloc.next_subnet() {
            Ok(s) => s,
            Err(e) => {
                self.events.log(&format!(
                    "Uplink {} → {} skipped: {}",
                    ground, satellite, e
                ));
                return Ok(None);
            }
        };
        self.store
            .set_meta_u32(SUBNET_CURSOR, self.subnet_alloc.cursor())?;

        let (ground_ip, satellite_ip) = subnet_hosts(subnet);
        let record = UplinkRecord {
            ground: ground.to_string(),
            satellite: satellite.to_string(),
            subnet: subnet.to_string(),
            ground_ip: ground_ip.to_string(),
            satellite_ip: satellite_ip.to_string(),
            ground_interface: self.claim_interface(ground),
            satellite_interface: self.claim_interface(satellite),
            distance_km,
            delay_ms,
            default,
            updated_at: Utc::now().timestamp(),
        };

        let calls = vec![
            RpcCall::Interface(
                ground.to_string(),
                InterfaceConfig {
                    name: record.ground_interface.clone(),
                    ip: Some(record.ground_ip.clone()),
                    prefix_len: Some(30),
                    status: None,
                },
            ),
            RpcCall::Interface(
                satellite.to_string(),
                InterfaceConfig {
                    name: record.satellite_interface.clone(),
                    ip: Some(record.satellite_ip.clone()),
                    prefix_len: Some(30),
                    status: None,
                },
            ),
            RpcCall::Uplink(
                ground.to_string(),
                UplinkConfig {
                    satellite: satellite.to_string(),
                    local_ip: record.ground_ip.clone(),
                    remote_ip: record.satellite_ip.clone(),
                    interface: record.ground_interface.clone(),
                    distance_km,
                    delay_ms,
                    default,
                },
            ),
            RpcCall::Link(
                satellite.to_string(),
                LinkConfig {
                    neighbor: ground.to_string(),
                    local_ip: record.satellite_ip.clone(),
                    remote_ip: record.ground_ip.clone(),
                    interface: record.satellite_interface.clone(),
                    delay_ms: Some(delay_ms),
                },
            ),
        ];

        Ok(Some(ReconcileOp {
            describe: format!("Created uplink from {} to {}", ground, satellite),
            calls,
            action: StoreAction::UpsertUplink(record),
        }))
    }

    fn uplink_update_op(
        &self,
        existing: &UplinkRecord,
        distance_km: f64,
        delay_ms: f64,
    ) -> ReconcileOp {
        let calls = vec![
            RpcCall::Uplink(
                existing.ground.clone(),
                UplinkConfig {
                    satellite: existing.satellite.clone(),
                    local_ip: existing.ground_ip.clone(),
                    remote_ip: existing.satellite_ip.clone(),
                    interface: existing.ground_interface.clone(),
                    distance_km,
                    delay_ms,
                    default: existing.default,
                },
            ),
            RpcCall::Link(
                existing.satellite.clone(),
                LinkConfig {
                    neighbor: existing.ground.clone(),
                    local_ip: existing.satellite_ip.clone(),
                    remote_ip: existing.ground_ip.clone(),
                    interface: existing.satellite_interface.clone(),
                    delay_ms: Some(delay_ms),
                },
            ),
        ];

        let mut updated = existing.clone();
        updated.distance_km = distance_km;
        updated.delay_ms = delay_ms;
        updated.updated_at = Utc::now().timestamp();

        ReconcileOp {
            describe: format!(
                "Updated uplink from {} to {} - delay: {}ms",
                existing.ground, existing.satellite, delay_ms
            ),
            calls,
            action: StoreAction::UpsertUplink(updated),
        }
    }

    // ---- op execution ----

    /// Run ops concurrently (bounded), serialising calls per node, then
    /// persist outcomes. Returns per-op success flags in completion order.
    async fn run_ops(&mut self, ops: Vec<ReconcileOp>) -> Vec<bool> {
        if ops.is_empty() {
            return Vec::new();
        }

        let locks = self.locks_for(
            ops.iter()
                .flat_map(|op| op.calls.iter().map(|c| c.node())),
        );
        let rpc = self.rpc.clone();

        let results: Vec<(ReconcileOp, Option<String>)> = stream::iter(ops)
            .map(|op| {
                let rpc = rpc.clone();
                let locks = locks.clone();
                async move {
                    for call in &op.calls {
                        let lock = locks[call.node()].clone();
                        let _guard = lock.lock().await;
                        if let Err(e) = call.invoke(rpc.as_ref()).await {
                            return (op, Some(e.to_string()));
                        }
                    }
                    (op, None)
                }
            })
            .buffer_unordered(FANOUT_LIMIT)
            .collect()
            .await;

        let mut outcomes = Vec::with_capacity(results.len());
        for (op, error) in results {
            match error {
                None => {
                    let persisted = match &op.action {
                        StoreAction::UpsertLink(record) => self.store.upsert_link(record),
                        StoreAction::UpsertUplink(record) => self.store.upsert_uplink(record),
                    };
                    match persisted {
                        Ok(()) => {
                            self.events.log(&op.describe);
                            outcomes.push(true);
                        }
                        Err(e) => {
                            self.events
                                .log(&format!("Store write failed: {} ({})", op.describe, e));
                            outcomes.push(false);
                        }
                    }
                }
                Some(e) => {
                    self.events
                        .log(&format!("Failed: {} ({})", op.describe, e));
                    outcomes.push(false);
                }
            }
        }
        outcomes
    }

    fn locks_for<'a>(&mut self, nodes: impl Iterator<Item = &'a str>) -> NodeLocks {
        let mut map = HashMap::new();
        for node in nodes {
            let lock = self
                .node_locks
                .entry(node.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();
            map.insert(node.to_string(), lock);
        }
        Arc::new(map)
    }

    fn claim_interface(&mut self, node: &str) -> String {
        match self.graph.node_mut(node) {
            Some(n) => n.next_interface(),
            // Node outside the static topology; degenerate but harmless.
            None => format!("{}-eth1", node),
        }
    }
}

fn bump_if_count(graph: &mut NetGraph, node: &str, interface: &str) {
    let counter = interface
        .rfind("-eth")
        .and_then(|i| interface[i + 4..].parse::<u32>().ok());
    if let (Some(counter), Some(node)) = (counter, graph.node_mut(node)) {
        if node.if_count < counter {
            node.if_count = counter;
        }
    }
}
