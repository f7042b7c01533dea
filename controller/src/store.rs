//! State store adapter.
//!
//! Durable collections over an embedded sled database: `nodes`, `links`
//! (ISL records), `uplinks`, append-only `events`, periodic `stats`, and a
//! small `meta` tree for allocator cursors. Values are JSON documents keyed
//! by natural keys — node name, sorted endpoint pair (+ index for parallel
//! links), `(ground, satellite)` pair. The controller is the only writer,
//! which is the consistency model sled gives us for free.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sled::Tree;
use thiserror::Error;

use net_topology::graph::pair_key;
use sim_api::NodeKind;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store I/O: {0}")]
    Db(#[from] sled::Error),
    #[error("store codec: {0}")]
    Codec(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    pub name: String,
    pub kind: NodeKind,
    pub loopback_ip: Option<String>,
    pub position: Option<(f64, f64, Option<f64>)>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkRecord {
    pub node1: String,
    pub node2: String,
    /// Distinguishes parallel links between the same endpoint pair.
    pub index: u32,
    pub subnet: String,
    pub ips: BTreeMap<String, String>,
    pub interfaces: BTreeMap<String, String>,
    pub inter_ring: bool,
    pub up: bool,
    pub delay_ms: f64,
    pub updated_at: i64,
}

impl LinkRecord {
    pub fn key(&self) -> String {
        link_key(&self.node1, &self.node2, self.index)
    }

    pub fn interface_of(&self, node: &str) -> Option<&str> {
        self.interfaces.get(node).map(String::as_str)
    }

    pub fn ip_of(&self, node: &str) -> Option<&str> {
        self.ips.get(node).map(String::as_str)
    }
}

pub fn link_key(a: &str, b: &str, index: u32) -> String {
    let (x, y) = pair_key(a, b);
    format!("{}|{}|{}", x, y, index)
}

fn link_prefix(a: &str, b: &str) -> String {
    let (x, y) = pair_key(a, b);
    format!("{}|{}|", x, y)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UplinkRecord {
    pub ground: String,
    pub satellite: String,
    pub subnet: String,
    pub ground_ip: String,
    pub satellite_ip: String,
    pub ground_interface: String,
    pub satellite_interface: String,
    pub distance_km: f64,
    pub delay_ms: f64,
    pub default: bool,
    pub updated_at: i64,
}

pub fn uplink_key(ground: &str, satellite: &str) -> String {
    format!("{}|{}", ground, satellite)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: i64,
    pub event: String,
}

#[derive(Clone)]
pub struct StateStore {
    db: sled::Db,
    nodes: Tree,
    links: Tree,
    uplinks: Tree,
    events: Tree,
    stats: Tree,
    meta: Tree,
    event_seq: Arc<AtomicU64>,
}

impl StateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)?;
        Ok(Self {
            nodes: db.open_tree("nodes")?,
            links: db.open_tree("links")?,
            uplinks: db.open_tree("uplinks")?,
            events: db.open_tree("events")?,
            stats: db.open_tree("stats")?,
            meta: db.open_tree("meta")?,
            event_seq: Arc::new(AtomicU64::new(0)),
            db,
        })
    }

    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // ---- nodes ----

    pub fn upsert_node(&self, record: &NodeRecord) -> Result<()> {
        self.nodes
            .insert(record.name.as_bytes(), serde_json::to_vec(record)?)?;
        Ok(())
    }

    pub fn get_node(&self, name: &str) -> Result<Option<NodeRecord>> {
        decode_opt(self.nodes.get(name.as_bytes())?)
    }

    pub fn all_nodes(&self) -> Result<Vec<NodeRecord>> {
        decode_all(&self.nodes)
    }

    // ---- ISL link records ----

    pub fn upsert_link(&self, record: &LinkRecord) -> Result<()> {
        self.links
            .insert(record.key().as_bytes(), serde_json::to_vec(record)?)?;
        Ok(())
    }

    /// All records for an unordered endpoint pair (parallel links included).
    pub fn links_between(&self, a: &str, b: &str) -> Result<Vec<LinkRecord>> {
        let mut out = Vec::new();
        for item in self.links.scan_prefix(link_prefix(a, b).as_bytes()) {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    pub fn all_links(&self) -> Result<Vec<LinkRecord>> {
        decode_all(&self.links)
    }

    pub fn delete_link(&self, key: &str) -> Result<()> {
        self.links.remove(key.as_bytes())?;
        Ok(())
    }

    // ---- uplink records ----

    pub fn upsert_uplink(&self, record: &UplinkRecord) -> Result<()> {
        let key = uplink_key(&record.ground, &record.satellite);
        self.uplinks
            .insert(key.as_bytes(), serde_json::to_vec(record)?)?;
        Ok(())
    }

    pub fn get_uplink(&self, ground: &str, satellite: &str) -> Result<Option<UplinkRecord>> {
        decode_opt(self.uplinks.get(uplink_key(ground, satellite).as_bytes())?)
    }

    /// All uplinks persisted for one ground station or vessel.
    pub fn uplinks_for(&self, ground: &str) -> Result<Vec<UplinkRecord>> {
        let mut out = Vec::new();
        for item in self.uplinks.scan_prefix(format!("{}|", ground).as_bytes()) {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    pub fn all_uplinks(&self) -> Result<Vec<UplinkRecord>> {
        decode_all(&self.uplinks)
    }

    pub fn delete_uplink(&self, ground: &str, satellite: &str) -> Result<()> {
        self.uplinks
            .remove(uplink_key(ground, satellite).as_bytes())?;
        Ok(())
    }

    // ---- events & stats ----

    /// Append an event; keys are (millis, seq) so ordering survives bursts.
    pub fn append_event(&self, text: &str) -> Result<EventRecord> {
        let record = EventRecord {
            timestamp: Utc::now().timestamp(),
            event: text.to_string(),
        };
        let seq = self.event_seq.fetch_add(1, Ordering::Relaxed);
        let mut key = Vec::with_capacity(16);
        key.extend_from_slice(&(Utc::now().timestamp_millis() as u64).to_be_bytes());
        key.extend_from_slice(&seq.to_be_bytes());
        self.events.insert(key, serde_json::to_vec(&record)?)?;
        Ok(record)
    }

    pub fn recent_events(&self, count: usize) -> Result<Vec<EventRecord>> {
        let mut out = Vec::with_capacity(count);
        for item in self.events.iter().rev().take(count) {
            let (_, value) = item?;
            out.push(serde_json::from_slice(&value)?);
        }
        out.reverse();
        Ok(out)
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn append_stats(&self, doc: &serde_json::Value) -> Result<()> {
        let key = (Utc::now().timestamp_millis() as u64).to_be_bytes();
        self.stats.insert(key, serde_json::to_vec(doc)?)?;
        Ok(())
    }

    // ---- meta (allocator cursors) ----

    pub fn get_meta_u32(&self, key: &str) -> Result<Option<u32>> {
        Ok(self.meta.get(key.as_bytes())?.map(|v| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(&v[..4]);
            u32::from_be_bytes(buf)
        }))
    }

    pub fn set_meta_u32(&self, key: &str, value: u32) -> Result<()> {
        self.meta.insert(key.as_bytes(), &value.to_be_bytes())?;
        Ok(())
    }
}

fn decode_opt<T: for<'de> Deserialize<'de>>(value: Option<sled::IVec>) -> Result<Option<T>> {
    value
        .map(|v| serde_json::from_slice(&v).map_err(StoreError::from))
        .transpose()
}

fn decode_all<T: for<'de> Deserialize<'de>>(tree: &Tree) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for item in tree.iter() {
        let (_, value) = item?;
        out.push(serde_json::from_slice(&value)?);
    }
    Ok(out)
}
