//! Deterministic address allocation.
//!
//! Two configured supernets feed everything: node loopbacks are sequential
//! /32 hosts from the loopback pool, and point-to-point subnets are /30
//! slices consumed in order from the link pool. `annotate_graph` burns the
//! low indices deterministically for the static topology; the controller's
//! runtime allocators resume after them so restart without state cannot
//! collide with the annotation, and restart with state resumes from the
//! persisted cursor.

use std::net::Ipv4Addr;

use ipnet::Ipv4Net;

use crate::graph::NetGraph;
use crate::{Result, TopologyError};

pub const DEFAULT_LOOPBACK_SUPERNET: &str = "10.1.0.0/16";
pub const DEFAULT_LINK_SUPERNET: &str = "10.15.0.0/16";

#[derive(Debug, Clone, Copy)]
pub struct AddressPools {
    /// Supernet for node loopbacks (/32 per node).
    pub loopback: Ipv4Net,
    /// Supernet for point-to-point links (/30 per link).
    pub link: Ipv4Net,
}

impl AddressPools {
    pub fn new(loopback: Ipv4Net, link: Ipv4Net) -> Self {
        Self { loopback, link }
    }

    /// Pool pair from CIDR strings, typically environment-sourced.
    pub fn from_strs(loopback: &str, link: &str) -> Result<Self> {
        let loopback = loopback
            .parse()
            .map_err(|e| TopologyError::InvalidConfig(format!("loopback supernet: {}", e)))?;
        let link = link
            .parse()
            .map_err(|e| TopologyError::InvalidConfig(format!("link supernet: {}", e)))?;
        Ok(Self { loopback, link })
    }

    pub fn defaults() -> Result<Self> {
        Self::from_strs(DEFAULT_LOOPBACK_SUPERNET, DEFAULT_LINK_SUPERNET)
    }
}

/// Loopback host at 1-based `index` within the pool.
pub fn loopback_at(pool: Ipv4Net, index: u32) -> Result<Ipv4Addr> {
    let capacity = 1u64 << (32 - pool.prefix_len());
    if index as u64 + 1 >= capacity {
        return Err(TopologyError::PoolExhausted(format!(
            "loopback pool {} at index {}",
            pool, index
        )));
    }
    Ok(Ipv4Addr::from(u32::from(pool.network()) + index))
}

/// /30 slice at 1-based `index` within the pool.
pub fn subnet_at(pool: Ipv4Net, index: u32) -> Result<Ipv4Net> {
    let capacity = 1u64 << (32 - pool.prefix_len());
    let offset = index as u64 * 4;
    if offset + 4 > capacity {
        return Err(TopologyError::PoolExhausted(format!(
            "link pool {} at index {}",
            pool, index
        )));
    }
    let base = Ipv4Addr::from(u32::from(pool.network()) + offset as u32);
    Ipv4Net::new(base, 30).map_err(|e| TopologyError::InvalidConfig(e.to_string()))
}

/// The two usable hosts of a /30.
pub fn subnet_hosts(subnet: Ipv4Net) -> (Ipv4Addr, Ipv4Addr) {
    let base = u32::from(subnet.network());
    (Ipv4Addr::from(base + 1), Ipv4Addr::from(base + 2))
}

/// Stateful cursor over /30 slices of the link pool.
#[derive(Debug, Clone)]
pub struct SubnetAllocator {
    pool: Ipv4Net,
    next: u32,
}

impl SubnetAllocator {
    pub fn new(pool: Ipv4Net) -> Self {
        Self { pool, next: 1 }
    }

    /// Resume from a persisted cursor (next index to hand out).
    pub fn resume_at(pool: Ipv4Net, next: u32) -> Self {
        Self { pool, next }
    }

    /// Allocator positioned after everything `annotate_graph` consumed.
    pub fn after_annotation(pool: Ipv4Net, graph: &NetGraph) -> Self {
        Self {
            pool,
            next: graph.edge_count() as u32 + 1,
        }
    }

    pub fn next_subnet(&mut self) -> Result<Ipv4Net> {
        let subnet = subnet_at(self.pool, self.next)?;
        self.next += 1;
        Ok(subnet)
    }

    pub fn cursor(&self) -> u32 {
        self.next
    }
}

/// Stateful cursor over loopback hosts.
#[derive(Debug, Clone)]
pub struct LoopbackAllocator {
    pool: Ipv4Net,
    next: u32,
}

impl LoopbackAllocator {
    pub fn new(pool: Ipv4Net) -> Self {
        Self { pool, next: 1 }
    }

    pub fn resume_at(pool: Ipv4Net, next: u32) -> Self {
        Self { pool, next }
    }

    pub fn next_ip(&mut self) -> Result<Ipv4Addr> {
        let ip = loopback_at(self.pool, self.next)?;
        self.next += 1;
        Ok(ip)
    }

    pub fn cursor(&self) -> u32 {
        self.next
    }
}

/// Annotate the graph with addresses and interface names.
///
/// Pure function of (graph structure, pools): any previous annotation is
/// cleared first, so repeated calls on the same input produce byte-identical
/// results. Loopbacks go to nodes in name order; edge subnets and interface
/// names follow edge-arena order.
pub fn annotate_graph(graph: &mut NetGraph, pools: &AddressPools) -> Result<()> {
    for node in graph.nodes_mut() {
        node.loopback = None;
        node.if_count = 0;
    }
    for edge in graph.edges_mut() {
        edge.subnet = None;
        edge.addrs.clear();
        edge.interfaces.clear();
    }

    let loopback_pool = pools.loopback;
    let mut index = 1u32;
    for node in graph.nodes_mut() {
        node.loopback = Some(loopback_at(loopback_pool, index)?);
        index += 1;
    }

    let link_pool = pools.link;
    let edge_endpoints: Vec<(String, String)> = graph
        .edges()
        .map(|e| (e.node1.clone(), e.node2.clone()))
        .collect();

    for (idx, (n1, n2)) in edge_endpoints.iter().enumerate() {
        let subnet = subnet_at(link_pool, idx as u32 + 1)?;
        let (ip1, ip2) = subnet_hosts(subnet);

        let intf1 = graph
            .node_mut(n1)
            .ok_or_else(|| TopologyError::UnknownNode(n1.clone()))?
            .next_interface();
        let intf2 = graph
            .node_mut(n2)
            .ok_or_else(|| TopologyError::UnknownNode(n2.clone()))?
            .next_interface();

        let edge = graph
            .edges_mut()
            .nth(idx)
            .ok_or_else(|| TopologyError::InvalidConfig("edge index out of range".into()))?;
        edge.subnet = Some(subnet);
        edge.addrs.insert(n1.clone(), ip1);
        edge.addrs.insert(n2.clone(), ip2);
        edge.interfaces.insert(n1.clone(), intf1);
        edge.interfaces.insert(n2.clone(), intf2);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::torus::create_network;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn annotated(rings: u32, ring_nodes: u32) -> NetGraph {
        let epoch = NaiveDate::from_ymd_opt(2026, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let grounds = vec![("G_sdg".to_string(), 32.7, -117.2)];
        let mut g = create_network(rings, ring_nodes, true, &grounds, &[], 53.9, 550.0, epoch)
            .unwrap();
        annotate_graph(&mut g, &AddressPools::defaults().unwrap()).unwrap();
        g
    }

    #[test]
    fn loopbacks_unique_and_in_pool() {
        let g = annotated(4, 4);
        let pools = AddressPools::defaults().unwrap();
        let mut seen = HashSet::new();
        for node in g.nodes() {
            let ip = node.loopback.expect("loopback assigned");
            assert!(pools.loopback.contains(&ip));
            assert!(seen.insert(ip), "duplicate loopback {}", ip);
        }
    }

    #[test]
    fn edge_subnets_disjoint() {
        let g = annotated(4, 4);
        let mut seen = HashSet::new();
        for edge in g.edges() {
            let subnet = edge.subnet.expect("subnet assigned");
            assert_eq!(subnet.prefix_len(), 30);
            assert!(seen.insert(subnet), "duplicate subnet {}", subnet);
        }
    }

    #[test]
    fn edge_maps_carry_exactly_the_endpoints() {
        let g = annotated(2, 2);
        for edge in g.edges() {
            let keys: Vec<&String> = edge.addrs.keys().collect();
            assert_eq!(keys.len(), 2);
            assert!(edge.addrs.contains_key(&edge.node1));
            assert!(edge.addrs.contains_key(&edge.node2));
            assert!(edge.interfaces.contains_key(&edge.node1));
            assert!(edge.interfaces.contains_key(&edge.node2));
            assert_ne!(edge.addrs[&edge.node1], edge.addrs[&edge.node2]);
        }
    }

    #[test]
    fn interface_names_follow_node_counter() {
        let g = annotated(2, 2);
        // Every satellite in a 2x2 torus has degree 4.
        let sat = g.node("R0_0").unwrap();
        assert_eq!(sat.if_count, 4);
        let names: HashSet<String> = g
            .edges()
            .filter(|e| e.node1 == "R0_0" || e.node2 == "R0_0")
            .map(|e| e.interfaces["R0_0"].clone())
            .collect();
        assert_eq!(names.len(), 4);
        assert!(names.contains("R0_0-eth1"));
        assert!(names.contains("R0_0-eth4"));
    }

    #[test]
    fn annotation_is_idempotent() {
        let mut g = annotated(3, 3);
        let before: Vec<_> = g.edges().cloned().collect();
        let loopbacks: Vec<_> = g.nodes().map(|n| n.loopback).collect();

        annotate_graph(&mut g, &AddressPools::defaults().unwrap()).unwrap();

        let after: Vec<_> = g.edges().cloned().collect();
        assert_eq!(before, after);
        assert_eq!(loopbacks, g.nodes().map(|n| n.loopback).collect::<Vec<_>>());
    }

    #[test]
    fn runtime_allocator_resumes_past_annotation() {
        let g = annotated(2, 2);
        let pools = AddressPools::defaults().unwrap();
        let mut alloc = SubnetAllocator::after_annotation(pools.link, &g);

        let annotated_subnets: HashSet<Ipv4Net> =
            g.edges().map(|e| e.subnet.unwrap()).collect();
        for _ in 0..16 {
            let s = alloc.next_subnet().unwrap();
            assert!(!annotated_subnets.contains(&s), "collision on {}", s);
        }
    }

    #[test]
    fn pool_exhaustion_is_an_error() {
        let small: Ipv4Net = "10.99.0.0/29".parse().unwrap();
        assert!(subnet_at(small, 1).is_ok());
        assert!(subnet_at(small, 2).is_err());

        let tiny: Ipv4Net = "10.99.0.0/30".parse().unwrap();
        assert!(loopback_at(tiny, 1).is_ok());
        assert!(loopback_at(tiny, 3).is_err());
    }

    proptest! {
        #[test]
        fn allocations_disjoint_for_any_small_torus(
            rings in 2u32..6,
            ring_nodes in 2u32..6,
            extra in 0u32..12,
        ) {
            let g = annotated(rings, ring_nodes);
            let pools = AddressPools::defaults().unwrap();

            let mut subnets: HashSet<Ipv4Net> =
                g.edges().map(|e| e.subnet.unwrap()).collect();
            prop_assert_eq!(subnets.len(), g.edge_count());

            // Runtime uplink allocations stay disjoint from the annotation
            // and from each other.
            let mut alloc = SubnetAllocator::after_annotation(pools.link, &g);
            for _ in 0..extra {
                let s = alloc.next_subnet().unwrap();
                prop_assert!(subnets.insert(s));
            }
        }
    }
}
