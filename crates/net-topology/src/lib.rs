//! Network Topology Library
//!
//! The pure data side of the emulation: the labelled graph of satellites,
//! ground stations, and vessels; the R×N torus constructor; deterministic
//! IP/interface annotation; and OSPF/FRR configuration generation. Nothing
//! in here talks to the network — the dynamics engine and the controller
//! both consume this model.

use thiserror::Error;

pub mod addressing;
pub mod config;
pub mod frr;
pub mod graph;
pub mod torus;

pub use addressing::{annotate_graph, AddressPools};
pub use config::{parse_network_config, render_network_config, NetworkConfig};
pub use graph::{Edge, NetGraph, Node, NodeVariant};
pub use torus::create_network;

#[derive(Error, Debug)]
pub enum TopologyError {
    #[error("Unknown node: {0}")]
    UnknownNode(String),
    #[error("Duplicate node: {0}")]
    DuplicateNode(String),
    #[error("Address pool exhausted: {0}")]
    PoolExhausted(String),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, TopologyError>;
