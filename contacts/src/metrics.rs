//! Metrics exposed by the contact core.

use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct Peer {
    pub contact: String,
}

impl Peer {
    pub fn new(address: &str) -> Self {
        Self {
            contact: address.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PeerConnection {
    pub contact: String,
    pub direction: Direction,
}

impl PeerConnection {
    pub fn new(address: &str, inbound: bool) -> Self {
        Self {
            contact: address.to_string(),
            direction: if inbound {
                Direction::Inbound
            } else {
                Direction::Outbound
            },
        }
    }
}

/// Counter families shared by all contacts of a directory.
#[derive(Clone)]
pub struct Metrics {
    pub dial_attempts: Family<Peer, Counter>,
    pub connections_installed: Family<PeerConnection, Counter>,
    pub offers_rejected: Family<Peer, Counter>,
}

impl Metrics {
    pub fn new(registry: Arc<Mutex<Registry>>) -> Self {
        let metrics = Self {
            dial_attempts: Family::default(),
            connections_installed: Family::default(),
            offers_rejected: Family::default(),
        };
        {
            let mut registry = registry.lock().unwrap();
            registry.register(
                "dial_attempts",
                "number of outbound dial attempts",
                metrics.dial_attempts.clone(),
            );
            registry.register(
                "connections_installed",
                "connections installed as a contact's active connection",
                metrics.connections_installed.clone(),
            );
            registry.register(
                "offers_rejected",
                "connection offers rejected by arbitration",
                metrics.offers_rejected.clone(),
            );
        }
        metrics
    }
}
