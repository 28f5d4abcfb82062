//! The configuration snapshot the encoder consumes: parsed device
//! configuration plus the computed FIBs and layer-3 topology.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use nod_ir::acl::{Acl, LineAction};
use nod_ir::ip::{InterfaceAddress, Ip, Prefix};
use nod_ir::state::Edge;
use serde::{Deserialize, Serialize};

use crate::error::EncoderError;

pub const DEFAULT_VRF: &str = "default";

fn default_vrf() -> String {
    DEFAULT_VRF.to_string()
}

fn default_true() -> bool {
    true
}

fn default_permit() -> LineAction {
    LineAction::Permit
}

fn default_deny() -> LineAction {
    LineAction::Deny
}

/// An interface of one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InterfaceRef {
    pub node: String,
    pub iface: String,
}

impl InterfaceRef {
    pub fn new(node: impl Into<String>, iface: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            iface: iface.into(),
        }
    }
}

/// A VRF of one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VrfRef {
    pub node: String,
    pub vrf: String,
}

impl VrfRef {
    pub fn new(node: impl Into<String>, vrf: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            vrf: vrf.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceNat {
    /// ACL selecting the packets to translate; every packet when absent.
    #[serde(default)]
    pub acl: Option<String>,
    pub pool_start: Ip,
    pub pool_end: Ip,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    #[serde(default = "default_vrf")]
    pub vrf: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub addresses: Vec<InterfaceAddress>,
    #[serde(default)]
    pub incoming_filter: Option<String>,
    #[serde(default)]
    pub outgoing_filter: Option<String>,
    #[serde(default)]
    pub source_nats: Vec<SourceNat>,
    #[serde(default)]
    pub zone: Option<String>,
    /// Interface-level policy routing. Present only to be rejected.
    #[serde(default)]
    pub routing_policy: Option<String>,
}

impl Default for InterfaceConfig {
    fn default() -> Self {
        Self {
            vrf: default_vrf(),
            active: true,
            addresses: Vec::new(),
            incoming_filter: None,
            outgoing_filter: None,
            source_nats: Vec::new(),
            zone: None,
            routing_policy: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Zone {
    /// Filter for traffic from this zone to the device itself.
    pub inbound_filter: Option<String>,
}

/// A zone-pair filter applied to traffic leaving `to_zone` that entered
/// from `from_zone`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossZoneFilter {
    pub from_zone: String,
    pub to_zone: String,
    pub acl: String,
}

/// One FIB entry. `next_hop_ip` is absent for connected routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FibRoute {
    pub prefix: Prefix,
    pub interface: String,
    #[serde(default)]
    pub next_hop_ip: Option<Ip>,
}

impl FibRoute {
    pub fn connected(prefix: Prefix, interface: impl Into<String>) -> Self {
        Self {
            prefix,
            interface: interface.into(),
            next_hop_ip: None,
        }
    }

    pub fn via(prefix: Prefix, interface: impl Into<String>, next_hop: Ip) -> Self {
        Self {
            prefix,
            interface: interface.into(),
            next_hop_ip: Some(next_hop),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// VRFs beyond those named by interfaces and FIBs.
    #[serde(default)]
    pub vrfs: BTreeSet<String>,
    #[serde(default)]
    pub interfaces: BTreeMap<String, InterfaceConfig>,
    #[serde(default)]
    pub acls: BTreeMap<String, Acl>,
    /// Routes per VRF.
    #[serde(default)]
    pub fibs: BTreeMap<String, Vec<FibRoute>>,
    #[serde(default)]
    pub zones: BTreeMap<String, Zone>,
    #[serde(default)]
    pub cross_zone_filters: Vec<CrossZoneFilter>,
    #[serde(default = "default_deny")]
    pub default_cross_zone_action: LineAction,
    #[serde(default = "default_permit")]
    pub default_inbound_action: LineAction,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            vrfs: BTreeSet::new(),
            interfaces: BTreeMap::new(),
            acls: BTreeMap::new(),
            fibs: BTreeMap::new(),
            zones: BTreeMap::new(),
            cross_zone_filters: Vec::new(),
            default_cross_zone_action: default_deny(),
            default_inbound_action: default_permit(),
        }
    }
}

impl NodeConfig {
    /// Every VRF the node mentions.
    pub fn all_vrfs(&self) -> BTreeSet<String> {
        let mut out = self.vrfs.clone();
        out.extend(self.interfaces.values().map(|i| i.vrf.clone()));
        out.extend(self.fibs.keys().cloned());
        out
    }

    pub fn with_interface(mut self, name: impl Into<String>, iface: InterfaceConfig) -> Self {
        self.interfaces.insert(name.into(), iface);
        self
    }

    pub fn with_acl(mut self, acl: Acl) -> Self {
        self.acls.insert(acl.name.clone(), acl);
        self
    }

    pub fn with_routes(mut self, vrf: impl Into<String>, routes: Vec<FibRoute>) -> Self {
        self.fibs.entry(vrf.into()).or_default().extend(routes);
        self
    }
}

/// Configuration, FIBs and topology of a whole network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub nodes: BTreeMap<String, NodeConfig>,
    pub edges: Vec<Edge>,
    /// Interfaces whose traffic leaves the modeled network.
    pub flow_sinks: BTreeSet<InterfaceRef>,
}

impl Snapshot {
    pub fn from_json_str(text: &str) -> Result<Self, EncoderError> {
        serde_json::from_str(text).map_err(|e| EncoderError::Invalid(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, EncoderError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| EncoderError::Invalid(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn with_node(mut self, name: impl Into<String>, node: NodeConfig) -> Self {
        self.nodes.insert(name.into(), node);
        self
    }

    /// Add `edge` and its reverse.
    pub fn with_link(mut self, edge: Edge) -> Self {
        self.edges.push(edge.reversed());
        self.edges.push(edge);
        self
    }

    pub fn with_flow_sink(mut self, node: impl Into<String>, iface: impl Into<String>) -> Self {
        self.flow_sinks.insert(InterfaceRef::new(node, iface));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_json_fills_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let text = r#"{
            "nodes": {
                "r1": {
                    "interfaces": {
                        "eth0": { "addresses": ["10.0.0.1/24"], "incoming_filter": "in" }
                    },
                    "acls": {
                        "in": { "lines": [ { "action": "permit", "condition": "true" } ] }
                    },
                    "fibs": {
                        "default": [ { "prefix": "10.0.0.0/24", "interface": "eth0" } ]
                    }
                }
            },
            "flow_sinks": [ { "node": "r1", "iface": "eth0" } ]
        }"#;
        let snapshot = Snapshot::from_json_str(text)?;
        let r1 = &snapshot.nodes["r1"];
        let eth0 = &r1.interfaces["eth0"];
        assert_eq!(eth0.vrf, DEFAULT_VRF);
        assert!(eth0.active);
        assert_eq!(r1.default_inbound_action, LineAction::Permit);
        assert_eq!(r1.default_cross_zone_action, LineAction::Deny);
        assert_eq!(r1.fibs["default"][0].next_hop_ip, None);
        assert!(snapshot.edges.is_empty());
        assert!(snapshot.flow_sinks.contains(&InterfaceRef::new("r1", "eth0")));
        Ok(())
    }

    #[test]
    fn malformed_json_is_invalid() {
        assert!(matches!(
            Snapshot::from_json_str("{\"nodes\": 3}"),
            Err(EncoderError::Invalid(_))
        ));
    }
}
