//! Relations over packet headers: the points of a packet's journey through
//! the network.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::field::escape_name_part;

/// Node name used for the receiving end of a pseudo-edge.
pub const NONE_NODE: &str = "(none)";
/// Receiving interface of the pseudo-edge leading into a flow sink.
pub const FLOW_SINK_TERMINATION: &str = "flow_sink_termination";
/// Receiving interface of the pseudo-edge taken when ARP fails.
pub const NEIGHBOR_UNREACHABLE: &str = "neighbor_unreachable";

/// A directed layer-3 adjacency from `node1:iface1` to `node2:iface2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Edge {
    pub node1: String,
    pub iface1: String,
    pub node2: String,
    pub iface2: String,
}

impl Edge {
    pub fn new(
        node1: impl Into<String>,
        iface1: impl Into<String>,
        node2: impl Into<String>,
        iface2: impl Into<String>,
    ) -> Self {
        Self {
            node1: node1.into(),
            iface1: iface1.into(),
            node2: node2.into(),
            iface2: iface2.into(),
        }
    }

    /// The pseudo-edge out of a flow-sink interface.
    pub fn flow_sink(node: impl Into<String>, iface: impl Into<String>) -> Self {
        Self::new(node, iface, NONE_NODE, FLOW_SINK_TERMINATION)
    }

    /// The pseudo-edge taken when no neighbor answers for the next hop.
    pub fn neighbor_unreachable(node: impl Into<String>, iface: impl Into<String>) -> Self {
        Self::new(node, iface, NONE_NODE, NEIGHBOR_UNREACHABLE)
    }

    pub fn is_flow_sink_termination(&self) -> bool {
        self.node2 == NONE_NODE && self.iface2 == FLOW_SINK_TERMINATION
    }

    pub fn is_neighbor_unreachable(&self) -> bool {
        self.node2 == NONE_NODE && self.iface2 == NEIGHBOR_UNREACHABLE
    }

    pub fn is_pseudo(&self) -> bool {
        self.node2 == NONE_NODE
    }

    pub fn reversed(&self) -> Self {
        Self::new(&self.node2, &self.iface2, &self.node1, &self.iface1)
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.node1, self.iface1, self.node2, self.iface2
        )
    }
}

/// Where an ACL is evaluated.
///
/// Every site has its own copy of the ACL's relations, so one derivation can
/// evaluate the same ACL on the different headers seen along its path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AclSite {
    /// Not attached to a forwarding step.
    Standalone,
    /// Incoming filter of an interface.
    Incoming(String),
    /// Inbound zone filter of the node.
    ZoneInbound,
    /// Source-NAT guards of an interface, on the pre-NAT header.
    SourceNat(String),
    /// Outgoing and zone-outgoing filters of an interface, on the post-NAT
    /// header.
    Outgoing(String),
}

impl AclSite {
    fn tag(&self) -> Option<String> {
        match self {
            AclSite::Standalone => None,
            AclSite::Incoming(iface) => Some(format!("in={iface}")),
            AclSite::ZoneInbound => Some("zone-in".to_string()),
            AclSite::SourceNat(iface) => Some(format!("nat={iface}")),
            AclSite::Outgoing(iface) => Some(format!("out={iface}")),
        }
    }
}

/// One parameterized relation. Identity is the variant plus its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StateExpr {
    OriginateVrf(String, String),
    OriginateInterfaceLink(String, String),
    Originate(String),

    PreInInterface(String, String),
    PostInInterface(String, String),
    PostInVrf(String, String),
    PostIn(String),
    PreOut(String),

    PreOutEdge(Edge),
    PreOutEdgePostNat(Edge),
    PostOutInterface(String, String),

    /// (node, acl, site, line)
    AclLineMatch(String, String, AclSite, usize),
    AclLineNoMatch(String, String, AclSite, usize),
    AclPermit(String, String, AclSite),
    AclDeny(String, String, AclSite),

    NodeAccept(String),
    NodeDrop(String),
    NodeDropAcl(String),
    NodeDropAclIn(String),
    NodeDropAclOut(String),
    NodeDropNoRoute(String),
    NodeDropNullRoute(String),
    NodeNeighborUnreachable(String),
    NodeTransit(String),

    Accept,
    Drop,
    DropAcl,
    DropAclIn,
    DropAclOut,
    DropNoRoute,
    DropNullRoute,
    NeighborUnreachableOrExitsNetwork,

    Query,
    NumberedQuery(usize),
}

impl StateExpr {
    pub fn variant_name(&self) -> &'static str {
        match self {
            StateExpr::OriginateVrf(..) => "OriginateVrf",
            StateExpr::OriginateInterfaceLink(..) => "OriginateInterfaceLink",
            StateExpr::Originate(_) => "Originate",
            StateExpr::PreInInterface(..) => "PreInInterface",
            StateExpr::PostInInterface(..) => "PostInInterface",
            StateExpr::PostInVrf(..) => "PostInVrf",
            StateExpr::PostIn(_) => "PostIn",
            StateExpr::PreOut(_) => "PreOut",
            StateExpr::PreOutEdge(_) => "PreOutEdge",
            StateExpr::PreOutEdgePostNat(_) => "PreOutEdgePostNat",
            StateExpr::PostOutInterface(..) => "PostOutInterface",
            StateExpr::AclLineMatch(..) => "AclLineMatch",
            StateExpr::AclLineNoMatch(..) => "AclLineNoMatch",
            StateExpr::AclPermit(..) => "AclPermit",
            StateExpr::AclDeny(..) => "AclDeny",
            StateExpr::NodeAccept(_) => "NodeAccept",
            StateExpr::NodeDrop(_) => "NodeDrop",
            StateExpr::NodeDropAcl(_) => "NodeDropAcl",
            StateExpr::NodeDropAclIn(_) => "NodeDropAclIn",
            StateExpr::NodeDropAclOut(_) => "NodeDropAclOut",
            StateExpr::NodeDropNoRoute(_) => "NodeDropNoRoute",
            StateExpr::NodeDropNullRoute(_) => "NodeDropNullRoute",
            StateExpr::NodeNeighborUnreachable(_) => "NodeNeighborUnreachable",
            StateExpr::NodeTransit(_) => "NodeTransit",
            StateExpr::Accept => "Accept",
            StateExpr::Drop => "Drop",
            StateExpr::DropAcl => "DropAcl",
            StateExpr::DropAclIn => "DropAclIn",
            StateExpr::DropAclOut => "DropAclOut",
            StateExpr::DropNoRoute => "DropNoRoute",
            StateExpr::DropNullRoute => "DropNullRoute",
            StateExpr::NeighborUnreachableOrExitsNetwork => "NeighborUnreachableOrExitsNetwork",
            StateExpr::Query => "Query",
            StateExpr::NumberedQuery(_) => "NumberedQuery",
        }
    }

    fn parameters(&self) -> Vec<String> {
        match self {
            StateExpr::OriginateVrf(a, b)
            | StateExpr::OriginateInterfaceLink(a, b)
            | StateExpr::PreInInterface(a, b)
            | StateExpr::PostInInterface(a, b)
            | StateExpr::PostInVrf(a, b)
            | StateExpr::PostOutInterface(a, b) => vec![a.clone(), b.clone()],
            StateExpr::AclPermit(n, acl, site) | StateExpr::AclDeny(n, acl, site) => {
                [n.clone(), acl.clone()].into_iter().chain(site.tag()).collect()
            }
            StateExpr::Originate(n)
            | StateExpr::PostIn(n)
            | StateExpr::PreOut(n)
            | StateExpr::NodeAccept(n)
            | StateExpr::NodeDrop(n)
            | StateExpr::NodeDropAcl(n)
            | StateExpr::NodeDropAclIn(n)
            | StateExpr::NodeDropAclOut(n)
            | StateExpr::NodeDropNoRoute(n)
            | StateExpr::NodeDropNullRoute(n)
            | StateExpr::NodeNeighborUnreachable(n)
            | StateExpr::NodeTransit(n) => vec![n.clone()],
            StateExpr::PreOutEdge(e) | StateExpr::PreOutEdgePostNat(e) => vec![
                e.node1.clone(),
                e.iface1.clone(),
                e.node2.clone(),
                e.iface2.clone(),
            ],
            StateExpr::AclLineMatch(n, acl, site, line)
            | StateExpr::AclLineNoMatch(n, acl, site, line) => [n.clone(), acl.clone()]
                .into_iter()
                .chain(site.tag())
                .chain([line.to_string()])
                .collect(),
            StateExpr::NumberedQuery(i) => vec![i.to_string()],
            StateExpr::Accept
            | StateExpr::Drop
            | StateExpr::DropAcl
            | StateExpr::DropAclIn
            | StateExpr::DropAclOut
            | StateExpr::DropNoRoute
            | StateExpr::DropNullRoute
            | StateExpr::NeighborUnreachableOrExitsNetwork
            | StateExpr::Query => Vec::new(),
        }
    }

    /// Deterministic relation name, e.g. `PostInInterface:r1:eth0`.
    ///
    /// Parameters are escaped, so distinct relations get distinct names and
    /// a name never contains `|` or `\`.
    pub fn relation_name(&self) -> String {
        let mut name = self.variant_name().to_string();
        for param in self.parameters() {
            name.push(':');
            name.push_str(&escape_name_part(&param));
        }
        name
    }

    /// The node this relation is local to, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            StateExpr::OriginateVrf(n, _)
            | StateExpr::OriginateInterfaceLink(n, _)
            | StateExpr::Originate(n)
            | StateExpr::PreInInterface(n, _)
            | StateExpr::PostInInterface(n, _)
            | StateExpr::PostInVrf(n, _)
            | StateExpr::PostIn(n)
            | StateExpr::PreOut(n)
            | StateExpr::PostOutInterface(n, _)
            | StateExpr::AclLineMatch(n, ..)
            | StateExpr::AclLineNoMatch(n, ..)
            | StateExpr::AclPermit(n, ..)
            | StateExpr::AclDeny(n, ..)
            | StateExpr::NodeAccept(n)
            | StateExpr::NodeDrop(n)
            | StateExpr::NodeDropAcl(n)
            | StateExpr::NodeDropAclIn(n)
            | StateExpr::NodeDropAclOut(n)
            | StateExpr::NodeDropNoRoute(n)
            | StateExpr::NodeDropNullRoute(n)
            | StateExpr::NodeNeighborUnreachable(n)
            | StateExpr::NodeTransit(n) => Some(n),
            StateExpr::PreOutEdge(e) | StateExpr::PreOutEdgePostNat(e) => Some(&e.node1),
            StateExpr::Accept
            | StateExpr::Drop
            | StateExpr::DropAcl
            | StateExpr::DropAclIn
            | StateExpr::DropAclOut
            | StateExpr::DropNoRoute
            | StateExpr::DropNullRoute
            | StateExpr::NeighborUnreachableOrExitsNetwork
            | StateExpr::Query
            | StateExpr::NumberedQuery(_) => None,
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(self, StateExpr::Query | StateExpr::NumberedQuery(_))
    }

    pub fn is_origination(&self) -> bool {
        matches!(
            self,
            StateExpr::OriginateVrf(..) | StateExpr::OriginateInterfaceLink(..)
        )
    }
}

impl fmt::Display for StateExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.relation_name())
    }
}

/// Final fate of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    Accepted,
    DeniedIn,
    DeniedOut,
    NoRoute,
    NullRouted,
    NeighborUnreachableOrExitsNetwork,
}

impl Disposition {
    pub const ALL: [Disposition; 6] = [
        Disposition::Accepted,
        Disposition::DeniedIn,
        Disposition::DeniedOut,
        Disposition::NoRoute,
        Disposition::NullRouted,
        Disposition::NeighborUnreachableOrExitsNetwork,
    ];

    /// The network-wide relation for this disposition.
    pub fn global_state(self) -> StateExpr {
        match self {
            Disposition::Accepted => StateExpr::Accept,
            Disposition::DeniedIn => StateExpr::DropAclIn,
            Disposition::DeniedOut => StateExpr::DropAclOut,
            Disposition::NoRoute => StateExpr::DropNoRoute,
            Disposition::NullRouted => StateExpr::DropNullRoute,
            Disposition::NeighborUnreachableOrExitsNetwork => {
                StateExpr::NeighborUnreachableOrExitsNetwork
            }
        }
    }

    /// The per-node relation for this disposition.
    pub fn node_state(self, node: &str) -> StateExpr {
        let node = node.to_string();
        match self {
            Disposition::Accepted => StateExpr::NodeAccept(node),
            Disposition::DeniedIn => StateExpr::NodeDropAclIn(node),
            Disposition::DeniedOut => StateExpr::NodeDropAclOut(node),
            Disposition::NoRoute => StateExpr::NodeDropNoRoute(node),
            Disposition::NullRouted => StateExpr::NodeDropNullRoute(node),
            Disposition::NeighborUnreachableOrExitsNetwork => {
                StateExpr::NodeNeighborUnreachable(node)
            }
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Disposition::Accepted => "ACCEPTED",
            Disposition::DeniedIn => "DENIED_IN",
            Disposition::DeniedOut => "DENIED_OUT",
            Disposition::NoRoute => "NO_ROUTE",
            Disposition::NullRouted => "NULL_ROUTED",
            Disposition::NeighborUnreachableOrExitsNetwork => {
                "NEIGHBOR_UNREACHABLE_OR_EXITS_NETWORK"
            }
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn relation_names_are_deterministic() {
        let s = StateExpr::PostInInterface("r1".into(), "eth0".into());
        assert_eq!(s.relation_name(), "PostInInterface:r1:eth0");
        assert_eq!(StateExpr::Accept.relation_name(), "Accept");
        assert_eq!(
            StateExpr::AclLineMatch("r1".into(), "acl".into(), AclSite::Standalone, 3)
                .relation_name(),
            "AclLineMatch:r1:acl:3"
        );
        assert_eq!(
            StateExpr::AclPermit("r1".into(), "acl".into(), AclSite::Outgoing("eth0".into()))
                .relation_name(),
            "AclPermit:r1:acl:out=eth0"
        );
        let edge = Edge::new("a", "e0", "b", "e1");
        assert_eq!(
            StateExpr::PreOutEdge(edge).relation_name(),
            "PreOutEdge:a:e0:b:e1"
        );
    }

    #[test]
    fn relation_names_never_contain_quote_characters() {
        let s = StateExpr::AclPermit("r|1".into(), "a\\b".into(), AclSite::Standalone);
        let name = s.relation_name();
        assert!(!name.contains('|'));
        assert!(!name.contains('\\'));
    }

    #[test]
    fn relation_names_are_injective() {
        let a = StateExpr::PostInInterface("a:b".into(), "c".into());
        let b = StateExpr::PostInInterface("a".into(), "b:c".into());
        assert_ne!(a.relation_name(), b.relation_name());
        let piped = StateExpr::PostIn("r|1".into());
        let underscored = StateExpr::PostIn("r_1".into());
        assert_ne!(piped.relation_name(), underscored.relation_name());
        let standalone = StateExpr::AclPermit("r1".into(), "a".into(), AclSite::Standalone);
        let incoming =
            StateExpr::AclPermit("r1".into(), "a".into(), AclSite::Incoming("e".into()));
        assert_ne!(standalone.relation_name(), incoming.relation_name());
    }

    #[test]
    fn states_have_set_semantics() {
        let mut set = BTreeSet::new();
        set.insert(StateExpr::PostIn("r1".into()));
        set.insert(StateExpr::PostIn("r1".into()));
        set.insert(StateExpr::PostIn("r2".into()));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn pseudo_edges() {
        let sink = Edge::flow_sink("r1", "eth9");
        assert!(sink.is_flow_sink_termination());
        assert!(sink.is_pseudo());
        assert!(!sink.is_neighbor_unreachable());
        assert!(Edge::neighbor_unreachable("r1", "eth0").is_neighbor_unreachable());
        assert!(!Edge::new("a", "b", "c", "d").is_pseudo());
    }

    #[test]
    fn dispositions_map_to_states() {
        assert_eq!(Disposition::Accepted.global_state(), StateExpr::Accept);
        assert_eq!(
            Disposition::NoRoute.node_state("r1"),
            StateExpr::NodeDropNoRoute("r1".into())
        );
        let json = serde_json::to_string(&Disposition::DeniedIn).expect("serialize");
        assert_eq!(json, "\"DENIED_IN\"");
        assert_eq!(Disposition::DeniedIn.to_string(), "DENIED_IN");
    }
}
