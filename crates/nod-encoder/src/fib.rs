//! Longest-prefix-match route resolution into per-receiver forwarding
//! conditions on the destination IP.

use std::collections::{BTreeMap, BTreeSet};

use nod_ir::expr::BoolExpr;
use nod_ir::field::HeaderField;
use nod_ir::header_space::IpSpace;
use nod_ir::ip::{Ip, Prefix};
use nod_ir::simplify::simplify;
use nod_ir::state::Edge;

use crate::snapshot::{FibRoute, InterfaceRef};

/// Pseudo-interface of the synthesized catch-all route.
pub const DROP_NO_ROUTE: &str = "DROP_NO_ROUTE";
pub const NULL_INTERFACE: &str = "null_interface";

/// Where a routed packet goes next.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ForwardingAction {
    /// Out an interface along an edge. Flow-sink and neighbor-unreachable
    /// exits are pseudo-edges.
    Edge(Edge),
    NullRoute,
    NoRoute,
}

/// Null and loopback interfaces discard what is routed to them. Besides
/// [`NULL_INTERFACE`], that is a `null`, `loopback` or `lo` stem followed by
/// nothing but an optional unit number (`Null0`, `Loopback1`, `lo`).
pub fn is_null_interface(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower == NULL_INTERFACE
        || ["null", "loopback", "lo"].iter().any(|stem| {
            lower
                .strip_prefix(stem)
                .is_some_and(|unit| unit.chars().all(|c| c.is_ascii_digit()))
        })
}

/// The parts of the enabled topology route resolution reads.
pub(crate) struct Topology<'a> {
    pub interfaces: &'a BTreeMap<String, BTreeSet<String>>,
    pub flow_sinks: &'a BTreeSet<InterfaceRef>,
    pub edges: &'a BTreeSet<Edge>,
    pub addresses: &'a BTreeMap<InterfaceRef, BTreeSet<Ip>>,
}

impl Topology<'_> {
    fn interface_enabled(&self, node: &str, iface: &str) -> bool {
        self.interfaces
            .get(node)
            .is_some_and(|ifaces| ifaces.contains(iface))
    }

    fn neighbor_ips(&self, edge: &Edge) -> BTreeSet<Ip> {
        self.addresses
            .get(&InterfaceRef::new(&edge.node2, &edge.iface2))
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Candidate {
    prefix: Prefix,
    interface: String,
    next_hop: Option<Ip>,
}

impl Candidate {
    fn same_action(&self, other: &Candidate) -> bool {
        self.interface == other.interface && self.next_hop == other.next_hop
    }
}

fn dst_in(prefix: Prefix) -> BoolExpr {
    if prefix.len() == 0 {
        BoolExpr::True
    } else {
        BoolExpr::ip_in(HeaderField::DstIp, IpSpace::prefixes([prefix]))
    }
}

/// Match condition of every route: its prefix, minus every strictly more
/// specific prefix inside it that routes differently. Equal prefixes are
/// never excluded, so ECMP routes share traffic.
fn match_conditions(routes: &[Candidate]) -> Vec<BoolExpr> {
    routes
        .iter()
        .map(|r| {
            let mut conjuncts = vec![dst_in(r.prefix)];
            for s in routes {
                if s.prefix.len() > r.prefix.len()
                    && r.prefix.contains_prefix(&s.prefix)
                    && !s.same_action(r)
                {
                    conjuncts.push(dst_in(s.prefix).not());
                }
            }
            simplify(&BoolExpr::and(conjuncts))
        })
        .collect()
}

/// Forwarding conditions of one VRF, keyed by receiver.
pub(crate) fn resolve_vrf(
    node: &str,
    routes: &[FibRoute],
    topology: &Topology<'_>,
) -> BTreeMap<ForwardingAction, BoolExpr> {
    let mut candidates: Vec<Candidate> = routes
        .iter()
        .filter(|r| {
            is_null_interface(&r.interface) || topology.interface_enabled(node, &r.interface)
        })
        .map(|r| Candidate {
            prefix: r.prefix,
            interface: r.interface.clone(),
            next_hop: r.next_hop_ip,
        })
        .collect();
    if !candidates.iter().any(|c| c.prefix.len() == 0) {
        candidates.push(Candidate {
            prefix: Prefix::new(Ip(0), 0),
            interface: DROP_NO_ROUTE.to_string(),
            next_hop: None,
        });
    }
    candidates.sort_by_key(|c| (c.prefix.network(), c.prefix.len()));
    candidates.dedup();

    let conditions = match_conditions(&candidates);
    let mut grouped: BTreeMap<ForwardingAction, Vec<BoolExpr>> = BTreeMap::new();
    for (route, condition) in candidates.iter().zip(conditions) {
        if condition.is_false() {
            continue;
        }
        if route.interface == DROP_NO_ROUTE {
            grouped.entry(ForwardingAction::NoRoute).or_default().push(condition);
            continue;
        }
        if is_null_interface(&route.interface) {
            grouped.entry(ForwardingAction::NullRoute).or_default().push(condition);
            continue;
        }
        if topology
            .flow_sinks
            .contains(&InterfaceRef::new(node, &route.interface))
        {
            grouped
                .entry(ForwardingAction::Edge(Edge::flow_sink(node, &route.interface)))
                .or_default()
                .push(condition);
            continue;
        }

        let mut resolved = Vec::new();
        for edge in topology
            .edges
            .iter()
            .filter(|e| e.node1 == node && e.iface1 == route.interface)
        {
            let neighbor_ips = topology.neighbor_ips(edge);
            let arp = match route.next_hop {
                Some(next_hop) if neighbor_ips.contains(&next_hop) => BoolExpr::True,
                Some(_) => BoolExpr::False,
                None if neighbor_ips.is_empty() => BoolExpr::False,
                None => BoolExpr::ip_in(HeaderField::DstIp, IpSpace::ips(neighbor_ips)),
            };
            if arp.is_false() {
                continue;
            }
            grouped
                .entry(ForwardingAction::Edge(edge.clone()))
                .or_default()
                .push(simplify(&BoolExpr::and(vec![condition.clone(), arp.clone()])));
            resolved.push(arp);
        }
        let unreachable = simplify(&BoolExpr::and(vec![
            condition,
            BoolExpr::or(resolved).not(),
        ]));
        if !unreachable.is_false() {
            grouped
                .entry(ForwardingAction::Edge(Edge::neighbor_unreachable(
                    node,
                    &route.interface,
                )))
                .or_default()
                .push(unreachable);
        }
    }

    grouped
        .into_iter()
        .map(|(action, conditions)| (action, simplify(&BoolExpr::or(conditions))))
        .filter(|(_, condition)| !condition.is_false())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use nod_ir::acl::Acl;
    use nod_ir::expr::Packet;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    struct Fixture {
        interfaces: BTreeMap<String, BTreeSet<String>>,
        flow_sinks: BTreeSet<InterfaceRef>,
        edges: BTreeSet<Edge>,
        addresses: BTreeMap<InterfaceRef, BTreeSet<Ip>>,
    }

    impl Fixture {
        fn new() -> Result<Self, Box<dyn std::error::Error>> {
            let ifaces: BTreeSet<String> = ["eth0", "eth1", "eth2", "longhaul0"]
                .iter()
                .map(|s| s.to_string())
                .collect();
            let mut addresses = BTreeMap::new();
            addresses.insert(
                InterfaceRef::new("r2", "e0"),
                BTreeSet::from(["10.0.1.2".parse()?]),
            );
            addresses.insert(
                InterfaceRef::new("r3", "e0"),
                BTreeSet::from(["10.0.2.2".parse()?]),
            );
            Ok(Self {
                interfaces: BTreeMap::from([("r1".to_string(), ifaces)]),
                flow_sinks: BTreeSet::from([InterfaceRef::new("r1", "eth2")]),
                edges: BTreeSet::from([
                    Edge::new("r1", "eth0", "r2", "e0"),
                    Edge::new("r1", "eth1", "r3", "e0"),
                ]),
                addresses,
            })
        }

        fn topology(&self) -> Topology<'_> {
            Topology {
                interfaces: &self.interfaces,
                flow_sinks: &self.flow_sinks,
                edges: &self.edges,
                addresses: &self.addresses,
            }
        }
    }

    fn matching(
        conditions: &BTreeMap<ForwardingAction, BoolExpr>,
        dst: &str,
    ) -> Result<Vec<ForwardingAction>, Box<dyn std::error::Error>> {
        let ip: Ip = dst.parse()?;
        let packet = Packet::new().with(HeaderField::DstIp, ip.as_u64());
        let acls: BTreeMap<String, Acl> = BTreeMap::new();
        let mut out = Vec::new();
        for (action, condition) in conditions {
            if condition.eval(&packet, &acls)? {
                out.push(action.clone());
            }
        }
        Ok(out)
    }

    #[test]
    fn longest_prefix_wins_and_missing_default_drops() -> TestResult {
        let fixture = Fixture::new()?;
        let routes = vec![
            FibRoute::via("10.0.0.0/8".parse()?, "eth0", "10.0.1.2".parse()?),
            FibRoute::via("10.1.0.0/16".parse()?, "eth1", "10.0.2.2".parse()?),
            FibRoute::connected("192.168.0.0/24".parse()?, "null0"),
        ];
        let conditions = resolve_vrf("r1", &routes, &fixture.topology());
        let to_r2 = ForwardingAction::Edge(Edge::new("r1", "eth0", "r2", "e0"));
        let to_r3 = ForwardingAction::Edge(Edge::new("r1", "eth1", "r3", "e0"));
        assert_eq!(matching(&conditions, "10.2.3.4")?, vec![to_r2]);
        assert_eq!(matching(&conditions, "10.1.3.4")?, vec![to_r3]);
        assert_eq!(matching(&conditions, "192.168.0.9")?, vec![ForwardingAction::NullRoute]);
        assert_eq!(matching(&conditions, "8.8.8.8")?, vec![ForwardingAction::NoRoute]);
        Ok(())
    }

    #[test]
    fn equal_prefixes_share_traffic() -> TestResult {
        let fixture = Fixture::new()?;
        let routes = vec![
            FibRoute::via("10.0.0.0/8".parse()?, "eth0", "10.0.1.2".parse()?),
            FibRoute::via("10.0.0.0/8".parse()?, "eth1", "10.0.2.2".parse()?),
            FibRoute::via("0.0.0.0/0".parse()?, "eth1", "10.0.2.2".parse()?),
        ];
        let conditions = resolve_vrf("r1", &routes, &fixture.topology());
        let hits = matching(&conditions, "10.9.9.9")?;
        assert_eq!(hits.len(), 2);
        assert!(!conditions.contains_key(&ForwardingAction::NoRoute));
        Ok(())
    }

    #[test]
    fn failed_arp_and_flow_sinks_use_pseudo_edges() -> TestResult {
        let fixture = Fixture::new()?;
        let routes = vec![
            FibRoute::via("10.0.0.0/8".parse()?, "eth0", "10.0.1.99".parse()?),
            FibRoute::connected("10.0.2.0/24".parse()?, "eth1"),
            FibRoute::connected("172.16.0.0/12".parse()?, "eth2"),
        ];
        let conditions = resolve_vrf("r1", &routes, &fixture.topology());
        assert_eq!(
            matching(&conditions, "10.5.5.5")?,
            vec![ForwardingAction::Edge(Edge::neighbor_unreachable("r1", "eth0"))]
        );
        assert_eq!(
            matching(&conditions, "10.0.2.2")?,
            vec![ForwardingAction::Edge(Edge::new("r1", "eth1", "r3", "e0"))]
        );
        assert_eq!(
            matching(&conditions, "10.0.2.7")?,
            vec![ForwardingAction::Edge(Edge::neighbor_unreachable("r1", "eth1"))]
        );
        assert_eq!(
            matching(&conditions, "172.16.1.1")?,
            vec![ForwardingAction::Edge(Edge::flow_sink("r1", "eth2"))]
        );
        Ok(())
    }

    #[test]
    fn routes_through_disabled_interfaces_are_ignored() -> TestResult {
        let fixture = Fixture::new()?;
        let routes = vec![FibRoute::connected("10.0.0.0/8".parse()?, "eth9")];
        let conditions = resolve_vrf("r1", &routes, &fixture.topology());
        assert_eq!(matching(&conditions, "10.0.0.1")?, vec![ForwardingAction::NoRoute]);
        Ok(())
    }

    #[test]
    fn only_null_and_loopback_names_discard() -> TestResult {
        for name in ["null0", "Null0", NULL_INTERFACE, "lo", "lo0", "Loopback1"] {
            assert!(is_null_interface(name), "{name}");
        }
        for name in ["longhaul0", "local", "lo-uplink", "nullify", "eth0"] {
            assert!(!is_null_interface(name), "{name}");
        }

        let fixture = Fixture::new()?;
        let routes = vec![FibRoute::connected("10.0.0.0/8".parse()?, "longhaul0")];
        let conditions = resolve_vrf("r1", &routes, &fixture.topology());
        assert_eq!(
            matching(&conditions, "10.0.0.1")?,
            vec![ForwardingAction::Edge(Edge::neighbor_unreachable("r1", "longhaul0"))]
        );
        Ok(())
    }
}
