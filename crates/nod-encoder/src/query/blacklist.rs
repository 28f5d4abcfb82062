use std::collections::BTreeSet;

use nod_ir::expr::BoolExpr;
use nod_ir::field::HeaderField;
use nod_ir::header_space::IpSpace;
use nod_ir::ip::Ip;
use nod_ir::program::Rule;
use nod_ir::state::{Edge, StateExpr};

use super::{QueryProgram, QuerySynthesizer};
use crate::error::EncoderError;
use crate::input::SynthesizerInput;
use crate::snapshot::InterfaceRef;

/// Destinations that are not addresses of anything blacklisted. Used next
/// to a differential query so removed interfaces are not reported as lost
/// destinations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlacklistDstIp {
    pub nodes: BTreeSet<String>,
    pub interfaces: BTreeSet<InterfaceRef>,
    pub edges: BTreeSet<Edge>,
}

impl BlacklistDstIp {
    fn blacklisted_ips(&self, input: &SynthesizerInput) -> BTreeSet<Ip> {
        let mut ifaces: BTreeSet<InterfaceRef> = self.interfaces.clone();
        for edge in &self.edges {
            ifaces.insert(InterfaceRef::new(&edge.node1, &edge.iface1));
            ifaces.insert(InterfaceRef::new(&edge.node2, &edge.iface2));
        }
        let snapshot = input.snapshot();
        for node in &self.nodes {
            if let Some(config) = snapshot.nodes.get(node) {
                ifaces.extend(config.interfaces.keys().map(|i| InterfaceRef::new(node, i)));
            }
        }
        ifaces
            .iter()
            .filter_map(|r| snapshot.nodes.get(&r.node)?.interfaces.get(&r.iface))
            .flat_map(|iface| iface.addresses.iter().map(|a| a.ip))
            .collect()
    }
}

impl QuerySynthesizer for BlacklistDstIp {
    fn describe(&self) -> String {
        format!(
            "destinations outside {} node(s), {} interface(s), {} edge(s)",
            self.nodes.len(),
            self.interfaces.len(),
            self.edges.len()
        )
    }

    fn synthesize(&self, input: &SynthesizerInput) -> Result<QueryProgram, EncoderError> {
        let ips = self.blacklisted_ips(input);
        let guard = if ips.is_empty() {
            BoolExpr::True
        } else {
            BoolExpr::ip_in(HeaderField::DstIp, IpSpace::ips(ips)).not()
        };
        Ok(QueryProgram {
            rules: vec![Rule::axiom(StateExpr::Query, guard).family("Query")],
            queries: vec![StateExpr::Query],
            ..Default::default()
        })
    }
}
