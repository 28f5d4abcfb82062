//! Query generators: the rules that turn a question about the network into
//! derivability of `Query` (or of numbered queries) on top of the base
//! transitions.

mod acl_lines;
mod blacklist;
mod multipath;
mod reach_edge;
mod standard;

pub use acl_lines::{AclReachability, EarliestMoreGeneralReachableLine};
pub use blacklist::BlacklistDstIp;
pub use multipath::MultipathInconsistency;
pub use reach_edge::ReachEdge;
pub use standard::StandardReachability;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use nod_ir::expr::BoolExpr;
use nod_ir::field::HeaderField;
use nod_ir::program::Rule;
use nod_ir::state::StateExpr;
use serde::{Deserialize, Serialize};

use crate::error::EncoderError;
use crate::input::SynthesizerInput;
use crate::transitions::FAMILY_ORIGINATE;

/// Where a flow is injected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngressLocation {
    /// Arriving on an interface from its link.
    InterfaceLink { node: String, iface: String },
    /// Originated by the device in a VRF.
    Vrf { node: String, vrf: String },
}

impl IngressLocation {
    pub fn interface_link(node: impl Into<String>, iface: impl Into<String>) -> Self {
        IngressLocation::InterfaceLink {
            node: node.into(),
            iface: iface.into(),
        }
    }

    pub fn vrf(node: impl Into<String>, vrf: impl Into<String>) -> Self {
        IngressLocation::Vrf {
            node: node.into(),
            vrf: vrf.into(),
        }
    }

    pub fn node(&self) -> &str {
        match self {
            IngressLocation::InterfaceLink { node, .. } | IngressLocation::Vrf { node, .. } => node,
        }
    }

    pub fn is_vrf(&self) -> bool {
        matches!(self, IngressLocation::Vrf { .. })
    }

    /// The origination relation of this location.
    pub fn state(&self) -> StateExpr {
        match self {
            IngressLocation::InterfaceLink { node, iface } => {
                StateExpr::OriginateInterfaceLink(node.clone(), iface.clone())
            }
            IngressLocation::Vrf { node, vrf } => {
                StateExpr::OriginateVrf(node.clone(), vrf.clone())
            }
        }
    }

    pub fn is_enabled(&self, input: &SynthesizerInput) -> bool {
        match self {
            IngressLocation::InterfaceLink { node, iface } => {
                input.is_interface_enabled(node, iface)
            }
            IngressLocation::Vrf { node, vrf } => input.is_vrf_enabled(node, vrf),
        }
    }
}

impl fmt::Display for IngressLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngressLocation::InterfaceLink { node, iface } => write!(f, "{node}[{iface}]"),
            IngressLocation::Vrf { node, vrf } => write!(f, "{node}@{vrf}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SrcNatConstraint {
    /// The source IP must have been rewritten on the way.
    Require,
    /// The source IP must be untouched.
    Forbid,
    #[default]
    Unconstrained,
}

impl SrcNatConstraint {
    pub fn guard(self) -> BoolExpr {
        let untouched = BoolExpr::fields_eq(HeaderField::SrcIp, HeaderField::OrigSrcIp);
        match self {
            SrcNatConstraint::Require => untouched.not(),
            SrcNatConstraint::Forbid => untouched,
            SrcNatConstraint::Unconstrained => BoolExpr::True,
        }
    }
}

/// The rules and queries one generator adds on top of the transitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryProgram {
    pub rules: Vec<Rule>,
    pub queries: Vec<StateExpr>,
    /// Assert the queries underivable instead of derivable.
    pub negate: bool,
    /// Injection points, in instrumentation order.
    pub ingress: Vec<IngressLocation>,
    /// Nodes every reported flow must leave.
    pub transit_nodes: BTreeSet<String>,
    /// Nodes no reported flow may leave.
    pub non_transit_nodes: BTreeSet<String>,
}

pub trait QuerySynthesizer {
    fn describe(&self) -> String;

    fn synthesize(&self, input: &SynthesizerInput) -> Result<QueryProgram, EncoderError>;
}

/// Origination axioms for `locations`. A flow starts with its source IP
/// untranslated and, when ingress interfaces are tracked, marked as
/// originated by the device.
pub(crate) fn origination_rules(
    input: &SynthesizerInput,
    locations: &[IngressLocation],
    src_ip_constraints: &BTreeMap<IngressLocation, BoolExpr>,
) -> Result<Vec<Rule>, EncoderError> {
    let mut rules = Vec::with_capacity(locations.len());
    for location in locations {
        if !location.is_enabled(input) {
            return Err(EncoderError::UnknownIngress(location.to_string()));
        }
        let mut guard = vec![BoolExpr::fields_eq(HeaderField::SrcIp, HeaderField::OrigSrcIp)];
        if input.tracks_src_interface() {
            guard.push(BoolExpr::field_eq(HeaderField::SrcInterface, 0));
        }
        if let Some(constraint) = src_ip_constraints.get(location) {
            guard.push(constraint.clone());
        }
        rules.push(Rule::axiom(location.state(), BoolExpr::and(guard)).family(FAMILY_ORIGINATE));
    }
    Ok(rules)
}

/// Every enabled ingress location: each VRF and each interface at the
/// network edge (not the far end of an enabled edge).
pub fn default_ingress_locations(input: &SynthesizerInput) -> Vec<IngressLocation> {
    let mut out = Vec::new();
    for (node, vrfs) in input.enabled_vrfs() {
        out.extend(vrfs.iter().map(|vrf| IngressLocation::vrf(node, vrf)));
    }
    let interior: BTreeSet<(&str, &str)> = input
        .enabled_edges()
        .iter()
        .map(|e| (e.node2.as_str(), e.iface2.as_str()))
        .collect();
    for (node, ifaces) in input.enabled_interfaces() {
        for iface in ifaces {
            if !interior.contains(&(node.as_str(), iface.as_str())) {
                out.push(IngressLocation::interface_link(node, iface));
            }
        }
    }
    out
}

fn ensure_enabled_nodes<'a>(
    input: &SynthesizerInput,
    nodes: impl IntoIterator<Item = &'a String>,
) -> Result<(), EncoderError> {
    for node in nodes {
        if !input.enabled_nodes().contains(node) {
            return Err(EncoderError::UnknownNode(node.clone()));
        }
    }
    Ok(())
}
