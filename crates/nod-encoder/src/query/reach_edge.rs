use std::collections::BTreeMap;

use nod_ir::header_space::HeaderSpace;
use nod_ir::program::Rule;
use nod_ir::state::{Edge, StateExpr};

use super::standard::header_space_guard;
use super::{origination_rules, IngressLocation, QueryProgram, QuerySynthesizer};
use crate::error::EncoderError;
use crate::input::SynthesizerInput;

/// Flows from a VRF that leave through `edge` past its outgoing filters.
/// With `negate` set the question becomes whether no such flow exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReachEdge {
    pub ingress_node: String,
    pub vrf: String,
    pub edge: Edge,
    pub header_space: HeaderSpace,
    pub negate: bool,
}

impl QuerySynthesizer for ReachEdge {
    fn describe(&self) -> String {
        format!(
            "reach edge {} from {}@{}",
            self.edge, self.ingress_node, self.vrf
        )
    }

    fn synthesize(&self, input: &SynthesizerInput) -> Result<QueryProgram, EncoderError> {
        self.header_space.validate()?;
        let ingress = vec![IngressLocation::vrf(&self.ingress_node, &self.vrf)];
        let mut rules = origination_rules(input, &ingress, &BTreeMap::new())?;
        rules.push(
            Rule::new(StateExpr::Query)
                .when(StateExpr::PreOutEdgePostNat(self.edge.clone()))
                .when(StateExpr::PostOutInterface(
                    self.edge.node1.clone(),
                    self.edge.iface1.clone(),
                ))
                .guard(header_space_guard(&self.header_space))
                .family("Query"),
        );
        Ok(QueryProgram {
            rules,
            queries: vec![StateExpr::Query],
            negate: self.negate,
            ingress,
            ..Default::default()
        })
    }
}
