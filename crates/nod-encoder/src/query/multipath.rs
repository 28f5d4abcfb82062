use std::collections::BTreeMap;

use nod_ir::header_space::HeaderSpace;
use nod_ir::program::Rule;
use nod_ir::state::StateExpr;

use super::standard::header_space_guard;
use super::{origination_rules, IngressLocation, QueryProgram, QuerySynthesizer};
use crate::error::EncoderError;
use crate::input::SynthesizerInput;

/// Flows from one VRF that some path accepts while another drops, or that
/// reach two different kinds of end state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipathInconsistency {
    pub node: String,
    pub vrf: String,
    pub header_space: HeaderSpace,
}

impl QuerySynthesizer for MultipathInconsistency {
    fn describe(&self) -> String {
        format!("multipath consistency from {}@{}", self.node, self.vrf)
    }

    fn synthesize(&self, input: &SynthesizerInput) -> Result<QueryProgram, EncoderError> {
        self.header_space.validate()?;
        let ingress = vec![IngressLocation::vrf(&self.node, &self.vrf)];
        let mut rules = origination_rules(input, &ingress, &BTreeMap::new())?;
        let guard = header_space_guard(&self.header_space);
        for (a, b) in [
            (StateExpr::Accept, StateExpr::Drop),
            (StateExpr::Accept, StateExpr::NeighborUnreachableOrExitsNetwork),
            (StateExpr::Drop, StateExpr::NeighborUnreachableOrExitsNetwork),
        ] {
            rules.push(
                Rule::new(StateExpr::Query)
                    .when(a)
                    .when(b)
                    .guard(guard.clone())
                    .family("Query"),
            );
        }
        Ok(QueryProgram {
            rules,
            queries: vec![StateExpr::Query],
            ingress,
            ..Default::default()
        })
    }
}
