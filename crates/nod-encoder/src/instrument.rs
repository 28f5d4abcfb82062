//! Program rewrites that tag each derivation with where it started and
//! which nodes it passed through, so a solver witness can be decoded into
//! a concrete flow.

use std::collections::BTreeSet;

use nod_ir::expr::BoolExpr;
use nod_ir::field::{bits_for, HeaderField};
use nod_ir::program::{Program, Rule, Transform};
use nod_ir::state::StateExpr;

use crate::query::IngressLocation;
use crate::transitions::{
    FAMILY_NEIGHBOR_UNREACHABLE, FAMILY_ORIGINATE, FAMILY_POST_OUT_FLOW_SINK,
    FAMILY_POST_OUT_NEIGHBOR,
};

fn is_origination_axiom(rule: &Rule) -> bool {
    rule.family == FAMILY_ORIGINATE && rule.is_axiom() && rule.postcondition.is_origination()
}

/// Numbers ingress options through `INGRESS_LOCATION`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressLocationInstrumentation {
    locations: Vec<IngressLocation>,
}

impl IngressLocationInstrumentation {
    pub fn new(locations: Vec<IngressLocation>) -> Self {
        Self { locations }
    }

    pub fn locations(&self) -> &[IngressLocation] {
        &self.locations
    }

    pub fn width(&self) -> u32 {
        bits_for(self.locations.len() as u64)
    }

    /// The location a witness value of `INGRESS_LOCATION` stands for.
    pub fn location_of(&self, value: u64) -> Option<&IngressLocation> {
        usize::try_from(value)
            .ok()
            .and_then(|k| self.locations.get(k))
    }

    pub fn apply(&self, program: &mut Program) {
        program
            .layout
            .allocate(HeaderField::IngressLocation, self.width());
        for rule in program.rules.iter_mut().filter(|r| is_origination_axiom(r)) {
            if let Some(k) = self
                .locations
                .iter()
                .position(|loc| loc.state() == rule.postcondition)
            {
                *rule = rule
                    .clone()
                    .guard(BoolExpr::field_eq(HeaderField::IngressLocation, k as u64));
            }
        }
    }
}

/// Records, per watched node, whether a flow left it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitNodesInstrumentation {
    pub required: BTreeSet<String>,
    pub forbidden: BTreeSet<String>,
}

impl TransitNodesInstrumentation {
    pub fn is_empty(&self) -> bool {
        self.required.is_empty() && self.forbidden.is_empty()
    }

    /// The node a rule moves a packet out of, if it is an exit rule.
    fn leaves(rule: &Rule) -> Option<&str> {
        match rule.family {
            FAMILY_POST_OUT_NEIGHBOR => rule.preconditions.iter().find_map(|p| match p {
                StateExpr::PreOutEdgePostNat(edge) => Some(edge.node1.as_str()),
                _ => None,
            }),
            FAMILY_POST_OUT_FLOW_SINK | FAMILY_NEIGHBOR_UNREACHABLE => rule.postcondition.node(),
            _ => None,
        }
    }

    pub fn apply(&self, program: &mut Program) {
        if self.is_empty() {
            return;
        }
        let watched: BTreeSet<&String> = self.required.union(&self.forbidden).collect();
        for node in &watched {
            program
                .layout
                .allocate(HeaderField::Transit((*node).clone()), 1);
        }
        for rule in program.rules.iter_mut() {
            let mut updated = rule.clone();
            if is_origination_axiom(&updated) {
                for node in &watched {
                    let bit = HeaderField::Transit((*node).clone());
                    updated = updated.guard(BoolExpr::field_eq(bit, 0));
                }
            } else if let Some(node) = Self::leaves(&updated).map(str::to_string) {
                if self.required.contains(&node) || self.forbidden.contains(&node) {
                    updated = updated.transform(Transform::assign(HeaderField::Transit(node), 1));
                }
            } else if updated.postcondition.is_query() {
                let expected = self
                    .required
                    .iter()
                    .map(|n| (n, 1))
                    .chain(self.forbidden.iter().map(|n| (n, 0)));
                for (node, value) in expected {
                    let bit = HeaderField::Transit(node.clone());
                    updated = updated.guard(BoolExpr::field_eq(bit, value));
                }
            }
            *rule = updated;
        }
    }
}
