use std::collections::{BTreeMap, BTreeSet};

use nod_ir::expr::BoolExpr;
use nod_ir::header_space::HeaderSpace;
use nod_ir::program::Rule;
use nod_ir::state::{Disposition, StateExpr};

use super::{
    ensure_enabled_nodes, origination_rules, IngressLocation, QueryProgram, QuerySynthesizer,
    SrcNatConstraint,
};
use crate::error::EncoderError;
use crate::input::SynthesizerInput;

/// Which flows from `ingress` end in one of `actions`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StandardReachability {
    pub actions: BTreeSet<Disposition>,
    pub header_space: HeaderSpace,
    pub ingress: Vec<IngressLocation>,
    pub src_ip_constraints: BTreeMap<IngressLocation, BoolExpr>,
    /// Restrict the disposition to these nodes; any node when empty.
    pub final_nodes: BTreeSet<String>,
    pub transit_nodes: BTreeSet<String>,
    pub non_transit_nodes: BTreeSet<String>,
    pub src_natted: SrcNatConstraint,
}

pub(crate) fn header_space_guard(header_space: &HeaderSpace) -> BoolExpr {
    if header_space.is_unconstrained() && !header_space.negate {
        return BoolExpr::True;
    }
    BoolExpr::HeaderSpaceMatch {
        space: Box::new(header_space.clone()),
        orig_src: true,
    }
}

impl QuerySynthesizer for StandardReachability {
    fn describe(&self) -> String {
        let actions: Vec<String> = self.actions.iter().map(ToString::to_string).collect();
        format!(
            "reachability to [{}] from {} location(s)",
            actions.join(", "),
            self.ingress.len()
        )
    }

    fn synthesize(&self, input: &SynthesizerInput) -> Result<QueryProgram, EncoderError> {
        self.header_space.validate()?;
        ensure_enabled_nodes(
            input,
            self.final_nodes
                .iter()
                .chain(&self.transit_nodes)
                .chain(&self.non_transit_nodes),
        )?;

        let mut rules = origination_rules(input, &self.ingress, &self.src_ip_constraints)?;
        let guard = BoolExpr::and(vec![
            header_space_guard(&self.header_space),
            self.src_natted.guard(),
        ]);
        for action in &self.actions {
            let targets: Vec<StateExpr> = if self.final_nodes.is_empty() {
                vec![action.global_state()]
            } else {
                self.final_nodes.iter().map(|n| action.node_state(n)).collect()
            };
            for target in targets {
                rules.push(
                    Rule::new(StateExpr::Query)
                        .when(target)
                        .guard(guard.clone())
                        .family("Query"),
                );
            }
        }

        Ok(QueryProgram {
            rules,
            queries: vec![StateExpr::Query],
            negate: false,
            ingress: self.ingress.clone(),
            transit_nodes: self.transit_nodes.clone(),
            non_transit_nodes: self.non_transit_nodes.clone(),
        })
    }
}
