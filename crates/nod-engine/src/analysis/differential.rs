use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use nod_encoder::query::{BlacklistDstIp, ReachEdge, StandardReachability};
use nod_encoder::snapshot::Snapshot;
use nod_encoder::{
    Disabled, EncoderError, IngressLocation, QueryProgram, QuerySynthesizer, SrcNatConstraint,
    SynthesizerInput,
};
use nod_ir::header_space::HeaderSpace;
use nod_ir::state::{Disposition, Edge};
use tracing::debug;

use super::build_input;
use super::reachability::log_finished;
use crate::answer::{DifferentialAnswer, DifferentialKind};
use crate::error::AnalysisError;
use crate::executor::JobExecutor;
use crate::flow::TAG_DIFFERENTIAL;
use crate::job::{CompositeNodJob, SharedQuery};

/// Asks that the wrapped query be underivable.
pub struct Negated(pub SharedQuery);

impl QuerySynthesizer for Negated {
    fn describe(&self) -> String {
        format!("not ({})", self.0.describe())
    }

    fn synthesize(&self, input: &SynthesizerInput) -> Result<QueryProgram, EncoderError> {
        let mut program = self.0.synthesize(input)?;
        program.negate = true;
        Ok(program)
    }
}

fn blacklist(disabled: &Disabled) -> SharedQuery {
    Arc::new(BlacklistDstIp {
        nodes: disabled.nodes.clone(),
        interfaces: disabled.interfaces.clone(),
        edges: disabled.edges.clone(),
    })
}

fn accepted_from(location: IngressLocation, header_space: HeaderSpace) -> StandardReachability {
    StandardReachability {
        actions: BTreeSet::from([Disposition::Accepted]),
        header_space,
        ingress: vec![location],
        src_ip_constraints: BTreeMap::new(),
        final_nodes: BTreeSet::new(),
        transit_nodes: BTreeSet::new(),
        non_transit_nodes: BTreeSet::new(),
        src_natted: SrcNatConstraint::Unconstrained,
    }
}

fn inputs(
    executor: &JobExecutor,
    snapshot: &Snapshot,
    disabled: &Disabled,
    header_space: &HeaderSpace,
) -> Result<(Arc<SynthesizerInput>, Arc<SynthesizerInput>), AnalysisError> {
    header_space.validate()?;
    if disabled.is_empty() {
        return Err(AnalysisError::Caller(
            "differential analysis without anything disabled".into(),
        ));
    }
    let base = build_input(
        snapshot,
        executor.settings(),
        Some(header_space),
        &Disabled::default(),
    )?;
    let delta = Arc::new(base.with_disabled(disabled)?);
    debug!(
        base_edges = base.enabled_edges().len(),
        delta_edges = delta.enabled_edges().len(),
        "NoD: built base and delta networks"
    );
    Ok((base, delta))
}

fn finish(
    executor: &JobExecutor,
    kind: DifferentialKind,
    disabled: &Disabled,
    jobs: &[CompositeNodJob],
) -> DifferentialAnswer {
    let mut answer = DifferentialAnswer {
        kind,
        disabled: disabled.clone(),
        flows: BTreeSet::new(),
        unanswered: Default::default(),
    };
    for report in executor.run(jobs) {
        if let Some(flows) = answer.unanswered.absorb(report) {
            answer.flows.extend(flows);
        }
    }
    let name = match kind {
        DifferentialKind::ReducedReachability => "reduced-reachability",
        DifferentialKind::PathDiff => "path-diff",
    };
    log_finished(name, answer.flows.len(), &answer.unanswered);
    answer
}

/// Headers in `header_space` accepted from some VRF before `disabled` is
/// removed and accepted from nowhere after. Destinations owned by what was
/// removed are not reported.
pub fn reduced_reachability(
    executor: &JobExecutor,
    snapshot: &Snapshot,
    disabled: &Disabled,
    header_space: &HeaderSpace,
) -> Result<DifferentialAnswer, AnalysisError> {
    let (base, delta) = inputs(executor, snapshot, disabled, header_space)?;
    let blacklist = blacklist(disabled);
    let mut jobs = Vec::new();
    for (node, vrfs) in base.enabled_vrfs() {
        for vrf in vrfs.iter().filter(|vrf| delta.is_vrf_enabled(node, vrf)) {
            let location = IngressLocation::vrf(node, vrf);
            let accepted = accepted_from(location.clone(), header_space.clone());
            let lost = Negated(Arc::new(accepted_from(location, HeaderSpace::default())));
            jobs.push(CompositeNodJob::new(
                vec![Arc::clone(&base), Arc::clone(&delta), Arc::clone(&base)],
                vec![Arc::new(accepted), Arc::new(lost), Arc::clone(&blacklist)],
                TAG_DIFFERENTIAL,
            ));
        }
    }
    Ok(finish(
        executor,
        DifferentialKind::ReducedReachability,
        disabled,
        &jobs,
    ))
}

fn reach_edge(vrf: &str, edge: &Edge, header_space: HeaderSpace, negate: bool) -> ReachEdge {
    ReachEdge {
        ingress_node: edge.node1.clone(),
        vrf: vrf.to_string(),
        edge: edge.clone(),
        header_space,
        negate,
    }
}

/// Headers that crossed an edge from its sending node before `disabled`
/// is removed and no longer do. Edges that disappear entirely are covered
/// from their sending side when that interface still exists.
pub fn path_diff(
    executor: &JobExecutor,
    snapshot: &Snapshot,
    disabled: &Disabled,
    header_space: &HeaderSpace,
) -> Result<DifferentialAnswer, AnalysisError> {
    let (base, delta) = inputs(executor, snapshot, disabled, header_space)?;
    let blacklist = blacklist(disabled);
    let mut jobs = Vec::new();

    for edge in delta.enabled_edges() {
        let Some(vrf) = delta.interface_vrf(&edge.node1, &edge.iface1) else {
            continue;
        };
        let reached = reach_edge(vrf, edge, header_space.clone(), false);
        let missed = reach_edge(vrf, edge, HeaderSpace::default(), true);
        jobs.push(CompositeNodJob::new(
            vec![Arc::clone(&base), Arc::clone(&delta), Arc::clone(&base)],
            vec![Arc::new(reached), Arc::new(missed), Arc::clone(&blacklist)],
            TAG_DIFFERENTIAL,
        ));
    }

    for edge in base.enabled_edges().difference(delta.enabled_edges()) {
        if !delta.is_interface_enabled(&edge.node1, &edge.iface1) {
            continue;
        }
        let Some(vrf) = base.interface_vrf(&edge.node1, &edge.iface1) else {
            continue;
        };
        let reached = reach_edge(vrf, edge, header_space.clone(), false);
        jobs.push(CompositeNodJob::new(
            vec![Arc::clone(&base), Arc::clone(&base)],
            vec![Arc::new(reached), Arc::clone(&blacklist)],
            TAG_DIFFERENTIAL,
        ));
    }

    Ok(finish(executor, DifferentialKind::PathDiff, disabled, &jobs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negation_wraps_the_inner_program() -> Result<(), Box<dyn std::error::Error>> {
        let input = SynthesizerInput::builder(&Snapshot::default()).build()?;
        let inner = BlacklistDstIp::default();
        let plain = inner.synthesize(&input)?;
        let negated = Negated(Arc::new(inner)).synthesize(&input)?;
        assert!(!plain.negate);
        assert!(negated.negate);
        assert_eq!(negated.rules, plain.rules);
        assert!(Negated(Arc::new(BlacklistDstIp::default()))
            .describe()
            .starts_with("not ("));
        Ok(())
    }
}
