use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use nod_encoder::query::{default_ingress_locations, StandardReachability};
use nod_encoder::snapshot::Snapshot;
use nod_encoder::{encode_query, Disabled, IngressLocation, SrcNatConstraint, SynthesizerInput};
use nod_ir::expr::BoolExpr;
use nod_ir::field::HeaderField;
use nod_ir::header_space::{HeaderSpace, IpSpace};
use nod_ir::state::Disposition;
use nod_smt::datalog::render_datalog;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::build_input;
use crate::answer::{ReachabilityAnswer, Unanswered};
use crate::error::AnalysisError;
use crate::executor::JobExecutor;
use crate::flow::TAG_BASE;
use crate::settings::Settings;
use crate::job::NodJob;

/// Source addresses a flow injected at `location` may start with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressSrcIps {
    pub location: IngressLocation,
    pub src_ips: IpSpace,
}

/// A reachability question as read from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReachabilityParameters {
    pub actions: BTreeSet<Disposition>,
    pub header_space: HeaderSpace,
    /// Every entry point of the network when empty.
    pub ingress: Vec<IngressLocation>,
    /// Per-location source restrictions; each location must be an ingress
    /// location of the question.
    pub src_ip_constraints: Vec<IngressSrcIps>,
    pub final_nodes: BTreeSet<String>,
    pub transit_nodes: BTreeSet<String>,
    pub non_transit_nodes: BTreeSet<String>,
    pub src_natted: SrcNatConstraint,
}

impl Default for ReachabilityParameters {
    fn default() -> Self {
        Self {
            actions: BTreeSet::from([Disposition::Accepted]),
            header_space: HeaderSpace::default(),
            ingress: Vec::new(),
            src_ip_constraints: Vec::new(),
            final_nodes: BTreeSet::new(),
            transit_nodes: BTreeSet::new(),
            non_transit_nodes: BTreeSet::new(),
            src_natted: SrcNatConstraint::default(),
        }
    }
}

impl ReachabilityParameters {
    pub fn from_json_str(text: &str) -> Result<Self, AnalysisError> {
        serde_json::from_str(text)
            .map_err(|e| AnalysisError::Caller(format!("reachability query: {e}")))
    }

    fn query_from(&self, locations: &[IngressLocation]) -> StandardReachability {
        let src_ip_constraints: BTreeMap<IngressLocation, BoolExpr> = self
            .src_ip_constraints
            .iter()
            .filter(|c| locations.contains(&c.location))
            .map(|c| {
                let guard = BoolExpr::ip_in(HeaderField::SrcIp, c.src_ips.clone());
                (c.location.clone(), guard)
            })
            .collect();
        StandardReachability {
            actions: self.actions.clone(),
            header_space: self.header_space.clone(),
            ingress: locations.to_vec(),
            src_ip_constraints,
            final_nodes: self.final_nodes.clone(),
            transit_nodes: self.transit_nodes.clone(),
            non_transit_nodes: self.non_transit_nodes.clone(),
            src_natted: self.src_natted,
        }
    }

    /// Reject what would fail every job, before any job exists.
    fn check(&self, input: &SynthesizerInput) -> Result<Vec<IngressLocation>, AnalysisError> {
        self.header_space.validate()?;
        if self.actions.is_empty() {
            return Err(AnalysisError::Caller("no dispositions requested".into()));
        }
        for node in self
            .final_nodes
            .iter()
            .chain(&self.transit_nodes)
            .chain(&self.non_transit_nodes)
        {
            if !input.enabled_nodes().contains(node) {
                return Err(AnalysisError::Caller(format!("unknown or disabled node {node}")));
            }
        }
        let locations = if self.ingress.is_empty() {
            default_ingress_locations(input)
        } else {
            if let Some(location) = self.ingress.iter().find(|l| !l.is_enabled(input)) {
                return Err(AnalysisError::Caller(format!(
                    "ingress location {location} is not enabled"
                )));
            }
            self.ingress.clone()
        };
        if let Some(stray) = self
            .src_ip_constraints
            .iter()
            .find(|c| !locations.contains(&c.location))
        {
            return Err(AnalysisError::Caller(format!(
                "source constraint for {}, which is not an ingress location",
                stray.location
            )));
        }
        Ok(locations)
    }
}

/// One job per ingress location; each contributes at most one flow.
pub fn reachability(
    executor: &JobExecutor,
    snapshot: &Snapshot,
    params: &ReachabilityParameters,
) -> Result<ReachabilityAnswer, AnalysisError> {
    let input = build_input(
        snapshot,
        executor.settings(),
        Some(&params.header_space),
        &Disabled::default(),
    )?;
    let locations = params.check(&input)?;
    let jobs: Vec<NodJob> = locations
        .iter()
        .map(|location| {
            NodJob::new(
                Arc::clone(&input),
                Arc::new(params.query_from(std::slice::from_ref(location))),
                TAG_BASE,
            )
        })
        .collect();

    let mut answer = ReachabilityAnswer::default();
    for report in executor.run(&jobs) {
        if let Some(output) = answer.unanswered.absorb(report) {
            answer.flows.extend(output.flows);
        }
    }
    log_finished("reachability", answer.flows.len(), &answer.unanswered);
    Ok(answer)
}

/// The whole question as one program over every ingress location, in
/// datalog form. Nothing is solved.
pub fn reachability_datalog(
    settings: &Settings,
    snapshot: &Snapshot,
    params: &ReachabilityParameters,
) -> Result<String, AnalysisError> {
    let input = build_input(
        snapshot,
        settings,
        Some(&params.header_space),
        &Disabled::default(),
    )?;
    let locations = params.check(&input)?;
    let encoded = encode_query(&input, &params.query_from(&locations))?;
    Ok(render_datalog(&encoded.program)?)
}

pub(super) fn log_finished(analysis: &str, flows: usize, unanswered: &Unanswered) {
    info!(
        analysis,
        flows,
        unknown = unanswered.unknown.len(),
        failures = unanswered.failures.len(),
        "NoD: analysis finished"
    );
}
