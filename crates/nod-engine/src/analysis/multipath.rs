use std::sync::Arc;

use nod_encoder::query::MultipathInconsistency;
use nod_encoder::snapshot::Snapshot;
use nod_encoder::Disabled;
use nod_ir::header_space::HeaderSpace;

use super::build_input;
use super::reachability::log_finished;
use crate::answer::MultipathAnswer;
use crate::error::AnalysisError;
use crate::executor::JobExecutor;
use crate::flow::TAG_BASE;
use crate::job::NodJob;

/// One job per enabled VRF, looking for a header with two different fates.
pub fn multipath(
    executor: &JobExecutor,
    snapshot: &Snapshot,
    header_space: &HeaderSpace,
) -> Result<MultipathAnswer, AnalysisError> {
    header_space.validate()?;
    let input = build_input(
        snapshot,
        executor.settings(),
        Some(header_space),
        &Disabled::default(),
    )?;
    let jobs: Vec<NodJob> = input
        .enabled_vrfs()
        .iter()
        .flat_map(|(node, vrfs)| vrfs.iter().map(move |vrf| (node, vrf)))
        .map(|(node, vrf)| {
            NodJob::new(
                Arc::clone(&input),
                Arc::new(MultipathInconsistency {
                    node: node.clone(),
                    vrf: vrf.clone(),
                    header_space: header_space.clone(),
                }),
                TAG_BASE,
            )
        })
        .collect();

    let mut answer = MultipathAnswer::default();
    for report in executor.run(&jobs) {
        if let Some(output) = answer.unanswered.absorb(report) {
            answer.flows.extend(output.flows);
        }
    }
    log_finished("multipath", answer.flows.len(), &answer.unanswered);
    Ok(answer)
}
