use std::collections::BTreeMap;
use std::sync::Arc;

use nod_encoder::query::{AclReachability, EarliestMoreGeneralReachableLine};
use nod_encoder::snapshot::Snapshot;
use nod_encoder::Disabled;
use tracing::warn;

use super::build_input;
use super::reachability::log_finished;
use crate::answer::{AclLineReport, AclReachabilityAnswer};
use crate::error::AnalysisError;
use crate::executor::JobExecutor;
use crate::job::{NodFirstUnsatJob, NodSatJob};

/// Names the encoder gives ACLs it synthesizes itself start with this.
const SYNTHESIZED_ACL_PREFIX: char = '~';

type AclKey = (String, String);

/// Line reachability of every configured ACL. For each unreachable line
/// whose predicate is satisfiable, a second round looks for the earliest
/// reachable line that covers it alone.
pub fn acl_reachability(
    executor: &JobExecutor,
    snapshot: &Snapshot,
) -> Result<AclReachabilityAnswer, AnalysisError> {
    let input = build_input(snapshot, executor.settings(), None, &Disabled::default())?;
    let mut reports: BTreeMap<AclKey, Vec<AclLineReport>> = BTreeMap::new();
    let mut jobs = Vec::new();
    for (node, acls) in input.acls() {
        for (name, acl) in acls {
            if name.starts_with(SYNTHESIZED_ACL_PREFIX) {
                continue;
            }
            if acl.lines.is_empty() {
                warn!(node = %node, acl = %name, "NoD: skipping ACL without lines");
                continue;
            }
            let lines = acl
                .lines
                .iter()
                .enumerate()
                .map(|(i, line)| AclLineReport {
                    node: node.clone(),
                    acl: name.clone(),
                    line: i,
                    name: line.name.clone(),
                    reachable: None,
                    blocking_line: None,
                    unmatchable: false,
                })
                .collect();
            reports.insert((node.clone(), name.clone()), lines);
            jobs.push((
                (node.clone(), name.clone()),
                NodSatJob::new(
                    Arc::clone(&input),
                    Arc::new(AclReachability {
                        node: node.clone(),
                        acl: name.clone(),
                    }),
                    (0..acl.lines.len()).collect(),
                ),
            ));
        }
    }

    let mut answer = AclReachabilityAnswer::default();
    let (keys, sat_jobs): (Vec<AclKey>, Vec<NodSatJob<usize>>) = jobs.into_iter().unzip();
    for (key, report) in keys.into_iter().zip(executor.run(&sat_jobs)) {
        let Some(verdicts) = answer.unanswered.absorb(report) else {
            continue;
        };
        if let Some(lines) = reports.get_mut(&key) {
            for (line, reachable) in verdicts {
                if let Some(entry) = lines.get_mut(line) {
                    entry.reachable = Some(reachable);
                }
            }
        }
    }

    let mut cover_jobs = Vec::new();
    let mut candidates: BTreeMap<(String, String, usize), Vec<usize>> = BTreeMap::new();
    for ((node, acl), lines) in &mut reports {
        for u in 0..lines.len() {
            if lines[u].reachable != Some(false) {
                continue;
            }
            let earlier: Vec<usize> = lines[..u]
                .iter()
                .filter(|l| l.reachable == Some(true))
                .map(|l| l.line)
                .collect();
            if earlier.is_empty() {
                // nothing before it matches, so the line itself matches nothing
                lines[u].unmatchable = lines[..u].iter().all(|l| l.reachable == Some(false));
                continue;
            }
            let key = (node.clone(), acl.clone(), u);
            cover_jobs.push(NodFirstUnsatJob::new(
                key.clone(),
                Arc::clone(&input),
                Arc::new(EarliestMoreGeneralReachableLine {
                    node: node.clone(),
                    acl: acl.clone(),
                    unreachable_line: u,
                    earlier_reachable_lines: earlier.clone(),
                }),
            ));
            candidates.insert(key, earlier);
        }
    }
    for report in executor.run(&cover_jobs) {
        let Some(((node, acl, u), first_unsat)) = answer.unanswered.absorb(report) else {
            continue;
        };
        let blocking = first_unsat.and_then(|k| {
            candidates
                .get(&(node.clone(), acl.clone(), u))
                .and_then(|earlier| earlier.get(k).copied())
        });
        if let Some(entry) = reports.get_mut(&(node, acl)).and_then(|l| l.get_mut(u)) {
            entry.blocking_line = blocking;
        }
    }

    answer.lines = reports.into_values().flatten().collect();
    log_finished("acl-lines", answer.unreachable().count(), &answer.unanswered);
    Ok(answer)
}
