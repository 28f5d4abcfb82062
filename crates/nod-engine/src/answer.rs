//! Aggregated analysis results. Job failures and unknown outcomes are
//! carried next to the partial results instead of aborting the analysis.

use std::collections::BTreeSet;

use nod_encoder::Disabled;
use serde::Serialize;

use crate::error::JobError;
use crate::flow::Flow;
use crate::job::JobReport;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobFailure {
    pub job: String,
    pub error: String,
}

/// Jobs that produced no answer: `unknown` lists jobs whose solver gave
/// up, `failures` everything else.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Unanswered {
    pub unknown: Vec<String>,
    pub failures: Vec<JobFailure>,
}

impl Unanswered {
    /// Keep the value of a successful report, recording anything else.
    pub fn absorb<T>(&mut self, report: JobReport<T>) -> Option<T> {
        match report.result {
            Ok(value) => Some(value),
            Err(err @ JobError::SolverUnknown { .. }) => {
                self.unknown.push(format!("{}: {err}", report.job));
                None
            }
            Err(err) => {
                self.failures.push(JobFailure {
                    job: report.job,
                    error: err.to_string(),
                });
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.unknown.is_empty() && self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReachabilityAnswer {
    pub flows: BTreeSet<Flow>,
    #[serde(flatten)]
    pub unanswered: Unanswered,
}

impl ReachabilityAnswer {
    /// Every job finished with SAT or UNSAT.
    pub fn is_complete(&self) -> bool {
        self.unanswered.is_empty()
    }
}

/// Flows some path accepts while another drops, or that reach two kinds
/// of end state.
pub type MultipathAnswer = ReachabilityAnswer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferentialKind {
    /// Flows accepted before the reduction and not after.
    ReducedReachability,
    /// Flows that stop crossing an edge after the reduction.
    PathDiff,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DifferentialAnswer {
    pub kind: DifferentialKind,
    pub disabled: Disabled,
    pub flows: BTreeSet<Flow>,
    #[serde(flatten)]
    pub unanswered: Unanswered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AclLineReport {
    pub node: String,
    pub acl: String,
    pub line: usize,
    pub name: String,
    /// Absent when the check did not finish.
    pub reachable: Option<bool>,
    /// The earliest line that on its own shadows this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_line: Option<usize>,
    /// No packet matches the line at all.
    pub unmatchable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AclReachabilityAnswer {
    pub lines: Vec<AclLineReport>,
    #[serde(flatten)]
    pub unanswered: Unanswered,
}

impl AclReachabilityAnswer {
    pub fn unreachable(&self) -> impl Iterator<Item = &AclLineReport> {
        self.lines.iter().filter(|l| l.reachable == Some(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(result: Result<u32, JobError>) -> JobReport<u32> {
        JobReport {
            job: "j".into(),
            elapsed_ms: 1,
            result,
        }
    }

    #[test]
    fn unknown_and_failed_jobs_are_kept_apart() {
        let mut unanswered = Unanswered::default();
        assert_eq!(unanswered.absorb(report(Ok(3))), Some(3));
        assert!(unanswered.is_empty());

        let unknown = JobError::SolverUnknown {
            job: "j".into(),
            reason: "timeout".into(),
        };
        assert_eq!(unanswered.absorb(report(Err(unknown))), None);
        let failed = JobError::Caller {
            job: "j".into(),
            message: "bad".into(),
        };
        assert_eq!(unanswered.absorb(report(Err(failed))), None);
        assert_eq!(unanswered.unknown.len(), 1);
        assert!(unanswered.unknown[0].contains("timeout"));
        assert_eq!(unanswered.failures.len(), 1);
        assert_eq!(unanswered.failures[0].job, "j");
    }
}
