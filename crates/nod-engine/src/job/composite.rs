use std::collections::BTreeSet;
use std::sync::Arc;

use nod_encoder::{encode_query, EncodedQuery, SynthesizerInput};
use nod_ir::program::Polarity;
use nod_smt::fixedpoint;
use nod_smt::solver::SmtSolver;

use super::nod::decode_flow;
use super::{witness_of, NodTask, Prepared, SharedQuery};
use crate::error::JobError;
use crate::flow::Flow;

/// Query `k` against network `k`, all over one shared header. A witness
/// satisfies every positive program and no negated one.
pub struct CompositeNodJob {
    inputs: Vec<Arc<SynthesizerInput>>,
    queries: Vec<SharedQuery>,
    tag: String,
}

impl CompositeNodJob {
    pub fn new(
        inputs: Vec<Arc<SynthesizerInput>>,
        queries: Vec<SharedQuery>,
        tag: impl Into<String>,
    ) -> Self {
        Self {
            inputs,
            queries,
            tag: tag.into(),
        }
    }
}

impl NodTask for CompositeNodJob {
    type Output = BTreeSet<Flow>;

    fn describe(&self) -> String {
        let parts: Vec<String> = self.queries.iter().map(|q| q.describe()).collect();
        format!("composite [{}]", parts.join("; "))
    }

    fn encode(&self) -> Result<Vec<EncodedQuery>, JobError> {
        if self.inputs.len() != self.queries.len() || self.inputs.is_empty() {
            return Err(JobError::Caller {
                job: self.describe(),
                message: format!(
                    "{} programs for {} queries",
                    self.inputs.len(),
                    self.queries.len()
                ),
            });
        }
        self.inputs
            .iter()
            .zip(&self.queries)
            .map(|(input, query)| Ok(encode_query(input, query.as_ref())?))
            .collect()
    }

    fn solve<S: SmtSolver>(
        &self,
        prepared: &Prepared,
        solver: &mut S,
        job: &str,
    ) -> Result<BTreeSet<Flow>, JobError> {
        fixedpoint::load(solver, &prepared.encoding).map_err(|e| JobError::solver(job, e))?;
        let outcome = fixedpoint::check_all(solver, &prepared.encoding)
            .map_err(|e| JobError::solver(job, e))?;
        let mut flows = BTreeSet::new();
        let Some(witness) = witness_of(outcome, job)? else {
            return Ok(flows);
        };
        let located = prepared
            .queries
            .iter()
            .find(|q| q.polarity == Polarity::Positive && q.ingress.is_some());
        if let Some(query) = located {
            if let Some((_, flow)) = decode_flow(query, &witness, &self.tag, job)? {
                flows.insert(flow);
            }
        }
        Ok(flows)
    }
}
