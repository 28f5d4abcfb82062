use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use nod_encoder::{encode_query, EncodedQuery, IngressLocation, SynthesizerInput};
use nod_ir::field::HeaderField;
use nod_smt::fixedpoint;
use nod_smt::solver::SmtSolver;

use super::{witness_of, NodTask, Prepared, SharedQuery};
use crate::error::JobError;
use crate::flow::Flow;

/// The flow of a witness, located through the ingress instrumentation of
/// the program the witness was read from.
pub(crate) fn decode_flow(
    query: &EncodedQuery,
    witness: &BTreeMap<HeaderField, u64>,
    tag: &str,
    job: &str,
) -> Result<Option<(IngressLocation, Flow)>, JobError> {
    let Some(ingress) = &query.ingress else {
        return Ok(None);
    };
    let index = witness
        .get(&HeaderField::IngressLocation)
        .copied()
        .unwrap_or(0);
    let location = ingress.location_of(index).ok_or_else(|| {
        let count = ingress.locations().len();
        JobError::solver(job, format!("witness names ingress option {index} of {count}"))
    })?;
    Ok(Some((location.clone(), Flow::from_witness(witness, location, tag))))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodJobOutput {
    pub flows: BTreeSet<Flow>,
    /// Witness header per ingress location.
    pub solutions: BTreeMap<IngressLocation, BTreeMap<HeaderField, u64>>,
}

/// One query against one network, yielding at most one flow.
pub struct NodJob {
    input: Arc<SynthesizerInput>,
    query: SharedQuery,
    tag: String,
}

impl NodJob {
    pub fn new(input: Arc<SynthesizerInput>, query: SharedQuery, tag: impl Into<String>) -> Self {
        Self {
            input,
            query,
            tag: tag.into(),
        }
    }
}

impl NodTask for NodJob {
    type Output = NodJobOutput;

    fn describe(&self) -> String {
        self.query.describe()
    }

    fn encode(&self) -> Result<Vec<EncodedQuery>, JobError> {
        Ok(vec![encode_query(&self.input, self.query.as_ref())?])
    }

    fn solve<S: SmtSolver>(
        &self,
        prepared: &Prepared,
        solver: &mut S,
        job: &str,
    ) -> Result<NodJobOutput, JobError> {
        fixedpoint::load(solver, &prepared.encoding).map_err(|e| JobError::solver(job, e))?;
        let outcome = fixedpoint::check_all(solver, &prepared.encoding)
            .map_err(|e| JobError::solver(job, e))?;
        let mut output = NodJobOutput::default();
        let (Some(witness), Some(query)) = (witness_of(outcome, job)?, prepared.queries.first())
        else {
            return Ok(output);
        };
        if let Some((location, flow)) = decode_flow(query, &witness, &self.tag, job)? {
            output.flows.insert(flow);
            output.solutions.insert(location, witness);
        }
        Ok(output)
    }
}
