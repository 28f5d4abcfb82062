use std::collections::BTreeMap;
use std::sync::Arc;

use nod_encoder::{encode_query, EncodedQuery, SynthesizerInput};
use nod_smt::fixedpoint::{self, FixedpointOutcome};
use nod_smt::solver::SmtSolver;

use super::{NodTask, Prepared, SharedQuery};
use crate::error::JobError;

fn single_program(
    input: &SynthesizerInput,
    query: &SharedQuery,
) -> Result<Vec<EncodedQuery>, JobError> {
    Ok(vec![encode_query(input, query.as_ref())?])
}

/// Satisfiability of every query of one program. `keys[i]` names the
/// program's `i`-th query; queries are solved in order, each in its own
/// scope.
pub struct NodSatJob<K> {
    input: Arc<SynthesizerInput>,
    query: SharedQuery,
    keys: Vec<K>,
}

impl<K> NodSatJob<K> {
    pub fn new(input: Arc<SynthesizerInput>, query: SharedQuery, keys: Vec<K>) -> Self {
        Self { input, query, keys }
    }
}

impl<K: Ord + Clone> NodTask for NodSatJob<K> {
    type Output = BTreeMap<K, bool>;

    fn describe(&self) -> String {
        self.query.describe()
    }

    fn encode(&self) -> Result<Vec<EncodedQuery>, JobError> {
        let queries = single_program(&self.input, &self.query)?;
        let count = queries.first().map_or(0, |q| q.program.queries.len());
        if count != self.keys.len() {
            return Err(JobError::Caller {
                job: self.describe(),
                message: format!("{} keys for {count} queries", self.keys.len()),
            });
        }
        Ok(queries)
    }

    fn solve<S: SmtSolver>(
        &self,
        prepared: &Prepared,
        solver: &mut S,
        job: &str,
    ) -> Result<BTreeMap<K, bool>, JobError> {
        fixedpoint::load(solver, &prepared.encoding).map_err(|e| JobError::solver(job, e))?;
        let mut verdicts = BTreeMap::new();
        for (i, key) in self.keys.iter().enumerate() {
            let outcome = fixedpoint::check_goals(solver, &prepared.encoding, &[i])
                .map_err(|e| JobError::solver(job, e))?;
            let sat = match outcome {
                FixedpointOutcome::Sat { .. } => true,
                FixedpointOutcome::Unsat => false,
                FixedpointOutcome::Unknown { reason } => {
                    return Err(JobError::SolverUnknown {
                        job: format!("{job} (query {i})"),
                        reason,
                    })
                }
            };
            verdicts.insert(key.clone(), sat);
        }
        Ok(verdicts)
    }
}

/// Index of the first underivable query of one program, if any.
pub struct NodFirstUnsatJob<K> {
    key: K,
    input: Arc<SynthesizerInput>,
    query: SharedQuery,
}

impl<K> NodFirstUnsatJob<K> {
    pub fn new(key: K, input: Arc<SynthesizerInput>, query: SharedQuery) -> Self {
        Self { key, input, query }
    }
}

impl<K: Clone> NodTask for NodFirstUnsatJob<K> {
    type Output = (K, Option<usize>);

    fn describe(&self) -> String {
        self.query.describe()
    }

    fn encode(&self) -> Result<Vec<EncodedQuery>, JobError> {
        single_program(&self.input, &self.query)
    }

    fn solve<S: SmtSolver>(
        &self,
        prepared: &Prepared,
        solver: &mut S,
        job: &str,
    ) -> Result<(K, Option<usize>), JobError> {
        fixedpoint::load(solver, &prepared.encoding).map_err(|e| JobError::solver(job, e))?;
        for i in 0..prepared.encoding.goals.len() {
            match fixedpoint::check_goals(solver, &prepared.encoding, &[i])
                .map_err(|e| JobError::solver(job, e))?
            {
                FixedpointOutcome::Unsat => return Ok((self.key.clone(), Some(i))),
                FixedpointOutcome::Sat { .. } => {}
                FixedpointOutcome::Unknown { reason } => {
                    return Err(JobError::SolverUnknown {
                        job: format!("{job} (query {i})"),
                        reason,
                    })
                }
            }
        }
        Ok((self.key.clone(), None))
    }
}
