//! Solve tasks. Every job encodes its programs, builds its own solver on
//! the thread that runs it, and reports an outcome; nothing mutable is
//! shared between jobs.

mod composite;
mod nod;
mod sat;

pub use composite::CompositeNodJob;
pub use nod::{NodJob, NodJobOutput};
pub use sat::{NodFirstUnsatJob, NodSatJob};

use std::any::Any;
use std::collections::BTreeMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use nod_encoder::{EncodedQuery, QuerySynthesizer};
use nod_ir::field::HeaderField;
use nod_smt::backends::cvc5_backend::Cvc5Solver;
use nod_smt::backends::z3_backend::Z3Solver;
use nod_smt::datalog::{program_fingerprint, render_datalog};
use nod_smt::encoder::{assemble, HornEncoding};
use nod_smt::fixedpoint::FixedpointOutcome;
use nod_smt::solver::SmtSolver;
use tracing::{debug, info, warn};

use crate::error::JobError;
use crate::settings::{Settings, SolverChoice};

/// A query generator that can be handed to worker threads.
pub type SharedQuery = Arc<dyn QuerySynthesizer + Send + Sync>;

/// The encoded programs of a job and their assembly.
pub struct Prepared {
    pub queries: Vec<EncodedQuery>,
    pub encoding: HornEncoding,
}

pub trait NodTask {
    type Output;

    fn describe(&self) -> String;

    /// Encode the job's programs. Caller errors surface here, before any
    /// solver exists.
    fn encode(&self) -> Result<Vec<EncodedQuery>, JobError>;

    fn solve<S: SmtSolver>(
        &self,
        prepared: &Prepared,
        solver: &mut S,
        job: &str,
    ) -> Result<Self::Output, JobError>;
}

/// Outcome of one job.
#[derive(Debug)]
pub struct JobReport<T> {
    pub job: String,
    pub elapsed_ms: u64,
    pub result: Result<T, JobError>,
}

/// Run `task` to completion on the current thread. Panics are caught and
/// reported as [`JobError::Panicked`].
pub fn run_task<T: NodTask>(task: &T, settings: &Settings) -> JobReport<T::Output> {
    let job = task.describe();
    let start = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| execute(task, settings, &job)))
        .unwrap_or_else(|payload| {
            Err(JobError::Panicked {
                job: job.clone(),
                message: panic_message(payload.as_ref()),
            })
        });
    let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    match &result {
        Ok(_) => debug!(%job, elapsed_ms, "NoD: job finished"),
        Err(err) if err.is_unknown() => warn!(%job, elapsed_ms, "NoD: job result unknown"),
        Err(err) => warn!(%job, elapsed_ms, error = %err, "NoD: job failed"),
    }
    JobReport {
        job,
        elapsed_ms,
        result,
    }
}

fn execute<T: NodTask>(task: &T, settings: &Settings, job: &str) -> Result<T::Output, JobError> {
    let queries = task.encode()?;
    if let Some(dir) = &settings.dump_datalog {
        dump_datalog(dir, &queries)?;
    }
    let programs: Vec<_> = queries
        .iter()
        .map(|q| (q.program.clone(), q.polarity))
        .collect();
    let encoding = assemble(&programs)?;
    let prepared = Prepared { queries, encoding };
    match settings.solver {
        SolverChoice::Z3 => {
            let mut solver = Z3Solver::with_timeout_ms(settings.timeout_ms);
            task.solve(&prepared, &mut solver, job)
        }
        SolverChoice::Cvc5 => {
            let mut solver = Cvc5Solver::with_timeout_ms(settings.timeout_ms)
                .map_err(|e| JobError::solver(job, e))?;
            task.solve(&prepared, &mut solver, job)
        }
    }
}

fn dump_datalog(dir: &Path, queries: &[EncodedQuery]) -> Result<(), JobError> {
    fs::create_dir_all(dir).map_err(|source| JobError::Dump {
        path: dir.to_path_buf(),
        source,
    })?;
    for query in queries {
        let text = render_datalog(&query.program)?;
        let fingerprint = program_fingerprint(&query.program)?;
        let path = dir.join(format!("{}.smt2", &fingerprint[..16.min(fingerprint.len())]));
        fs::write(&path, text).map_err(|source| JobError::Dump {
            path: path.clone(),
            source,
        })?;
        info!(query = %query.description, path = %path.display(), "NoD: wrote datalog");
    }
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// The witness of a SAT outcome, `None` for UNSAT.
pub(crate) fn witness_of(
    outcome: FixedpointOutcome,
    job: &str,
) -> Result<Option<BTreeMap<HeaderField, u64>>, JobError> {
    match outcome {
        FixedpointOutcome::Sat { witness } => Ok(Some(witness)),
        FixedpointOutcome::Unsat => Ok(None),
        FixedpointOutcome::Unknown { reason } => Err(JobError::SolverUnknown {
            job: job.to_string(),
            reason,
        }),
    }
}
