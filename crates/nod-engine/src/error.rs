use std::path::PathBuf;

use nod_encoder::EncoderError;
use nod_ir::IrError;
use nod_smt::SmtError;
use thiserror::Error;

use crate::settings::SettingsError;

/// Why one job produced no answer. Never crosses the aggregation boundary:
/// analyses report it next to the results of sibling jobs.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error(transparent)]
    Smt(#[from] SmtError),
    #[error("Solver returned unknown for {job}: {reason}")]
    SolverUnknown { job: String, reason: String },
    #[error("Solver failed in {job}: {message}")]
    Solver { job: String, message: String },
    #[error("Invalid job {job}: {message}")]
    Caller { job: String, message: String },
    #[error("Job {job} panicked: {message}")]
    Panicked { job: String, message: String },
    #[error("Cannot write {path}: {source}")]
    Dump {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl JobError {
    pub fn is_unknown(&self) -> bool {
        matches!(self, JobError::SolverUnknown { .. })
    }

    pub(crate) fn solver(job: &str, err: impl std::fmt::Display) -> Self {
        JobError::Solver {
            job: job.to_string(),
            message: err.to_string(),
        }
    }
}

/// Errors that stop an analysis before any job is dispatched.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Encoder(#[from] EncoderError),
    #[error(transparent)]
    Ir(#[from] IrError),
    #[error(transparent)]
    Smt(#[from] SmtError),
    #[error("Invalid request: {0}")]
    Caller(String),
    #[error("Cannot start worker pool: {0}")]
    ThreadPool(String),
}
