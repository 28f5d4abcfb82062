use std::path::PathBuf;

use nod_encoder::EncoderError;
use nod_engine::settings::SettingsError;
use nod_engine::AnalysisError;
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum CliError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Snapshot(#[from] EncoderError),
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error("Cannot write output: {0}")]
    Output(#[source] serde_json::Error),
}
