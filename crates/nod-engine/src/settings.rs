//! Engine configuration, loadable from JSON.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Cannot read settings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Which solver backend answers the queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverChoice {
    #[default]
    Z3,
    Cvc5,
}

/// How ACLs are specialized to a query's header space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecializerChoice {
    #[default]
    Bdd,
    Direct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Per-solver timeout in milliseconds; 0 disables it.
    pub timeout_ms: u64,
    /// Worker threads; the available parallelism when unset.
    pub threads: Option<usize>,
    /// Run every job on the calling thread.
    pub sequential: bool,
    pub simplify: bool,
    pub specialize: bool,
    pub specializer: SpecializerChoice,
    /// Directory receiving the datalog rendering of every solved program.
    pub dump_datalog: Option<PathBuf>,
    pub solver: SolverChoice,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_ms: 0,
            threads: None,
            sequential: false,
            simplify: true,
            specialize: false,
            specializer: SpecializerChoice::Bdd,
            dump_datalog: None,
            solver: SolverChoice::Z3,
        }
    }
}

impl Settings {
    pub fn from_json_str(text: &str) -> Result<Self, SettingsError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }
}
