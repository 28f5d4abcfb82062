use std::fs;
use std::path::Path;

use nod_encoder::snapshot::Snapshot;
use nod_encoder::Disabled;
use nod_engine::{
    acl_reachability, multipath, path_diff, reachability, reachability_datalog,
    reduced_reachability, JobExecutor, ReachabilityParameters, Settings,
};
use nod_ir::header_space::HeaderSpace;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::cli::{Cli, Commands};
use crate::error::CliError;

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let text = fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

fn read_or_default<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T, CliError> {
    path.map_or_else(|| Ok(T::default()), read_json)
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(CliError::Output)?;
    println!("{text}");
    Ok(())
}

/// File settings first, then command-line overrides.
pub(crate) fn settings_from_cli(cli: &Cli) -> Result<Settings, CliError> {
    let mut settings = match &cli.settings {
        Some(path) => Settings::from_path(path)?,
        None => Settings::default(),
    };
    if let Some(threads) = cli.threads {
        settings.threads = Some(threads);
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        settings.timeout_ms = timeout_ms;
    }
    settings.sequential |= cli.sequential;
    Ok(settings)
}

fn load_snapshot(path: &Path) -> Result<Snapshot, CliError> {
    let snapshot = Snapshot::from_path(path)?;
    info!(
        path = %path.display(),
        nodes = snapshot.nodes.len(),
        edges = snapshot.edges.len(),
        "NoD: loaded snapshot"
    );
    Ok(snapshot)
}

pub(crate) fn run(cli: &Cli) -> Result<(), CliError> {
    let settings = settings_from_cli(cli)?;
    match &cli.command {
        Commands::Reach { snapshot, query } => {
            let snapshot = load_snapshot(snapshot)?;
            let params: ReachabilityParameters = read_or_default(query.as_deref())?;
            let executor = JobExecutor::new(&settings)?;
            print_json(&reachability(&executor, &snapshot, &params)?)
        }
        Commands::Multipath {
            snapshot,
            header_space,
        } => {
            let snapshot = load_snapshot(snapshot)?;
            let hs: HeaderSpace = read_or_default(header_space.as_deref())?;
            let executor = JobExecutor::new(&settings)?;
            print_json(&multipath(&executor, &snapshot, &hs)?)
        }
        Commands::AclLines { snapshot } => {
            let snapshot = load_snapshot(snapshot)?;
            let executor = JobExecutor::new(&settings)?;
            print_json(&acl_reachability(&executor, &snapshot)?)
        }
        Commands::ReducedReachability {
            snapshot,
            disabled,
            header_space,
        } => {
            let snapshot = load_snapshot(snapshot)?;
            let disabled: Disabled = read_json(disabled)?;
            let hs: HeaderSpace = read_or_default(header_space.as_deref())?;
            let executor = JobExecutor::new(&settings)?;
            print_json(&reduced_reachability(&executor, &snapshot, &disabled, &hs)?)
        }
        Commands::PathDiff {
            snapshot,
            disabled,
            header_space,
        } => {
            let snapshot = load_snapshot(snapshot)?;
            let disabled: Disabled = read_json(disabled)?;
            let hs: HeaderSpace = read_or_default(header_space.as_deref())?;
            let executor = JobExecutor::new(&settings)?;
            print_json(&path_diff(&executor, &snapshot, &disabled, &hs)?)
        }
        Commands::Datalog { snapshot, query } => {
            let snapshot = load_snapshot(snapshot)?;
            let params: ReachabilityParameters = read_or_default(query.as_deref())?;
            print!("{}", reachability_datalog(&settings, &snapshot, &params)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn command_line_overrides_file_settings() -> TestResult {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, r#"{{ "timeout_ms": 500, "threads": 8, "solver": "cvc5" }}"#)?;
        let path = file.path().to_string_lossy().into_owned();
        let cli = Cli::try_parse_from([
            "nod",
            "--settings",
            &path,
            "--threads",
            "2",
            "acl-lines",
            "--snapshot",
            "net.json",
        ])?;
        let settings = settings_from_cli(&cli)?;
        assert_eq!(settings.threads, Some(2));
        assert_eq!(settings.timeout_ms, 500);
        assert_eq!(settings.solver, nod_engine::SolverChoice::Cvc5);
        assert!(!settings.sequential);
        Ok(())
    }

    #[test]
    fn missing_files_name_the_path() -> TestResult {
        let err = read_json::<HeaderSpace>(Path::new("/nonexistent/hs.json"));
        match err {
            Err(CliError::Read { path, .. }) => assert!(path.ends_with("hs.json")),
            other => return Err(format!("unexpected {other:?}").into()),
        }
        Ok(())
    }

    #[test]
    fn absent_query_files_mean_defaults() -> TestResult {
        let params: ReachabilityParameters = read_or_default(None)?;
        assert_eq!(params, ReachabilityParameters::default());
        Ok(())
    }
}
