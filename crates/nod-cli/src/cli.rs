use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "nod")]
#[command(about = "Network reachability analysis over Datalog programs")]
#[command(version)]
pub(crate) struct Cli {
    /// Engine settings (JSON)
    #[arg(long, global = true)]
    pub settings: Option<PathBuf>,

    /// Worker threads
    #[arg(long, global = true)]
    pub threads: Option<usize>,

    /// Per-solver timeout in milliseconds (0 = none)
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Run every job on the main thread
    #[arg(long, global = true)]
    pub sequential: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Find flows that end in the requested dispositions
    Reach {
        /// Configuration snapshot (JSON)
        #[arg(long)]
        snapshot: PathBuf,
        /// Reachability question (JSON); every entry point and ACCEPTED when absent
        #[arg(long)]
        query: Option<PathBuf>,
    },
    /// Find headers that different paths treat differently
    Multipath {
        #[arg(long)]
        snapshot: PathBuf,
        /// Header space (JSON); every header when absent
        #[arg(long)]
        header_space: Option<PathBuf>,
    },
    /// Report unreachable ACL lines and what shadows them
    AclLines {
        #[arg(long)]
        snapshot: PathBuf,
    },
    /// Find flows accepted now that would be lost with parts disabled
    ReducedReachability {
        #[arg(long)]
        snapshot: PathBuf,
        /// Nodes, VRFs, interfaces and edges to disable (JSON)
        #[arg(long)]
        disabled: PathBuf,
        #[arg(long)]
        header_space: Option<PathBuf>,
    },
    /// Find flows that stop crossing an edge with parts disabled
    PathDiff {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        disabled: PathBuf,
        #[arg(long)]
        header_space: Option<PathBuf>,
    },
    /// Print the datalog program of a reachability question without solving it
    Datalog {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        query: Option<PathBuf>,
    },
}
