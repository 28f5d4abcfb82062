#![doc = include_str!("../README.md")]

pub mod analysis;
pub mod answer;
pub mod error;
pub mod executor;
pub mod flow;
pub mod job;
pub mod settings;

pub use analysis::{
    acl_reachability, multipath, path_diff, reachability, reachability_datalog,
    reduced_reachability, IngressSrcIps, ReachabilityParameters,
};
pub use answer::{
    AclLineReport, AclReachabilityAnswer, DifferentialAnswer, DifferentialKind, MultipathAnswer,
    ReachabilityAnswer, Unanswered,
};
pub use error::{AnalysisError, JobError};
pub use executor::JobExecutor;
pub use flow::{Flow, TAG_BASE, TAG_DIFFERENTIAL};
pub use settings::{Settings, SolverChoice, SpecializerChoice};
