#![doc = include_str!("../README.md")]

//! Program assembly and solver integration for NoD reachability.
//!
//! A [`nod_ir::program::Program`] is a set of Horn clauses over symbolic
//! packet headers. [`encoder::assemble`] turns one or more programs into a
//! [`encoder::HornEncoding`] whose models are exactly the derivations of a
//! query, and [`fixedpoint`] checks each query in its own solver scope.

pub mod backends;
pub mod datalog;
pub mod encoder;
pub mod error;
pub mod fixedpoint;
pub mod solver;
pub mod sorts;
pub mod terms;
pub mod translate;

pub use error::SmtError;
