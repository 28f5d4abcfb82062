#![doc = include_str!("../README.md")]

//! NoD intermediate representation.
//!
//! This crate defines the header field layout, the Boolean/integer
//! constraint language over header fields, the `HeaderSpace` and `IpSpace`
//! match vocabularies and their lowering, the state relations and Horn rules
//! that make up a reachability program, and the ACL specializers used to
//! shrink filters against a known header constraint.

pub mod acl;
pub mod error;
pub mod expr;
pub mod field;
pub mod header_space;
pub mod ip;
pub mod lowering;
pub mod program;
#[cfg(any(test, feature = "proptest"))]
pub mod proptest_generators;
pub mod simplify;
pub mod specialize;
pub mod state;

pub use error::IrError;
