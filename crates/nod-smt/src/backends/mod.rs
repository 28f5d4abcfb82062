//! Solver backends and the SMT-LIB printer they share.

pub mod cvc5_backend;
pub mod smtlib_printer;
pub mod z3_backend;
