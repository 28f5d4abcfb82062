//! Variable naming conventions for the least-fixed-point encoding.
//!
//! - `F_const`: value of an untransformed field, shared by every relation
//! - `rel!R`: relation `R` holds
//! - `rank!R`: derivation rank of a recursive relation
//! - `copy!R!F`: value of transformed field `F` where `R` holds
//! - `pre!k!F`: value of field `F` before rule `k` transforms it
//!
//! `ns` is the composite namespace (`p<k>/`) or empty.

use nod_ir::field::HeaderField;

pub fn global_var(field: &HeaderField) -> String {
    format!("{}_const", field.name())
}

pub(crate) fn rel_var(ns: &str, relation: &str) -> String {
    format!("rel!{ns}{relation}")
}

pub(crate) fn rank_var(ns: &str, relation: &str) -> String {
    format!("rank!{ns}{relation}")
}

pub(crate) fn copy_var(ns: &str, relation: &str, field: &HeaderField) -> String {
    format!("copy!{ns}{relation}!{}", field.name())
}

pub(crate) fn pre_var(ns: &str, rule: usize, field: &HeaderField) -> String {
    format!("pre!{ns}{rule}!{}", field.name())
}

pub(crate) fn namespace(program: usize, composite: bool) -> String {
    if composite {
        format!("p{program}/")
    } else {
        String::new()
    }
}
