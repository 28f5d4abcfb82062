//! Satisfiability-preserving rewriting of Boolean expressions.

use crate::expr::{BoolExpr, IntExpr};
use crate::lowering::{match_header_space, match_ip_space};

/// Simplify an expression without changing its truth value on any packet.
///
/// `HeaderSpaceMatch` and `IpSpaceMatch` are lowered and the result
/// simplified; node-relative forms are treated as opaque atoms.
pub fn simplify(expr: &BoolExpr) -> BoolExpr {
    match expr {
        BoolExpr::True
        | BoolExpr::False
        | BoolExpr::MatchSrcInterface(_)
        | BoolExpr::OriginatingFromDevice
        | BoolExpr::PermittedByAcl(_) => expr.clone(),
        BoolExpr::And(items) => simplify_and(items.iter().map(simplify).collect()),
        BoolExpr::Or(items) => simplify_or(items.iter().map(simplify).collect()),
        BoolExpr::Not(inner) => simplify_not(simplify(inner)),
        BoolExpr::Eq(lhs, rhs) => simplify_eq(lhs, rhs),
        BoolExpr::RangeMatch { var, ranges } => simplify_range(var, ranges),
        BoolExpr::HeaderSpaceMatch { space, orig_src } => {
            simplify(&match_header_space(space, *orig_src))
        }
        BoolExpr::IpSpaceMatch { fields, space } => simplify(&match_ip_space(space, fields)),
    }
}

/// Flatten nested conjunctions, drop `True`, short-circuit on `False`.
pub fn simplify_and(items: Vec<BoolExpr>) -> BoolExpr {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            BoolExpr::True => {}
            BoolExpr::False => return BoolExpr::False,
            BoolExpr::And(nested) => {
                for n in nested {
                    match n {
                        BoolExpr::True => {}
                        BoolExpr::False => return BoolExpr::False,
                        other => push_unique(&mut out, other),
                    }
                }
            }
            other => push_unique(&mut out, other),
        }
    }
    match out.len() {
        0 => BoolExpr::True,
        1 => out.pop().unwrap_or(BoolExpr::True),
        _ => BoolExpr::And(out),
    }
}

/// Flatten nested disjunctions, drop `False`, short-circuit on `True`.
pub fn simplify_or(items: Vec<BoolExpr>) -> BoolExpr {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match item {
            BoolExpr::False => {}
            BoolExpr::True => return BoolExpr::True,
            BoolExpr::Or(nested) => {
                for n in nested {
                    match n {
                        BoolExpr::False => {}
                        BoolExpr::True => return BoolExpr::True,
                        other => push_unique(&mut out, other),
                    }
                }
            }
            other => push_unique(&mut out, other),
        }
    }
    match out.len() {
        0 => BoolExpr::False,
        1 => out.pop().unwrap_or(BoolExpr::False),
        _ => BoolExpr::Or(out),
    }
}

fn push_unique(out: &mut Vec<BoolExpr>, item: BoolExpr) {
    if !out.contains(&item) {
        out.push(item);
    }
}

pub fn simplify_not(inner: BoolExpr) -> BoolExpr {
    match inner {
        BoolExpr::True => BoolExpr::False,
        BoolExpr::False => BoolExpr::True,
        BoolExpr::Not(double) => *double,
        other => other.not(),
    }
}

fn simplify_eq(lhs: &IntExpr, rhs: &IntExpr) -> BoolExpr {
    match (lhs, rhs) {
        (IntExpr::Literal(a), IntExpr::Literal(b)) => {
            if a == b {
                BoolExpr::True
            } else {
                BoolExpr::False
            }
        }
        _ if lhs == rhs => BoolExpr::True,
        // keep the variable on the left so structurally equal atoms compare equal
        (IntExpr::Literal(_), _) => BoolExpr::Eq(rhs.clone(), lhs.clone()),
        _ => BoolExpr::Eq(lhs.clone(), rhs.clone()),
    }
}

fn value_width(var: &IntExpr) -> Option<u32> {
    match var {
        IntExpr::Var(field) => field.basic_width(),
        IntExpr::Extract { low, high, .. } => Some(high.saturating_sub(*low) + 1),
        IntExpr::Literal(_) => None,
    }
}

fn simplify_range(var: &IntExpr, ranges: &[(u64, u64)]) -> BoolExpr {
    if let IntExpr::Literal(v) = var {
        return if ranges.iter().any(|(lo, hi)| lo <= v && v <= hi) {
            BoolExpr::True
        } else {
            BoolExpr::False
        };
    }
    let max = value_width(var).map(|w| if w >= 64 { u64::MAX } else { (1u64 << w) - 1 });
    let mut kept: Vec<(u64, u64)> = ranges
        .iter()
        .filter(|(lo, hi)| lo <= hi && max.map_or(true, |m| *lo <= m))
        .map(|(lo, hi)| (*lo, max.map_or(*hi, |m| (*hi).min(m))))
        .collect();
    if kept.is_empty() {
        return BoolExpr::False;
    }
    kept.sort_unstable();
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(kept.len());
    for (lo, hi) in kept {
        match merged.last_mut() {
            Some(last) if lo <= last.1.saturating_add(1) => last.1 = last.1.max(hi),
            _ => merged.push((lo, hi)),
        }
    }
    if let (Some(m), [(0, hi)]) = (max, merged.as_slice()) {
        if *hi == m {
            return BoolExpr::True;
        }
    }
    if let [(lo, hi)] = merged.as_slice() {
        if lo == hi {
            return BoolExpr::Eq(var.clone(), IntExpr::Literal(*lo));
        }
    }
    BoolExpr::RangeMatch {
        var: var.clone(),
        ranges: merged,
    }
}
