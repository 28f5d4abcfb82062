//! Rewriting filters against a header constraint known to hold.
//!
//! For a constraint `C` every specializer guarantees that
//! `specialize(e) ∧ C` and `e ∧ C` agree on every concrete header. Terms
//! disjoint from `C` become `False`, terms covering `C` become `True`.

mod bdd;
mod direct;

pub use bdd::{BddPacket, BddSpecializer};
pub use direct::HeaderSpaceSpecializer;

use std::collections::BTreeSet;

use crate::acl::{Acl, AclLine};
use crate::expr::BoolExpr;
use crate::field::HeaderField;
use crate::header_space::{HeaderSpace, IpSpace, SubRange};
use crate::ip::IpWildcard;
use crate::lowering::{
    match_ip_space, match_wildcard, protocol_expr, ranges_expr, tcp_flags_expr, values_expr,
};
use crate::simplify::{simplify_and, simplify_not, simplify_or};

/// How the headers matching a term relate to the constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// No header satisfying the constraint matches.
    Disjoint,
    /// Every header satisfying the constraint matches.
    Covers,
    Overlaps,
}

/// Answers set questions about one term at a time. `Overlaps` is always a
/// sound answer.
pub trait ConstraintOracle {
    fn relate(&self, term: &BoolExpr) -> Relation;
}

pub trait Specializer {
    /// False when the constraint carries no information to exploit.
    fn can_specialize(&self) -> bool;

    fn specialize(&self, expr: &BoolExpr) -> BoolExpr;
}

/// Specialize every line of `acl`, keeping line numbering intact.
///
/// Once a line becomes unconditional, no later line can ever be the first
/// match, so those lines become `False`.
pub fn specialize_acl(acl: &Acl, specializer: &dyn Specializer) -> Acl {
    let mut shadowed = false;
    let lines = acl
        .lines
        .iter()
        .map(|line| {
            let condition = if shadowed {
                BoolExpr::False
            } else {
                specializer.specialize(&line.condition)
            };
            shadowed |= condition.is_true();
            AclLine::new(line.action, condition, line.name.clone())
        })
        .collect();
    Acl::new(acl.name.clone(), lines)
}

/// The structural rewrite shared by both specializers.
pub(crate) fn rewrite(expr: &BoolExpr, oracle: &dyn ConstraintOracle) -> BoolExpr {
    match expr {
        BoolExpr::True | BoolExpr::False | BoolExpr::PermittedByAcl(_) => expr.clone(),
        BoolExpr::And(items) => simplify_and(items.iter().map(|i| rewrite(i, oracle)).collect()),
        BoolExpr::Or(items) => simplify_or(items.iter().map(|i| rewrite(i, oracle)).collect()),
        BoolExpr::Not(inner) => simplify_not(rewrite(inner, oracle)),
        BoolExpr::Eq(..) | BoolExpr::RangeMatch { .. } | BoolExpr::OriginatingFromDevice => {
            match oracle.relate(expr) {
                Relation::Disjoint => BoolExpr::False,
                Relation::Covers => BoolExpr::True,
                Relation::Overlaps => expr.clone(),
            }
        }
        BoolExpr::MatchSrcInterface(names) => {
            let mut kept = BTreeSet::new();
            for name in names {
                let single = BoolExpr::MatchSrcInterface([name.clone()].into_iter().collect());
                match oracle.relate(&single) {
                    Relation::Disjoint => {}
                    Relation::Covers => return BoolExpr::True,
                    Relation::Overlaps => {
                        kept.insert(name.clone());
                    }
                }
            }
            if kept.is_empty() {
                BoolExpr::False
            } else {
                BoolExpr::MatchSrcInterface(kept)
            }
        }
        BoolExpr::IpSpaceMatch { fields, space } => {
            match specialize_ip_space(space, fields, oracle) {
                IpSpace::Empty => BoolExpr::False,
                IpSpace::Universe => BoolExpr::True,
                space => BoolExpr::IpSpaceMatch {
                    fields: fields.clone(),
                    space,
                },
            }
        }
        BoolExpr::HeaderSpaceMatch { space, orig_src } => {
            let matched = match specialize_header_space(space, *orig_src, oracle) {
                None => BoolExpr::False,
                Some(hs) if hs.is_unconstrained() => BoolExpr::True,
                Some(hs) => BoolExpr::HeaderSpaceMatch {
                    space: Box::new(hs),
                    orig_src: *orig_src,
                },
            };
            if space.negate {
                simplify_not(matched)
            } else {
                matched
            }
        }
    }
}

fn relate_wildcard(
    w: &IpWildcard,
    fields: &[HeaderField],
    oracle: &dyn ConstraintOracle,
) -> Relation {
    let term = simplify_or(fields.iter().map(|f| match_wildcard(f, w)).collect());
    oracle.relate(&term)
}

/// Specialize an IP space matched against any of `fields`.
pub(crate) fn specialize_ip_space(
    space: &IpSpace,
    fields: &[HeaderField],
    oracle: &dyn ConstraintOracle,
) -> IpSpace {
    match space {
        IpSpace::Universe | IpSpace::Empty => space.clone(),
        IpSpace::Ip(_) | IpSpace::Prefix(_) => match oracle.relate(&match_ip_space(space, fields)) {
            Relation::Disjoint => IpSpace::Empty,
            Relation::Covers => IpSpace::Universe,
            Relation::Overlaps => space.clone(),
        },
        IpSpace::Wildcards {
            whitelist,
            blacklist,
        } => {
            let mut allowed = Vec::new();
            for w in whitelist {
                match relate_wildcard(w, fields, oracle) {
                    Relation::Disjoint => {}
                    Relation::Covers => {
                        allowed = vec![IpWildcard::ANY];
                        break;
                    }
                    Relation::Overlaps => allowed.push(*w),
                }
            }
            if allowed.is_empty() {
                return IpSpace::Empty;
            }
            let mut blocked = Vec::new();
            for w in blacklist {
                match relate_wildcard(w, fields, oracle) {
                    Relation::Disjoint => {}
                    Relation::Covers => return IpSpace::Empty,
                    Relation::Overlaps => blocked.push(*w),
                }
            }
            if blocked.is_empty() && allowed == [IpWildcard::ANY] {
                IpSpace::Universe
            } else {
                IpSpace::Wildcards {
                    whitelist: allowed,
                    blacklist: blocked,
                }
            }
        }
        IpSpace::Union(spaces) => {
            let mut kept = Vec::new();
            for s in spaces {
                match specialize_ip_space(s, fields, oracle) {
                    IpSpace::Universe => return IpSpace::Universe,
                    IpSpace::Empty => {}
                    other => kept.push(other),
                }
            }
            match kept.len() {
                0 => IpSpace::Empty,
                1 => kept.pop().unwrap_or(IpSpace::Empty),
                _ => IpSpace::Union(kept),
            }
        }
        IpSpace::Complement(inner) => match specialize_ip_space(inner, fields, oracle) {
            IpSpace::Universe => IpSpace::Empty,
            IpSpace::Empty => IpSpace::Universe,
            other => other.complement(),
        },
    }
}

enum Pruned<T> {
    /// The set always holds under the constraint.
    Unconstrained,
    /// The set can never hold under the constraint.
    Unmatchable,
    Members(Vec<T>),
}

/// Prune a positive (disjunctive) member set. An empty input stays empty.
fn prune_positive<T: Clone>(
    members: &[T],
    term: impl Fn(&T) -> BoolExpr,
    oracle: &dyn ConstraintOracle,
) -> Pruned<T> {
    if members.is_empty() {
        return Pruned::Members(Vec::new());
    }
    let mut kept = Vec::new();
    for m in members {
        match oracle.relate(&term(m)) {
            Relation::Disjoint => {}
            Relation::Covers => return Pruned::Unconstrained,
            Relation::Overlaps => kept.push(m.clone()),
        }
    }
    if kept.is_empty() {
        Pruned::Unmatchable
    } else {
        Pruned::Members(kept)
    }
}

/// Prune an excluded member set.
fn prune_negative<T: Clone>(
    members: &[T],
    term: impl Fn(&T) -> BoolExpr,
    oracle: &dyn ConstraintOracle,
) -> Pruned<T> {
    let mut kept = Vec::new();
    for m in members {
        match oracle.relate(&term(m)) {
            Relation::Disjoint => {}
            Relation::Covers => return Pruned::Unmatchable,
            Relation::Overlaps => kept.push(m.clone()),
        }
    }
    Pruned::Members(kept)
}

/// Write a pruned set back; `None` when the set can never hold.
fn apply<T>(pruned: Pruned<T>) -> Option<Vec<T>> {
    match pruned {
        Pruned::Unconstrained => Some(Vec::new()),
        Pruned::Unmatchable => None,
        Pruned::Members(kept) => Some(kept),
    }
}

fn positive_ips(
    space: &Option<IpSpace>,
    fields: &[HeaderField],
    oracle: &dyn ConstraintOracle,
) -> Option<Option<IpSpace>> {
    match space {
        None => Some(None),
        Some(space) => match specialize_ip_space(space, fields, oracle) {
            IpSpace::Empty => None,
            IpSpace::Universe => Some(None),
            other => Some(Some(other)),
        },
    }
}

fn negative_ips(
    space: &Option<IpSpace>,
    fields: &[HeaderField],
    oracle: &dyn ConstraintOracle,
) -> Option<Option<IpSpace>> {
    match space {
        None => Some(None),
        Some(space) => match specialize_ip_space(space, fields, oracle) {
            IpSpace::Universe => None,
            IpSpace::Empty => Some(None),
            other => Some(Some(other)),
        },
    }
}

/// Specialize the positive part of a header space (its `negate` flag is
/// cleared). Returns `None` when the space can never match under the
/// constraint.
fn specialize_header_space(
    hs: &HeaderSpace,
    orig_src: bool,
    oracle: &dyn ConstraintOracle,
) -> Option<HeaderSpace> {
    let src = if orig_src {
        HeaderField::OrigSrcIp
    } else {
        HeaderField::SrcIp
    };
    let src_ips = [src.clone()];
    let dst_ips = [HeaderField::DstIp];
    let both_ips = [src, HeaderField::DstIp];
    let src_ports = [HeaderField::SrcPort];
    let dst_ports = [HeaderField::DstPort];
    let both_ports = [HeaderField::DstPort, HeaderField::SrcPort];

    let ranges_on = |fields: &[HeaderField]| {
        let fields = fields.to_vec();
        move |r: &SubRange| {
            simplify_or(
                fields
                    .iter()
                    .map(|f| ranges_expr(f.clone(), std::slice::from_ref(r)))
                    .collect(),
            )
        }
    };
    let protocols_on = |fields: &[HeaderField]| {
        let fields = fields.to_vec();
        move |p: &crate::header_space::Protocol| protocol_expr(*p, &fields)
    };
    let value_on = |field: HeaderField| move |v: &u8| values_expr(field.clone(), [u64::from(*v)]);
    let range_on = |field: HeaderField| {
        move |r: &SubRange| ranges_expr(field.clone(), std::slice::from_ref(r))
    };

    Some(HeaderSpace {
        src_ips: positive_ips(&hs.src_ips, &src_ips, oracle)?,
        not_src_ips: negative_ips(&hs.not_src_ips, &src_ips, oracle)?,
        dst_ips: positive_ips(&hs.dst_ips, &dst_ips, oracle)?,
        not_dst_ips: negative_ips(&hs.not_dst_ips, &dst_ips, oracle)?,
        src_or_dst_ips: positive_ips(&hs.src_or_dst_ips, &both_ips, oracle)?,
        not_src_or_dst_ips: negative_ips(&hs.not_src_or_dst_ips, &both_ips, oracle)?,

        src_ports: apply(prune_positive(&hs.src_ports, ranges_on(&src_ports), oracle))?,
        not_src_ports: apply(prune_negative(&hs.not_src_ports, ranges_on(&src_ports), oracle))?,
        dst_ports: apply(prune_positive(&hs.dst_ports, ranges_on(&dst_ports), oracle))?,
        not_dst_ports: apply(prune_negative(&hs.not_dst_ports, ranges_on(&dst_ports), oracle))?,
        src_or_dst_ports: apply(prune_positive(
            &hs.src_or_dst_ports,
            ranges_on(&both_ports),
            oracle,
        ))?,
        not_src_or_dst_ports: apply(prune_negative(
            &hs.not_src_or_dst_ports,
            ranges_on(&both_ports),
            oracle,
        ))?,

        src_protocols: apply(prune_positive(&hs.src_protocols, protocols_on(&src_ports), oracle))?,
        not_src_protocols: apply(prune_negative(
            &hs.not_src_protocols,
            protocols_on(&src_ports),
            oracle,
        ))?,
        dst_protocols: apply(prune_positive(&hs.dst_protocols, protocols_on(&dst_ports), oracle))?,
        not_dst_protocols: apply(prune_negative(
            &hs.not_dst_protocols,
            protocols_on(&dst_ports),
            oracle,
        ))?,
        src_or_dst_protocols: apply(prune_positive(
            &hs.src_or_dst_protocols,
            protocols_on(&both_ports),
            oracle,
        ))?,
        not_src_or_dst_protocols: apply(prune_negative(
            &hs.not_src_or_dst_protocols,
            protocols_on(&both_ports),
            oracle,
        ))?,

        ip_protocols: apply(prune_positive(
            &hs.ip_protocols,
            |p| values_expr(HeaderField::IpProtocol, [u64::from(p.number())]),
            oracle,
        ))?,
        not_ip_protocols: apply(prune_negative(
            &hs.not_ip_protocols,
            |p| values_expr(HeaderField::IpProtocol, [u64::from(p.number())]),
            oracle,
        ))?,

        dscps: apply(prune_positive(&hs.dscps, value_on(HeaderField::Dscp), oracle))?,
        not_dscps: apply(prune_negative(&hs.not_dscps, value_on(HeaderField::Dscp), oracle))?,
        ecns: apply(prune_positive(&hs.ecns, value_on(HeaderField::Ecn), oracle))?,
        not_ecns: apply(prune_negative(&hs.not_ecns, value_on(HeaderField::Ecn), oracle))?,
        fragment_offsets: apply(prune_positive(
            &hs.fragment_offsets,
            range_on(HeaderField::FragmentOffset),
            oracle,
        ))?,
        not_fragment_offsets: apply(prune_negative(
            &hs.not_fragment_offsets,
            range_on(HeaderField::FragmentOffset),
            oracle,
        ))?,
        icmp_types: apply(prune_positive(&hs.icmp_types, range_on(HeaderField::IcmpType), oracle))?,
        not_icmp_types: apply(prune_negative(
            &hs.not_icmp_types,
            range_on(HeaderField::IcmpType),
            oracle,
        ))?,
        icmp_codes: apply(prune_positive(&hs.icmp_codes, range_on(HeaderField::IcmpCode), oracle))?,
        not_icmp_codes: apply(prune_negative(
            &hs.not_icmp_codes,
            range_on(HeaderField::IcmpCode),
            oracle,
        ))?,
        packet_lengths: apply(prune_positive(
            &hs.packet_lengths,
            range_on(HeaderField::PacketLength),
            oracle,
        ))?,
        not_packet_lengths: apply(prune_negative(
            &hs.not_packet_lengths,
            range_on(HeaderField::PacketLength),
            oracle,
        ))?,

        states: apply(prune_positive(
            &hs.states,
            |s| values_expr(HeaderField::State, [s.number()]),
            oracle,
        ))?,
        tcp_flags: apply(prune_positive(&hs.tcp_flags, tcp_flags_expr, oracle))?,
        negate: false,
    })
}
