use std::collections::BTreeMap;

use super::{rewrite, ConstraintOracle, Relation, Specializer};
use crate::expr::{BoolExpr, IntExpr};
use crate::field::HeaderField;
use crate::header_space::{HeaderSpace, IpSpace, SubRange};
use crate::ip::{Ip, IpWildcard};
use crate::lowering::{match_header_space, match_ip_space};

/// Specializes against the explicit wildcard and range sets of a positive
/// header space.
///
/// Every set it keeps over-approximates the constraint, which is enough for
/// both `Disjoint` and `Covers` answers to stay sound. A negated constraint
/// carries no usable information.
#[derive(Debug, Clone, Default)]
pub struct HeaderSpaceSpecializer {
    ips: BTreeMap<HeaderField, Vec<IpWildcard>>,
    values: BTreeMap<HeaderField, Vec<(u64, u64)>>,
}

fn whitelist_of(space: &IpSpace) -> Option<Vec<IpWildcard>> {
    match space {
        IpSpace::Wildcards { whitelist, .. } => Some(whitelist.clone()),
        other => other.as_whitelist(),
    }
}

fn ranges_of(ranges: &[SubRange]) -> Vec<(u64, u64)> {
    ranges.iter().map(SubRange::as_pair).collect()
}

fn points_of(values: impl IntoIterator<Item = u64>) -> Vec<(u64, u64)> {
    values.into_iter().map(|v| (v, v)).collect()
}

impl HeaderSpaceSpecializer {
    pub fn new(constraint: &HeaderSpace) -> Self {
        let mut out = Self::default();
        if constraint.negate {
            return out;
        }
        for (field, space) in [
            (HeaderField::SrcIp, &constraint.src_ips),
            (HeaderField::DstIp, &constraint.dst_ips),
        ] {
            if let Some(wildcards) = space.as_ref().and_then(whitelist_of) {
                out.ips.insert(field, wildcards);
            }
        }
        let ranged = [
            (HeaderField::SrcPort, ranges_of(&constraint.src_ports)),
            (HeaderField::DstPort, ranges_of(&constraint.dst_ports)),
            (HeaderField::IcmpType, ranges_of(&constraint.icmp_types)),
            (HeaderField::IcmpCode, ranges_of(&constraint.icmp_codes)),
            (
                HeaderField::FragmentOffset,
                ranges_of(&constraint.fragment_offsets),
            ),
            (HeaderField::PacketLength, ranges_of(&constraint.packet_lengths)),
            (
                HeaderField::IpProtocol,
                points_of(constraint.ip_protocols.iter().map(|p| u64::from(p.number()))),
            ),
            (
                HeaderField::Dscp,
                points_of(constraint.dscps.iter().map(|v| u64::from(*v))),
            ),
            (
                HeaderField::Ecn,
                points_of(constraint.ecns.iter().map(|v| u64::from(*v))),
            ),
            (
                HeaderField::State,
                points_of(constraint.states.iter().map(|s| s.number())),
            ),
        ];
        for (field, ranges) in ranged {
            if !ranges.is_empty() {
                out.values.insert(field, ranges);
            }
        }
        out
    }

    fn relate_wildcard(&self, field: &HeaderField, atom: &IpWildcard) -> Relation {
        let Some(known) = self.ips.get(field) else {
            return Relation::Overlaps;
        };
        if known.iter().all(|k| !atom.intersects(k)) {
            Relation::Disjoint
        } else if known.iter().all(|k| atom.superset_of(k)) {
            Relation::Covers
        } else {
            Relation::Overlaps
        }
    }

    fn relate_ranges(&self, field: &HeaderField, atom: &[(u64, u64)]) -> Relation {
        let Some(known) = self.values.get(field) else {
            return Relation::Overlaps;
        };
        let intersects =
            |(klo, khi): &(u64, u64)| atom.iter().any(|(lo, hi)| lo <= khi && klo <= hi);
        if !known.iter().any(intersects) {
            return Relation::Disjoint;
        }
        let merged = merge_ranges(atom);
        let covered =
            |(klo, khi): &(u64, u64)| merged.iter().any(|(lo, hi)| lo <= klo && khi <= hi);
        if known.iter().all(covered) {
            Relation::Covers
        } else {
            Relation::Overlaps
        }
    }

    fn relate_eq(&self, lhs: &IntExpr, rhs: &IntExpr) -> Relation {
        match (lhs, rhs) {
            (IntExpr::Literal(_), IntExpr::Var(_) | IntExpr::Extract { .. }) => {
                self.relate_eq(rhs, lhs)
            }
            (IntExpr::Var(field), IntExpr::Literal(v)) => {
                if self.ips.contains_key(field) {
                    match u32::try_from(*v) {
                        Ok(ip) => self.relate_wildcard(field, &IpWildcard::from(Ip(ip))),
                        Err(_) => Relation::Disjoint,
                    }
                } else {
                    self.relate_ranges(field, &[(*v, *v)])
                }
            }
            (IntExpr::Extract { field, low, high }, IntExpr::Literal(v))
                if self.ips.contains_key(field) && *high < 32 && low <= high =>
            {
                let width = high - low + 1;
                let bits: u32 = if width == 32 { u32::MAX } else { (1u32 << width) - 1 };
                let care = bits << low;
                let Ok(value) = u32::try_from(*v) else {
                    return Relation::Disjoint;
                };
                if value & !bits != 0 {
                    return Relation::Disjoint;
                }
                let atom = IpWildcard::new(Ip(value << low), !care);
                self.relate_wildcard(field, &atom)
            }
            _ => Relation::Overlaps,
        }
    }
}

fn merge_ranges(ranges: &[(u64, u64)]) -> Vec<(u64, u64)> {
    let mut sorted: Vec<(u64, u64)> = ranges.iter().filter(|(lo, hi)| lo <= hi).copied().collect();
    sorted.sort_unstable();
    let mut merged: Vec<(u64, u64)> = Vec::with_capacity(sorted.len());
    for (lo, hi) in sorted {
        match merged.last_mut() {
            Some(last) if lo <= last.1.saturating_add(1) => last.1 = last.1.max(hi),
            _ => merged.push((lo, hi)),
        }
    }
    merged
}

impl ConstraintOracle for HeaderSpaceSpecializer {
    fn relate(&self, term: &BoolExpr) -> Relation {
        match term {
            BoolExpr::True => Relation::Covers,
            BoolExpr::False => Relation::Disjoint,
            BoolExpr::And(items) => {
                let mut all_cover = true;
                for item in items {
                    match self.relate(item) {
                        Relation::Disjoint => return Relation::Disjoint,
                        Relation::Covers => {}
                        Relation::Overlaps => all_cover = false,
                    }
                }
                if all_cover {
                    Relation::Covers
                } else {
                    Relation::Overlaps
                }
            }
            BoolExpr::Or(items) => {
                let mut all_disjoint = true;
                for item in items {
                    match self.relate(item) {
                        Relation::Covers => return Relation::Covers,
                        Relation::Disjoint => {}
                        Relation::Overlaps => all_disjoint = false,
                    }
                }
                if all_disjoint {
                    Relation::Disjoint
                } else {
                    Relation::Overlaps
                }
            }
            BoolExpr::Not(inner) => match self.relate(inner) {
                Relation::Disjoint => Relation::Covers,
                Relation::Covers => Relation::Disjoint,
                Relation::Overlaps => Relation::Overlaps,
            },
            BoolExpr::Eq(lhs, rhs) => self.relate_eq(lhs, rhs),
            BoolExpr::RangeMatch {
                var: IntExpr::Var(field),
                ranges,
            } if !self.ips.contains_key(field) => self.relate_ranges(field, ranges),
            BoolExpr::HeaderSpaceMatch { space, orig_src } => {
                self.relate(&match_header_space(space, *orig_src))
            }
            BoolExpr::IpSpaceMatch { fields, space } => self.relate(&match_ip_space(space, fields)),
            BoolExpr::RangeMatch { .. }
            | BoolExpr::MatchSrcInterface(_)
            | BoolExpr::OriginatingFromDevice
            | BoolExpr::PermittedByAcl(_) => Relation::Overlaps,
        }
    }
}

impl Specializer for HeaderSpaceSpecializer {
    fn can_specialize(&self) -> bool {
        !self.ips.is_empty() || !self.values.is_empty()
    }

    fn specialize(&self, expr: &BoolExpr) -> BoolExpr {
        rewrite(expr, self)
    }
}
