use biodivine_lib_bdd::{Bdd, BddVariable, BddVariableSet};
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{rewrite, ConstraintOracle, Relation, Specializer};
use crate::error::IrError;
use crate::expr::{BoolExpr, IntExpr};
use crate::field::{bits_for, FieldLayout, HeaderField};
use crate::header_space::HeaderSpace;
use crate::lowering::{match_header_space, match_ip_space};

/// One BDD variable per header bit, most significant bit first within each
/// field, plus an index table for source interfaces.
pub struct BddPacket {
    vars: BddVariableSet,
    fields: IndexMap<HeaderField, Vec<BddVariable>>,
    interfaces: BTreeMap<String, u64>,
}

impl BddPacket {
    pub fn new(layout: &FieldLayout) -> Self {
        Self::build(layout, &[])
    }

    /// A packet that can also decide `MatchSrcInterface` and
    /// `OriginatingFromDevice`: interface `names[k]` gets index `k + 1`,
    /// 0 meaning originated by the device.
    pub fn with_src_interfaces(layout: &FieldLayout, names: &[String]) -> Self {
        let width = bits_for(names.len() as u64 + 1);
        let layout = layout.clone().with_field(HeaderField::SrcInterface, width);
        Self::build(&layout, names)
    }

    fn build(layout: &FieldLayout, names: &[String]) -> Self {
        // fields that would overflow the variable space get no bits
        let mut planned = Vec::new();
        let mut total: u32 = 0;
        for (field, width) in layout.fields() {
            if total + width > u32::from(u16::MAX) {
                continue;
            }
            planned.push((field.clone(), total, width));
            total += width;
        }
        let vars = BddVariableSet::new_anonymous(u16::try_from(total).unwrap_or(u16::MAX));
        let all = vars.variables();
        let fields = planned
            .into_iter()
            .map(|(field, start, width)| {
                let bits = all[start as usize..(start + width) as usize].to_vec();
                (field, bits)
            })
            .collect();
        let interfaces = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i as u64 + 1))
            .collect();
        Self {
            vars,
            fields,
            interfaces,
        }
    }

    pub fn mk_true(&self) -> Bdd {
        self.vars.mk_true()
    }

    pub fn mk_false(&self) -> Bdd {
        self.vars.mk_false()
    }

    /// Number of BDD variables allocated.
    pub fn num_vars(&self) -> usize {
        self.fields.values().map(Vec::len).sum()
    }

    fn int_bits(&self, expr: &IntExpr) -> Option<Vec<BddVariable>> {
        match expr {
            IntExpr::Var(field) => self.fields.get(field).cloned(),
            IntExpr::Extract { field, low, high } => {
                let bits = self.fields.get(field)?;
                let width = bits.len();
                let (low, high) = (*low as usize, *high as usize);
                if low > high || high >= width {
                    return None;
                }
                Some(bits[width - 1 - high..=width - 1 - low].to_vec())
            }
            IntExpr::Literal(_) => None,
        }
    }

    fn bits_eq_value(&self, bits: &[BddVariable], value: u64) -> Bdd {
        let width = bits.len();
        if width < 64 && value >> width != 0 {
            return self.mk_false();
        }
        bits.iter().enumerate().fold(self.mk_true(), |acc, (k, var)| {
            let pos = width - 1 - k;
            acc.and(&self.vars.mk_literal(*var, (value >> pos) & 1 == 1))
        })
    }

    fn bits_le(&self, bits: &[BddVariable], bound: u64) -> Bdd {
        let width = bits.len();
        let mut acc = self.mk_true();
        for pos in 0..width {
            let x = self.vars.mk_var(bits[width - 1 - pos]);
            acc = if (bound >> pos) & 1 == 1 {
                x.not().or(&acc)
            } else {
                x.not().and(&acc)
            };
        }
        acc
    }

    fn bits_ge(&self, bits: &[BddVariable], bound: u64) -> Bdd {
        let width = bits.len();
        let mut acc = self.mk_true();
        for pos in 0..width {
            let x = self.vars.mk_var(bits[width - 1 - pos]);
            acc = if (bound >> pos) & 1 == 1 {
                x.and(&acc)
            } else {
                x.or(&acc)
            };
        }
        acc
    }

    fn bits_in_range(&self, bits: &[BddVariable], lo: u64, hi: u64) -> Bdd {
        let max = if bits.len() >= 64 {
            u64::MAX
        } else {
            (1u64 << bits.len()) - 1
        };
        if lo > hi || lo > max {
            return self.mk_false();
        }
        self.bits_ge(bits, lo).and(&self.bits_le(bits, hi.min(max)))
    }

    fn src_interface_eq(&self, index: u64) -> Option<Bdd> {
        let bits = self.fields.get(&HeaderField::SrcInterface)?;
        Some(self.bits_eq_value(bits, index))
    }

    /// The set of headers satisfying `expr`, or `None` when the expression
    /// mentions something this packet cannot represent.
    pub fn to_bdd(&self, expr: &BoolExpr) -> Option<Bdd> {
        match expr {
            BoolExpr::True => Some(self.mk_true()),
            BoolExpr::False => Some(self.mk_false()),
            BoolExpr::And(items) => items.iter().try_fold(self.mk_true(), |acc, item| {
                self.to_bdd(item).map(|b| acc.and(&b))
            }),
            BoolExpr::Or(items) => items.iter().try_fold(self.mk_false(), |acc, item| {
                self.to_bdd(item).map(|b| acc.or(&b))
            }),
            BoolExpr::Not(inner) => self.to_bdd(inner).map(|b| b.not()),
            BoolExpr::Eq(lhs, rhs) => match (lhs, rhs) {
                (IntExpr::Literal(a), IntExpr::Literal(b)) => Some(if a == b {
                    self.mk_true()
                } else {
                    self.mk_false()
                }),
                (IntExpr::Literal(v), other) | (other, IntExpr::Literal(v)) => {
                    let bits = self.int_bits(other)?;
                    Some(self.bits_eq_value(&bits, *v))
                }
                _ => {
                    let a = self.int_bits(lhs)?;
                    let b = self.int_bits(rhs)?;
                    if a.len() != b.len() {
                        return None;
                    }
                    Some(a.iter().zip(b.iter()).fold(self.mk_true(), |acc, (x, y)| {
                        acc.and(&self.vars.mk_var(*x).iff(&self.vars.mk_var(*y)))
                    }))
                }
            },
            BoolExpr::RangeMatch { var, ranges } => {
                if let IntExpr::Literal(v) = var {
                    let hit = ranges.iter().any(|(lo, hi)| lo <= v && v <= hi);
                    return Some(if hit { self.mk_true() } else { self.mk_false() });
                }
                let bits = self.int_bits(var)?;
                Some(ranges.iter().fold(self.mk_false(), |acc, (lo, hi)| {
                    acc.or(&self.bits_in_range(&bits, *lo, *hi))
                }))
            }
            BoolExpr::HeaderSpaceMatch { space, orig_src } => {
                self.to_bdd(&match_header_space(space, *orig_src))
            }
            BoolExpr::IpSpaceMatch { fields, space } => self.to_bdd(&match_ip_space(space, fields)),
            BoolExpr::MatchSrcInterface(names) => {
                if self.interfaces.is_empty() {
                    return None;
                }
                names.iter().try_fold(self.mk_false(), |acc, name| {
                    match self.interfaces.get(name) {
                        Some(index) => self.src_interface_eq(*index).map(|b| acc.or(&b)),
                        None => Some(acc),
                    }
                })
            }
            BoolExpr::OriginatingFromDevice => self.src_interface_eq(0),
            BoolExpr::PermittedByAcl(_) => None,
        }
    }
}

/// Specializes against an arbitrary constraint represented as a BDD.
///
/// Unlike the direct specializer it proves disjointness and coverage of
/// unions, complements and blacklists exactly.
pub struct BddSpecializer {
    packet: Arc<BddPacket>,
    constraint: Bdd,
}

impl BddSpecializer {
    pub fn new(packet: Arc<BddPacket>, constraint: &BoolExpr) -> Result<Self, IrError> {
        let constraint = packet.to_bdd(constraint).ok_or_else(|| {
            IrError::UnresolvedExpr("constraint cannot be represented over packet bits".into())
        })?;
        Ok(Self { packet, constraint })
    }

    pub fn from_header_space(packet: Arc<BddPacket>, hs: &HeaderSpace) -> Result<Self, IrError> {
        Self::new(packet, &BoolExpr::header_space(hs.clone()))
    }

    pub fn from_bdd(packet: Arc<BddPacket>, constraint: Bdd) -> Self {
        Self { packet, constraint }
    }

    pub fn constraint(&self) -> &Bdd {
        &self.constraint
    }
}

impl ConstraintOracle for BddSpecializer {
    fn relate(&self, term: &BoolExpr) -> Relation {
        let Some(set) = self.packet.to_bdd(term) else {
            return Relation::Overlaps;
        };
        if self.constraint.and(&set).is_false() {
            Relation::Disjoint
        } else if self.constraint.and_not(&set).is_false() {
            Relation::Covers
        } else {
            Relation::Overlaps
        }
    }
}

impl Specializer for BddSpecializer {
    fn can_specialize(&self) -> bool {
        !self.constraint.is_true()
    }

    fn specialize(&self, expr: &BoolExpr) -> BoolExpr {
        match self.relate(expr) {
            Relation::Disjoint => BoolExpr::False,
            Relation::Covers => BoolExpr::True,
            Relation::Overlaps => rewrite(expr, self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header_space::{IpSpace, SubRange};
    use crate::ip::IpWildcard;
    use crate::specialize::HeaderSpaceSpecializer;
    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn packet() -> Arc<BddPacket> {
        Arc::new(BddPacket::new(&FieldLayout::basic()))
    }

    fn dst_slash_24() -> Result<BoolExpr, IrError> {
        Ok(BoolExpr::ip_in(
            HeaderField::DstIp,
            IpSpace::Prefix("10.0.0.0/24".parse()?),
        ))
    }

    #[test]
    fn ranges_are_exact() {
        let p = packet();
        let r = p
            .to_bdd(&BoolExpr::field_range(HeaderField::DstPort, 100, 200))
            .expect("range is representable");
        let inside = p
            .to_bdd(&BoolExpr::field_eq(HeaderField::DstPort, 150))
            .expect("eq is representable");
        let edge = p
            .to_bdd(&BoolExpr::field_eq(HeaderField::DstPort, 201))
            .expect("eq is representable");
        assert!(inside.and_not(&r).is_false());
        assert!(edge.and(&r).is_false());
        let full = p
            .to_bdd(&BoolExpr::field_range(HeaderField::DstPort, 0, 65535))
            .expect("range is representable");
        assert!(full.is_true());
    }

    #[test]
    fn blacklist_union_is_proven_disjoint() -> TestResult {
        let space = IpSpace::Wildcards {
            whitelist: vec![IpWildcard::ANY],
            blacklist: vec!["10.0.0.0/25".parse()?, "10.0.0.128/25".parse()?],
        };
        let expr = BoolExpr::ip_in(HeaderField::DstIp, space);
        let bdd = BddSpecializer::new(packet(), &dst_slash_24()?)?;
        assert!(bdd.can_specialize());
        assert_eq!(bdd.specialize(&expr), BoolExpr::False);

        let direct = HeaderSpaceSpecializer::new(
            &HeaderSpace::new().with_dst_ips(IpSpace::Prefix("10.0.0.0/24".parse()?)),
        );
        assert_ne!(direct.specialize(&expr), BoolExpr::False);
        Ok(())
    }

    #[test]
    fn universe_constraint_cannot_specialize() -> TestResult {
        let bdd = BddSpecializer::new(packet(), &BoolExpr::True)?;
        assert!(!bdd.can_specialize());
        Ok(())
    }

    #[test]
    fn partial_overlap_rewrites_structurally() -> TestResult {
        let bdd = BddSpecializer::new(packet(), &dst_slash_24()?)?;
        let expr = BoolExpr::and(vec![
            BoolExpr::ip_in(HeaderField::DstIp, IpSpace::Prefix("10.0.0.0/16".parse()?)),
            BoolExpr::header_space(HeaderSpace::new().with_dst_ports(vec![SubRange::single(22)])),
        ]);
        let specialized = bdd.specialize(&expr);
        assert_eq!(
            specialized,
            BoolExpr::HeaderSpaceMatch {
                space: Box::new(HeaderSpace::new().with_dst_ports(vec![SubRange::single(22)])),
                orig_src: false,
            }
        );
        Ok(())
    }

    #[test]
    fn src_interfaces_are_restricted() -> TestResult {
        let names: Vec<String> = ["eth0", "eth1", "eth2"].iter().map(|s| s.to_string()).collect();
        let packet = Arc::new(BddPacket::with_src_interfaces(&FieldLayout::basic(), &names));
        let ifaces = |names: [&str; 2]| -> std::collections::BTreeSet<String> {
            names.iter().map(|s| s.to_string()).collect()
        };
        let constraint = BoolExpr::MatchSrcInterface(ifaces(["eth0", "eth1"]));
        let bdd = BddSpecializer::new(packet, &constraint)?;
        let expr = BoolExpr::and(vec![
            BoolExpr::MatchSrcInterface(ifaces(["eth1", "eth2"])),
            BoolExpr::field_eq(HeaderField::DstPort, 80),
        ]);
        assert_eq!(
            bdd.specialize(&expr),
            BoolExpr::And(vec![
                BoolExpr::MatchSrcInterface(["eth1".to_string()].into_iter().collect()),
                BoolExpr::field_eq(HeaderField::DstPort, 80),
            ])
        );
        assert_eq!(bdd.specialize(&BoolExpr::OriginatingFromDevice), BoolExpr::False);
        Ok(())
    }

    #[test]
    fn acl_references_are_not_representable() -> TestResult {
        let p = packet();
        assert!(p.to_bdd(&BoolExpr::PermittedByAcl("x".into())).is_none());
        assert!(BddSpecializer::new(p, &BoolExpr::PermittedByAcl("x".into())).is_err());
        Ok(())
    }
}
