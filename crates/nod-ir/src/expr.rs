use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::acl::{AclResolver, LineAction};
use crate::error::IrError;
use crate::field::HeaderField;
use crate::header_space::HeaderSpace;
use crate::header_space::IpSpace;
use crate::lowering::{match_header_space, match_ip_space};

/// Integer-valued expression over header fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntExpr {
    Var(HeaderField),
    /// A constant. Its bit width is taken from the expression it is compared with.
    Literal(u64),
    /// Bits `low..=high` of a field, bit 0 being least significant.
    Extract {
        field: HeaderField,
        low: u32,
        high: u32,
    },
}

impl IntExpr {
    pub fn var(field: HeaderField) -> Self {
        IntExpr::Var(field)
    }

    pub fn lit(value: u64) -> Self {
        IntExpr::Literal(value)
    }

    pub fn extract(field: HeaderField, low: u32, high: u32) -> Self {
        IntExpr::Extract { field, low, high }
    }

    pub fn field(&self) -> Option<&HeaderField> {
        match self {
            IntExpr::Var(f) | IntExpr::Extract { field: f, .. } => Some(f),
            IntExpr::Literal(_) => None,
        }
    }

    fn eval(&self, packet: &Packet) -> u64 {
        match self {
            IntExpr::Var(f) => packet.get(f),
            IntExpr::Literal(v) => *v,
            IntExpr::Extract { field, low, high } => {
                let width = high.saturating_sub(*low) + 1;
                let shifted = packet.get(field) >> low;
                if width >= 64 {
                    shifted
                } else {
                    shifted & ((1u64 << width) - 1)
                }
            }
        }
    }
}

/// Boolean constraint over header fields.
///
/// `HeaderSpaceMatch` and `IpSpaceMatch` are shorthand that lowers to the
/// primitive forms. `MatchSrcInterface`, `OriginatingFromDevice` and
/// `PermittedByAcl` only make sense relative to one node and must be resolved
/// before solver translation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolExpr {
    True,
    False,
    And(Vec<BoolExpr>),
    Or(Vec<BoolExpr>),
    Not(Box<BoolExpr>),
    Eq(IntExpr, IntExpr),
    /// The value lies in one of the inclusive ranges.
    RangeMatch {
        var: IntExpr,
        ranges: Vec<(u64, u64)>,
    },
    HeaderSpaceMatch {
        space: Box<HeaderSpace>,
        /// Apply source-IP constraints to `ORIG_SRC_IP` instead of `SRC_IP`.
        #[serde(default)]
        orig_src: bool,
    },
    /// Any of the listed fields lies in the space.
    IpSpaceMatch {
        fields: Vec<HeaderField>,
        space: IpSpace,
    },
    MatchSrcInterface(BTreeSet<String>),
    OriginatingFromDevice,
    PermittedByAcl(String),
}

#[allow(clippy::should_implement_trait)]
impl BoolExpr {
    pub fn and(conjuncts: Vec<BoolExpr>) -> Self {
        BoolExpr::And(conjuncts)
    }

    pub fn or(disjuncts: Vec<BoolExpr>) -> Self {
        BoolExpr::Or(disjuncts)
    }

    pub fn not(self) -> Self {
        BoolExpr::Not(Box::new(self))
    }

    pub fn eq(lhs: IntExpr, rhs: IntExpr) -> Self {
        BoolExpr::Eq(lhs, rhs)
    }

    pub fn field_eq(field: HeaderField, value: u64) -> Self {
        BoolExpr::Eq(IntExpr::Var(field), IntExpr::Literal(value))
    }

    pub fn fields_eq(lhs: HeaderField, rhs: HeaderField) -> Self {
        BoolExpr::Eq(IntExpr::Var(lhs), IntExpr::Var(rhs))
    }

    pub fn field_range(field: HeaderField, lo: u64, hi: u64) -> Self {
        BoolExpr::RangeMatch {
            var: IntExpr::Var(field),
            ranges: vec![(lo, hi)],
        }
    }

    pub fn header_space(space: HeaderSpace) -> Self {
        BoolExpr::HeaderSpaceMatch {
            space: Box::new(space),
            orig_src: false,
        }
    }

    pub fn ip_in(field: HeaderField, space: IpSpace) -> Self {
        BoolExpr::IpSpaceMatch {
            fields: vec![field],
            space,
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, BoolExpr::True)
    }

    pub fn is_false(&self) -> bool {
        matches!(self, BoolExpr::False)
    }

    /// True when the expression still holds node-relative forms.
    pub fn is_node_relative(&self) -> bool {
        match self {
            BoolExpr::MatchSrcInterface(_)
            | BoolExpr::OriginatingFromDevice
            | BoolExpr::PermittedByAcl(_) => true,
            BoolExpr::And(items) | BoolExpr::Or(items) => items.iter().any(Self::is_node_relative),
            BoolExpr::Not(inner) => inner.is_node_relative(),
            BoolExpr::True
            | BoolExpr::False
            | BoolExpr::Eq(..)
            | BoolExpr::RangeMatch { .. }
            | BoolExpr::HeaderSpaceMatch { .. }
            | BoolExpr::IpSpaceMatch { .. } => false,
        }
    }

    /// Every header field the expression reads, after lowering shorthand forms.
    pub fn fields(&self) -> BTreeSet<HeaderField> {
        let mut out = BTreeSet::new();
        collect_fields(self, &mut out);
        out
    }

    /// Evaluate against a concrete packet. ACL references are resolved
    /// through `acls`; a reference cycle is an error.
    pub fn eval(&self, packet: &Packet, acls: &dyn AclResolver) -> Result<bool, IrError> {
        let mut stack = Vec::new();
        eval_with_stack(self, packet, acls, &mut stack)
    }
}

fn collect_fields(expr: &BoolExpr, out: &mut BTreeSet<HeaderField>) {
    match expr {
        BoolExpr::True
        | BoolExpr::False
        | BoolExpr::MatchSrcInterface(_)
        | BoolExpr::OriginatingFromDevice
        | BoolExpr::PermittedByAcl(_) => {}
        BoolExpr::And(items) | BoolExpr::Or(items) => {
            for item in items {
                collect_fields(item, out);
            }
        }
        BoolExpr::Not(inner) => collect_fields(inner, out),
        BoolExpr::Eq(lhs, rhs) => {
            out.extend(lhs.field().cloned());
            out.extend(rhs.field().cloned());
        }
        BoolExpr::RangeMatch { var, .. } => out.extend(var.field().cloned()),
        BoolExpr::HeaderSpaceMatch { space, orig_src } => {
            collect_fields(&match_header_space(space, *orig_src), out)
        }
        BoolExpr::IpSpaceMatch { fields, space } => {
            collect_fields(&match_ip_space(space, fields), out)
        }
    }
}

pub(crate) fn eval_with_stack(
    expr: &BoolExpr,
    packet: &Packet,
    acls: &dyn AclResolver,
    stack: &mut Vec<String>,
) -> Result<bool, IrError> {
    Ok(match expr {
        BoolExpr::True => true,
        BoolExpr::False => false,
        BoolExpr::And(items) => {
            for item in items {
                if !eval_with_stack(item, packet, acls, stack)? {
                    return Ok(false);
                }
            }
            true
        }
        BoolExpr::Or(items) => {
            for item in items {
                if eval_with_stack(item, packet, acls, stack)? {
                    return Ok(true);
                }
            }
            false
        }
        BoolExpr::Not(inner) => !eval_with_stack(inner, packet, acls, stack)?,
        BoolExpr::Eq(lhs, rhs) => lhs.eval(packet) == rhs.eval(packet),
        BoolExpr::RangeMatch { var, ranges } => {
            let v = var.eval(packet);
            ranges.iter().any(|(lo, hi)| *lo <= v && v <= *hi)
        }
        BoolExpr::HeaderSpaceMatch { space, orig_src } => {
            eval_with_stack(&match_header_space(space, *orig_src), packet, acls, stack)?
        }
        BoolExpr::IpSpaceMatch { fields, space } => {
            eval_with_stack(&match_ip_space(space, fields), packet, acls, stack)?
        }
        BoolExpr::MatchSrcInterface(names) => packet
            .src_interface
            .as_ref()
            .is_some_and(|name| names.contains(name)),
        BoolExpr::OriginatingFromDevice => packet.src_interface.is_none(),
        BoolExpr::PermittedByAcl(name) => {
            if stack.contains(name) {
                return Err(IrError::AclCycle(name.clone()));
            }
            let acl = acls
                .resolve(name)
                .ok_or_else(|| IrError::UnknownAcl(name.clone()))?;
            stack.push(name.clone());
            let mut verdict = false;
            for line in &acl.lines {
                if eval_with_stack(&line.condition, packet, acls, stack)? {
                    verdict = line.action == LineAction::Permit;
                    break;
                }
            }
            stack.pop();
            verdict
        }
    })
}

/// A fully assigned packet header: field values plus the name of the
/// interface the packet entered on (`None` when originated by the device).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    pub values: BTreeMap<HeaderField, u64>,
    pub src_interface: Option<String>,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unassigned fields read as 0.
    pub fn get(&self, field: &HeaderField) -> u64 {
        self.values.get(field).copied().unwrap_or(0)
    }

    pub fn set(&mut self, field: HeaderField, value: u64) -> &mut Self {
        self.values.insert(field, value);
        self
    }

    pub fn with(mut self, field: HeaderField, value: u64) -> Self {
        self.values.insert(field, value);
        self
    }

    pub fn entering(mut self, iface: impl Into<String>) -> Self {
        self.src_interface = Some(iface.into());
        self
    }
}
