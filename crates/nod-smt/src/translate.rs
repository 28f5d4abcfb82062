//! Translation of header constraints into bit-vector SMT terms.

use nod_ir::expr::{BoolExpr, IntExpr};
use nod_ir::field::HeaderField;
use nod_ir::lowering::lower_shorthand;
use nod_ir::IrError;

use crate::error::SmtError;
use crate::terms::SmtTerm;

/// Maps a header field to the term holding its value and that term's width.
pub trait FieldTerms {
    fn field_term(&self, field: &HeaderField) -> Result<(SmtTerm, u32), SmtError>;
}

impl<F> FieldTerms for F
where
    F: Fn(&HeaderField) -> Result<(SmtTerm, u32), SmtError>,
{
    fn field_term(&self, field: &HeaderField) -> Result<(SmtTerm, u32), SmtError> {
        self(field)
    }
}

enum IntTerm {
    Sized(SmtTerm, u32),
    Literal(u64),
}

fn max_value(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

fn translate_int(expr: &IntExpr, fields: &dyn FieldTerms) -> Result<IntTerm, SmtError> {
    match expr {
        IntExpr::Literal(v) => Ok(IntTerm::Literal(*v)),
        IntExpr::Var(field) => {
            let (term, width) = fields.field_term(field)?;
            Ok(IntTerm::Sized(term, width))
        }
        IntExpr::Extract { field, low, high } => {
            let (term, width) = fields.field_term(field)?;
            if low > high || *high >= width {
                return Err(SmtError::WidthMismatch(format!(
                    "bits {low}..={high} of {}-bit field {}",
                    width,
                    field.name()
                )));
            }
            Ok(IntTerm::Sized(term.extract(*high, *low), high - low + 1))
        }
    }
}

fn literal_at(value: u64, width: u32) -> Option<SmtTerm> {
    (value <= max_value(width)).then(|| SmtTerm::bv(value, width))
}

/// Translate a resolved constraint. Shorthand forms are lowered first;
/// node-relative forms are an error.
pub fn translate(expr: &BoolExpr, fields: &dyn FieldTerms) -> Result<SmtTerm, SmtError> {
    match expr {
        BoolExpr::True => Ok(SmtTerm::bool(true)),
        BoolExpr::False => Ok(SmtTerm::bool(false)),
        BoolExpr::And(items) => Ok(SmtTerm::and(
            items
                .iter()
                .map(|i| translate(i, fields))
                .collect::<Result<_, _>>()?,
        )),
        BoolExpr::Or(items) => Ok(SmtTerm::or(
            items
                .iter()
                .map(|i| translate(i, fields))
                .collect::<Result<_, _>>()?,
        )),
        BoolExpr::Not(inner) => Ok(translate(inner, fields)?.not()),
        BoolExpr::Eq(lhs, rhs) => {
            match (translate_int(lhs, fields)?, translate_int(rhs, fields)?) {
                (IntTerm::Literal(a), IntTerm::Literal(b)) => Ok(SmtTerm::bool(a == b)),
                (IntTerm::Sized(t, w), IntTerm::Literal(v))
                | (IntTerm::Literal(v), IntTerm::Sized(t, w)) => Ok(match literal_at(v, w) {
                    Some(lit) => t.eq(lit),
                    None => SmtTerm::bool(false),
                }),
                (IntTerm::Sized(l, lw), IntTerm::Sized(r, rw)) => {
                    if lw != rw {
                        return Err(SmtError::WidthMismatch(format!(
                            "{lw}-bit and {rw}-bit operands of an equality"
                        )));
                    }
                    Ok(l.eq(r))
                }
            }
        }
        BoolExpr::RangeMatch { var, ranges } => match translate_int(var, fields)? {
            IntTerm::Literal(v) => Ok(SmtTerm::bool(
                ranges.iter().any(|(lo, hi)| *lo <= v && v <= *hi),
            )),
            IntTerm::Sized(term, width) => Ok(range_term(&term, width, ranges)),
        },
        BoolExpr::HeaderSpaceMatch { .. } | BoolExpr::IpSpaceMatch { .. } => {
            translate(&lower_shorthand(expr), fields)
        }
        BoolExpr::MatchSrcInterface(_)
        | BoolExpr::OriginatingFromDevice
        | BoolExpr::PermittedByAcl(_) => Err(SmtError::Ir(IrError::UnresolvedExpr(format!(
            "{expr:?}"
        )))),
    }
}

/// `term` lies in one of the inclusive ranges, clamped to the field width.
pub fn range_term(term: &SmtTerm, width: u32, ranges: &[(u64, u64)]) -> SmtTerm {
    let max = max_value(width);
    let mut disjuncts = Vec::with_capacity(ranges.len());
    for &(lo, hi) in ranges {
        let hi = hi.min(max);
        if lo > hi {
            continue;
        }
        if lo == 0 && hi == max {
            return SmtTerm::bool(true);
        }
        if lo == hi {
            disjuncts.push(term.clone().eq(SmtTerm::bv(lo, width)));
            continue;
        }
        let mut bounds = Vec::with_capacity(2);
        if lo > 0 {
            bounds.push(term.clone().bvuge(SmtTerm::bv(lo, width)));
        }
        if hi < max {
            bounds.push(term.clone().bvule(SmtTerm::bv(hi, width)));
        }
        disjuncts.push(if bounds.len() == 1 {
            bounds.remove(0)
        } else {
            SmtTerm::and(bounds)
        });
    }
    if disjuncts.len() == 1 {
        disjuncts.remove(0)
    } else {
        SmtTerm::or(disjuncts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nod_ir::field::FieldLayout;
    use nod_ir::header_space::{HeaderSpace, IpSpace, SubRange};

    fn globals(field: &HeaderField) -> Result<(SmtTerm, u32), SmtError> {
        let width = FieldLayout::basic().require_width(field)?;
        Ok((SmtTerm::var(format!("{}_const", field.name())), width))
    }

    #[test]
    fn literals_take_the_width_of_the_other_operand() -> Result<(), SmtError> {
        let t = translate(&BoolExpr::field_eq(HeaderField::DstPort, 80), &globals)?;
        assert_eq!(t, SmtTerm::var("DST_PORT_const").eq(SmtTerm::bv(80, 16)));
        let too_big = translate(&BoolExpr::field_eq(HeaderField::Ecn, 4), &globals)?;
        assert_eq!(too_big, SmtTerm::bool(false));
        Ok(())
    }

    #[test]
    fn ranges_drop_trivial_bounds() -> Result<(), SmtError> {
        let t = range_term(&SmtTerm::var("p"), 16, &[(0, 1023), (8080, 8080), (65000, 70000)]);
        assert_eq!(
            t,
            SmtTerm::or(vec![
                SmtTerm::var("p").bvule(SmtTerm::bv(1023, 16)),
                SmtTerm::var("p").eq(SmtTerm::bv(8080, 16)),
                SmtTerm::var("p").bvuge(SmtTerm::bv(65000, 16)),
            ])
        );
        assert_eq!(range_term(&SmtTerm::var("p"), 16, &[(0, 65535)]), SmtTerm::bool(true));
        assert_eq!(range_term(&SmtTerm::var("p"), 16, &[]), SmtTerm::or(vec![]));
        Ok(())
    }

    #[test]
    fn header_spaces_lower_before_translation() -> Result<(), Box<dyn std::error::Error>> {
        let hs = HeaderSpace::new()
            .with_dst_ips(IpSpace::Prefix("10.0.0.0/8".parse()?))
            .with_dst_ports(vec![SubRange::single(22)]);
        let t = translate(&BoolExpr::header_space(hs), &globals)?;
        let printed = crate::backends::smtlib_printer::to_smtlib(&t);
        assert!(printed.contains("((_ extract 31 24) DST_IP_const)"));
        assert!(printed.contains("(= DST_PORT_const (_ bv22 16))"));
        Ok(())
    }

    #[test]
    fn node_relative_forms_are_rejected() {
        let err = translate(&BoolExpr::OriginatingFromDevice, &globals);
        assert!(matches!(err, Err(SmtError::Ir(IrError::UnresolvedExpr(_)))));
    }

    #[test]
    fn field_equalities_need_equal_widths() {
        let err = translate(
            &BoolExpr::fields_eq(HeaderField::DstPort, HeaderField::DstIp),
            &globals,
        );
        assert!(matches!(err, Err(SmtError::WidthMismatch(_))));
    }
}
