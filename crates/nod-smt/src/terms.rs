use crate::sorts::SmtSort;

/// Abstract SMT term representation, solver-agnostic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SmtTerm {
    /// Variable reference by name.
    Var(String),
    /// Integer literal.
    IntLit(i64),
    /// Boolean literal.
    BoolLit(bool),
    /// Bit-vector literal of the given width.
    BvLit { value: u64, width: u32 },

    /// Bits `low..=high` of a bit-vector term.
    Extract {
        high: u32,
        low: u32,
        term: Box<SmtTerm>,
    },

    // Comparison
    Eq(Box<SmtTerm>, Box<SmtTerm>),
    Lt(Box<SmtTerm>, Box<SmtTerm>),
    Le(Box<SmtTerm>, Box<SmtTerm>),
    Gt(Box<SmtTerm>, Box<SmtTerm>),
    Ge(Box<SmtTerm>, Box<SmtTerm>),
    /// Unsigned bit-vector comparison.
    BvUle(Box<SmtTerm>, Box<SmtTerm>),
    BvUge(Box<SmtTerm>, Box<SmtTerm>),

    // Boolean logic
    And(Vec<SmtTerm>),
    Or(Vec<SmtTerm>),
    Not(Box<SmtTerm>),
    Implies(Box<SmtTerm>, Box<SmtTerm>),

    // If-then-else
    Ite(Box<SmtTerm>, Box<SmtTerm>, Box<SmtTerm>),
}

#[allow(clippy::should_implement_trait)]
impl SmtTerm {
    pub fn var(name: impl Into<String>) -> Self {
        SmtTerm::Var(name.into())
    }

    pub fn int(n: i64) -> Self {
        SmtTerm::IntLit(n)
    }

    pub fn bool(b: bool) -> Self {
        SmtTerm::BoolLit(b)
    }

    /// A bit-vector literal. Bits above `width` are dropped.
    pub fn bv(value: u64, width: u32) -> Self {
        let value = if width >= 64 {
            value
        } else {
            value & ((1u64 << width) - 1)
        };
        SmtTerm::BvLit { value, width }
    }

    pub fn extract(self, high: u32, low: u32) -> Self {
        SmtTerm::Extract {
            high,
            low,
            term: Box::new(self),
        }
    }

    pub fn eq(self, other: SmtTerm) -> Self {
        SmtTerm::Eq(Box::new(self), Box::new(other))
    }

    pub fn lt(self, other: SmtTerm) -> Self {
        SmtTerm::Lt(Box::new(self), Box::new(other))
    }

    pub fn le(self, other: SmtTerm) -> Self {
        SmtTerm::Le(Box::new(self), Box::new(other))
    }

    pub fn gt(self, other: SmtTerm) -> Self {
        SmtTerm::Gt(Box::new(self), Box::new(other))
    }

    pub fn ge(self, other: SmtTerm) -> Self {
        SmtTerm::Ge(Box::new(self), Box::new(other))
    }

    pub fn bvule(self, other: SmtTerm) -> Self {
        SmtTerm::BvUle(Box::new(self), Box::new(other))
    }

    pub fn bvuge(self, other: SmtTerm) -> Self {
        SmtTerm::BvUge(Box::new(self), Box::new(other))
    }

    pub fn and(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::And(terms)
    }

    pub fn or(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::Or(terms)
    }

    pub fn not(self) -> Self {
        SmtTerm::Not(Box::new(self))
    }

    pub fn implies(self, other: SmtTerm) -> Self {
        SmtTerm::Implies(Box::new(self), Box::new(other))
    }

    pub fn ite(self, then: SmtTerm, els: SmtTerm) -> Self {
        SmtTerm::Ite(Box::new(self), Box::new(then), Box::new(els))
    }

    /// The sort of the term, given the sorts of its variables.
    ///
    /// Returns `None` for an unknown variable or an ill-sorted term.
    pub fn sort_of(&self, var_sort: &dyn Fn(&str) -> Option<SmtSort>) -> Option<SmtSort> {
        match self {
            SmtTerm::Var(name) => var_sort(name),
            SmtTerm::IntLit(_) => Some(SmtSort::Int),
            SmtTerm::BoolLit(_) => Some(SmtSort::Bool),
            SmtTerm::BvLit { width, .. } => Some(SmtSort::BitVec(*width)),
            SmtTerm::Extract { high, low, term } => match term.sort_of(var_sort)? {
                SmtSort::BitVec(w) if low <= high && *high < w => {
                    Some(SmtSort::BitVec(high - low + 1))
                }
                _ => None,
            },
            SmtTerm::Ite(_, then, els) => {
                let t = then.sort_of(var_sort)?;
                (els.sort_of(var_sort)? == t).then_some(t)
            }
            SmtTerm::Eq(..)
            | SmtTerm::Lt(..)
            | SmtTerm::Le(..)
            | SmtTerm::Gt(..)
            | SmtTerm::Ge(..)
            | SmtTerm::BvUle(..)
            | SmtTerm::BvUge(..)
            | SmtTerm::And(_)
            | SmtTerm::Or(_)
            | SmtTerm::Not(_)
            | SmtTerm::Implies(..) => Some(SmtSort::Bool),
        }
    }
}
