//! Horn rules and the programs built from them.

use std::collections::BTreeSet;

use crate::expr::BoolExpr;
use crate::field::{FieldLayout, HeaderField};
use crate::simplify::simplify_and;
use crate::state::StateExpr;

/// A nondeterministic assignment: after the rule fires, `field` holds some
/// value from one of the inclusive `ranges`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transform {
    pub field: HeaderField,
    pub ranges: Vec<(u64, u64)>,
}

impl Transform {
    pub fn assign(field: HeaderField, value: u64) -> Self {
        Self {
            field,
            ranges: vec![(value, value)],
        }
    }

    pub fn range(field: HeaderField, lo: u64, hi: u64) -> Self {
        Self {
            field,
            ranges: vec![(lo, hi)],
        }
    }
}

/// A Horn clause.
///
/// `preconditions` and `guard` constrain the header before `transforms`
/// apply; `post_transform_preconditions` and `postcondition` see the header
/// after them. A rule without transforms has a single shared header.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Rule {
    pub preconditions: Vec<StateExpr>,
    pub guard: BoolExpr,
    pub transforms: Vec<Transform>,
    pub post_transform_preconditions: Vec<StateExpr>,
    pub postcondition: StateExpr,
    /// Name of the rule family that produced this rule.
    pub family: &'static str,
}

impl Rule {
    pub fn new(postcondition: StateExpr) -> Self {
        Self {
            preconditions: Vec::new(),
            guard: BoolExpr::True,
            transforms: Vec::new(),
            post_transform_preconditions: Vec::new(),
            postcondition,
            family: "",
        }
    }

    /// A rule with no body atoms.
    pub fn axiom(postcondition: StateExpr, guard: BoolExpr) -> Self {
        Self::new(postcondition).guard(guard)
    }

    pub fn when(mut self, state: StateExpr) -> Self {
        self.preconditions.push(state);
        self
    }

    pub fn when_all(mut self, states: impl IntoIterator<Item = StateExpr>) -> Self {
        self.preconditions.extend(states);
        self
    }

    /// Conjoin `guard` onto the rule's guard.
    pub fn guard(mut self, guard: BoolExpr) -> Self {
        self.guard = conjoin(std::mem::replace(&mut self.guard, BoolExpr::True), guard);
        self
    }

    pub fn transform(mut self, transform: Transform) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn after_transform(mut self, state: StateExpr) -> Self {
        self.post_transform_preconditions.push(state);
        self
    }

    pub fn family(mut self, family: &'static str) -> Self {
        self.family = family;
        self
    }

    pub fn is_axiom(&self) -> bool {
        self.preconditions.is_empty() && self.post_transform_preconditions.is_empty()
    }

    pub fn body(&self) -> impl Iterator<Item = &StateExpr> {
        self.preconditions
            .iter()
            .chain(self.post_transform_preconditions.iter())
    }

    pub fn transformed_fields(&self) -> BTreeSet<HeaderField> {
        self.transforms.iter().map(|t| t.field.clone()).collect()
    }

    pub fn transforms_field(&self, field: &HeaderField) -> bool {
        self.transforms.iter().any(|t| &t.field == field)
    }
}

fn conjoin(lhs: BoolExpr, rhs: BoolExpr) -> BoolExpr {
    match (lhs, rhs) {
        (BoolExpr::True, other) | (other, BoolExpr::True) => other,
        (lhs, rhs) => simplify_and(vec![lhs, rhs]),
    }
}

/// Whether a program's queries are asserted derivable or underivable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Polarity {
    #[default]
    Positive,
    Negated,
}

/// An ordered rule list with its queries and a global header constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub rules: Vec<Rule>,
    pub queries: Vec<StateExpr>,
    /// Constraint on the header every derivation starts from. It may only
    /// mention fields no rule transforms.
    pub header_constraint: BoolExpr,
    pub layout: FieldLayout,
}

impl Default for Program {
    fn default() -> Self {
        Self::new(FieldLayout::basic())
    }
}

impl Program {
    pub fn new(layout: FieldLayout) -> Self {
        Self {
            rules: Vec::new(),
            queries: Vec::new(),
            header_constraint: BoolExpr::True,
            layout,
        }
    }

    pub fn with_rules(mut self, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.rules.extend(rules);
        self
    }

    pub fn with_queries(mut self, queries: impl IntoIterator<Item = StateExpr>) -> Self {
        self.queries.extend(queries);
        self
    }

    pub fn with_header_constraint(mut self, constraint: BoolExpr) -> Self {
        self.header_constraint = conjoin(
            std::mem::replace(&mut self.header_constraint, BoolExpr::True),
            constraint,
        );
        self
    }

    /// Concatenate two programs: rules, queries, conjoined header
    /// constraints and the union of both layouts.
    pub fn merge(&self, other: &Program) -> Program {
        let mut layout = self.layout.clone();
        layout.merge(&other.layout);
        Program {
            rules: self.rules.iter().chain(other.rules.iter()).cloned().collect(),
            queries: self
                .queries
                .iter()
                .chain(other.queries.iter())
                .cloned()
                .collect(),
            header_constraint: conjoin(
                self.header_constraint.clone(),
                other.header_constraint.clone(),
            ),
            layout,
        }
    }

    /// Every relation mentioned by a rule or query.
    pub fn relations(&self) -> BTreeSet<StateExpr> {
        let mut out: BTreeSet<StateExpr> = self.queries.iter().cloned().collect();
        for rule in &self.rules {
            out.insert(rule.postcondition.clone());
            out.extend(rule.body().cloned());
        }
        out
    }

    pub fn transformed_fields(&self) -> BTreeSet<HeaderField> {
        self.rules
            .iter()
            .flat_map(|r| r.transforms.iter().map(|t| t.field.clone()))
            .collect()
    }

    /// Every field mentioned by a guard, a transform or the header constraint.
    pub fn referenced_fields(&self) -> BTreeSet<HeaderField> {
        let mut out = self.header_constraint.fields();
        for rule in &self.rules {
            out.extend(rule.guard.fields());
            out.extend(rule.transforms.iter().map(|t| t.field.clone()));
        }
        out
    }

    pub fn rules_deriving<'a>(&'a self, state: &'a StateExpr) -> impl Iterator<Item = &'a Rule> {
        self.rules.iter().filter(move |r| &r.postcondition == state)
    }
}
