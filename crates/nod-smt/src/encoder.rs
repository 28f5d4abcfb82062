//! Least-fixed-point encoding of Horn programs into QF_BV plus integer ranks.
//!
//! Every relation `R` in the cone of influence of a query becomes a Boolean
//! `rel!R`. A relation may only hold if one of the rules deriving it fires,
//! and a rule only fires on body relations that hold. Relations on a
//! derivation cycle carry an integer rank that must strictly increase along
//! every rule, which rules out self-supporting derivations.
//!
//! A negated program additionally asserts every rule's completion: when the
//! body holds, so does the head. Ranks only order the supporting derivation,
//! so the completion reads the body without them.
//!
//! Fields no rule transforms are the same everywhere in a derivation and are
//! shared globals (`F_const`). A transformed field gets one copy per relation
//! that can observe it, so a relation holds for a single header value in any
//! one model. Program generators keep a relation from being needed at two
//! values of a transformed field by giving each use site its own relation,
//! as ACLs do with their `AclSite`.

mod deps;
pub mod variables;

use std::collections::BTreeSet;

use indexmap::IndexMap;
use nod_ir::field::{FieldLayout, HeaderField};
use nod_ir::program::{Polarity, Program, Rule};
use nod_ir::state::StateExpr;
use tracing::debug;

use crate::error::SmtError;
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;
use crate::translate::{range_term, translate};

use deps::Dependencies;
pub use variables::global_var;
use variables::{copy_var, namespace, pre_var, rank_var, rel_var};

/// The variable holding one header field at a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WitnessVar {
    pub field: HeaderField,
    pub var: String,
    pub width: u32,
}

/// One query of one program, ready to assert.
#[derive(Debug, Clone)]
pub struct QueryGoal {
    pub program: usize,
    pub relation: StateExpr,
    pub polarity: Polarity,
    /// `rel!Q` for a positive program, its negation otherwise.
    pub term: SmtTerm,
    /// Where to read each header field of a witness, in layout order.
    pub witness: Vec<WitnessVar>,
}

/// Sizes of an encoding, for logging and benchmarks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodingStats {
    pub relations: usize,
    pub recursive_relations: usize,
    pub rules: usize,
    pub copies: usize,
}

/// Declarations, background assertions and query goals for a set of programs
/// over one shared header.
#[derive(Debug, Clone, Default)]
pub struct HornEncoding {
    pub declarations: Vec<(String, SmtSort)>,
    pub assertions: Vec<SmtTerm>,
    pub goals: Vec<QueryGoal>,
    pub layout: FieldLayout,
    pub stats: EncodingStats,
}

impl HornEncoding {
    /// The goal for `relation` in program `program`.
    pub fn goal(&self, program: usize, relation: &StateExpr) -> Result<&QueryGoal, SmtError> {
        self.goals
            .iter()
            .find(|g| g.program == program && &g.relation == relation)
            .ok_or_else(|| SmtError::UnknownRelation(relation.relation_name()))
    }
}

struct Builder {
    declarations: IndexMap<String, SmtSort>,
    assertions: Vec<SmtTerm>,
    stats: EncodingStats,
}

impl Builder {
    fn declare(&mut self, name: String, sort: SmtSort) -> SmtTerm {
        let term = SmtTerm::var(name.clone());
        self.declarations.entry(name).or_insert(sort);
        term
    }
}

/// Encode programs that share one header.
///
/// With more than one program, relation variables are namespaced `p<k>/`.
/// A negated program may not transform any field.
pub fn assemble(programs: &[(Program, Polarity)]) -> Result<HornEncoding, SmtError> {
    let composite = programs.len() > 1;
    let mut layout = FieldLayout::default();
    for (program, _) in programs {
        layout.merge(&program.layout);
    }

    let mut builder = Builder {
        declarations: IndexMap::new(),
        assertions: Vec::new(),
        stats: EncodingStats::default(),
    };
    for (field, width) in layout.fields() {
        builder.declare(global_var(field), SmtSort::BitVec(width));
    }
    let transformed_anywhere: BTreeSet<HeaderField> = programs
        .iter()
        .flat_map(|(p, _)| p.transformed_fields())
        .collect();
    if let Some(sanity) = sanity_constraint(&layout, &transformed_anywhere) {
        builder.assertions.push(sanity);
    }

    let mut goals = Vec::new();
    for (index, (program, polarity)) in programs.iter().enumerate() {
        let ns = namespace(index, composite);
        let program_goals = encode_program(&mut builder, &layout, program, *polarity, index, &ns)?;
        goals.extend(program_goals);
    }

    debug!(
        programs = programs.len(),
        relations = builder.stats.relations,
        recursive = builder.stats.recursive_relations,
        rules = builder.stats.rules,
        copies = builder.stats.copies,
        "NoD: assembled Horn encoding"
    );

    Ok(HornEncoding {
        declarations: builder.declarations.into_iter().collect(),
        assertions: builder.assertions,
        goals,
        layout,
        stats: builder.stats,
    })
}

/// Packets that are neither TCP nor UDP carry zero ports.
fn sanity_constraint(layout: &FieldLayout, transformed: &BTreeSet<HeaderField>) -> Option<SmtTerm> {
    let fields = [HeaderField::IpProtocol, HeaderField::DstPort, HeaderField::SrcPort];
    if fields
        .iter()
        .any(|f| !layout.contains(f) || transformed.contains(f))
    {
        return None;
    }
    let proto = SmtTerm::var(global_var(&HeaderField::IpProtocol));
    let zero_port = |f: &HeaderField| SmtTerm::var(global_var(f)).eq(SmtTerm::bv(0, 16));
    Some(SmtTerm::or(vec![
        proto.clone().eq(SmtTerm::bv(6, 8)),
        proto.eq(SmtTerm::bv(17, 8)),
        SmtTerm::and(vec![
            zero_port(&HeaderField::DstPort),
            zero_port(&HeaderField::SrcPort),
        ]),
    ]))
}

struct ProgramContext<'a> {
    program: &'a Program,
    layout: &'a FieldLayout,
    deps: Dependencies,
    transformed: BTreeSet<HeaderField>,
    ns: &'a str,
}

impl ProgramContext<'_> {
    fn width(&self, field: &HeaderField) -> Result<u32, SmtError> {
        Ok(self.layout.require_width(field)?)
    }

    fn rel(&self, relation: &StateExpr) -> SmtTerm {
        SmtTerm::var(rel_var(self.ns, &relation.relation_name()))
    }

    fn rank(&self, relation: &StateExpr) -> SmtTerm {
        SmtTerm::var(rank_var(self.ns, &relation.relation_name()))
    }

    fn copy(&self, relation: &StateExpr, field: &HeaderField) -> SmtTerm {
        SmtTerm::var(copy_var(self.ns, &relation.relation_name(), field))
    }

    /// Value of `field` before rule `k` fires.
    fn pre_value(
        &self,
        builder: &mut Builder,
        k: usize,
        rule: &Rule,
        field: &HeaderField,
    ) -> Result<(SmtTerm, u32), SmtError> {
        let width = self.width(field)?;
        if !self.transformed.contains(field) {
            return Ok((SmtTerm::var(global_var(field)), width));
        }
        if !rule.transforms_field(field) && self.deps.tracks(&rule.postcondition, field) {
            return Ok((self.copy(&rule.postcondition, field), width));
        }
        let term = builder.declare(pre_var(self.ns, k, field), SmtSort::BitVec(width));
        Ok((term, width))
    }

    /// Value of `field` after rule `k` fires.
    fn post_value(
        &self,
        builder: &mut Builder,
        k: usize,
        rule: &Rule,
        field: &HeaderField,
    ) -> Result<SmtTerm, SmtError> {
        if self.transformed.contains(field) && self.deps.tracks(&rule.postcondition, field) {
            return Ok(self.copy(&rule.postcondition, field));
        }
        Ok(self.pre_value(builder, k, rule, field)?.0)
    }

    /// `body` holds and, when `ranked`, sits below the head in rank if both
    /// are on one cycle.
    fn body_atom(&self, body: &StateExpr, head: &StateExpr, ranked: bool, out: &mut Vec<SmtTerm>) {
        out.push(self.rel(body));
        if ranked && self.deps.same_component(body, head) {
            out.push(self.rank(body).lt(self.rank(head)));
        }
    }

    /// The condition under which rule `k` derives its postcondition. With
    /// `ranked` unset the rank ordering is left out, which gives the plain
    /// rule body.
    fn support(&self, builder: &mut Builder, k: usize, ranked: bool) -> Result<SmtTerm, SmtError> {
        let rule = &self.program.rules[k];
        let head = &rule.postcondition;
        let mut conjuncts = Vec::new();

        if !rule.guard.is_true() {
            for field in rule.guard.fields() {
                if self.needs_pre_var(rule, &field) {
                    let width = self.width(&field)?;
                    builder.declare(pre_var(self.ns, k, &field), SmtSort::BitVec(width));
                }
            }
            let lookup = |field: &HeaderField| -> Result<(SmtTerm, u32), SmtError> {
                self.guard_value(k, rule, field)
            };
            conjuncts.push(translate(&rule.guard, &lookup)?);
        }

        for transform in &rule.transforms {
            let width = self.width(&transform.field)?;
            conjuncts.push(range_term(
                &self.copy(head, &transform.field),
                width,
                &transform.ranges,
            ));
        }

        for atom in &rule.preconditions {
            self.body_atom(atom, head, ranked, &mut conjuncts);
            for field in self.deps.tracked_fields(atom).cloned().collect::<Vec<_>>() {
                let (value, _) = self.pre_value(builder, k, rule, &field)?;
                conjuncts.push(self.copy(atom, &field).eq(value));
            }
        }
        for atom in &rule.post_transform_preconditions {
            self.body_atom(atom, head, ranked, &mut conjuncts);
            for field in self.deps.tracked_fields(atom).cloned().collect::<Vec<_>>() {
                let value = self.post_value(builder, k, rule, &field)?;
                conjuncts.push(self.copy(atom, &field).eq(value));
            }
        }

        Ok(match conjuncts.len() {
            0 => SmtTerm::bool(true),
            1 => conjuncts.remove(0),
            _ => SmtTerm::and(conjuncts),
        })
    }

    fn needs_pre_var(&self, rule: &Rule, field: &HeaderField) -> bool {
        self.transformed.contains(field)
            && (rule.transforms_field(field) || !self.deps.tracks(&rule.postcondition, field))
    }

    /// Guard lookups never declare; `support` declares the `pre!` variables
    /// the guard reads once translation succeeds.
    fn guard_value(
        &self,
        k: usize,
        rule: &Rule,
        field: &HeaderField,
    ) -> Result<(SmtTerm, u32), SmtError> {
        let width = self.width(field)?;
        if !self.transformed.contains(field) {
            Ok((SmtTerm::var(global_var(field)), width))
        } else if self.needs_pre_var(rule, field) {
            Ok((SmtTerm::var(pre_var(self.ns, k, field)), width))
        } else {
            Ok((self.copy(&rule.postcondition, field), width))
        }
    }
}

fn encode_program(
    builder: &mut Builder,
    layout: &FieldLayout,
    program: &Program,
    polarity: Polarity,
    index: usize,
    ns: &str,
) -> Result<Vec<QueryGoal>, SmtError> {
    let transformed = program.transformed_fields();
    if let Some(field) = program
        .header_constraint
        .fields()
        .into_iter()
        .find(|f| transformed.contains(f))
    {
        return Err(SmtError::FieldTransformedInHeaderConstraint(field.name()));
    }
    if polarity == Polarity::Negated {
        if let Some(field) = transformed.iter().next() {
            return Err(SmtError::UnsupportedNegation {
                program: format!("p{index}"),
                field: field.name(),
            });
        }
    }

    let ctx = ProgramContext {
        program,
        layout,
        deps: deps::analyze(program),
        transformed,
        ns,
    };

    for relation in &ctx.deps.cone {
        builder.declare(rel_var(ns, &relation.relation_name()), SmtSort::Bool);
        if ctx.deps.recursive.contains_key(relation) {
            builder.declare(rank_var(ns, &relation.relation_name()), SmtSort::Int);
        }
        for field in ctx.deps.tracked_fields(relation) {
            let width = ctx.width(field)?;
            builder.declare(
                copy_var(ns, &relation.relation_name(), field),
                SmtSort::BitVec(width),
            );
            builder.stats.copies += 1;
        }
    }
    builder.stats.relations += ctx.deps.cone.len();
    builder.stats.recursive_relations += ctx.deps.recursive.len();
    builder.stats.rules += ctx.deps.rules.len();

    let mut supports: IndexMap<&StateExpr, Vec<SmtTerm>> =
        ctx.deps.cone.iter().map(|r| (r, Vec::new())).collect();
    for &k in &ctx.deps.rules {
        let support = ctx.support(builder, k, true)?;
        let head = &program.rules[k].postcondition;
        if polarity == Polarity::Negated {
            let body = ctx.support(builder, k, false)?;
            builder.assertions.push(body.implies(ctx.rel(head)));
        }
        if let Some(list) = supports.get_mut(head) {
            list.push(support);
        }
    }
    for (relation, list) in supports {
        let derivable = if list.len() == 1 {
            list.into_iter().next().unwrap_or(SmtTerm::bool(false))
        } else {
            SmtTerm::or(list)
        };
        builder
            .assertions
            .push(ctx.rel(relation).implies(derivable));
    }

    if !program.header_constraint.is_true() {
        let globals = |field: &HeaderField| -> Result<(SmtTerm, u32), SmtError> {
            Ok((SmtTerm::var(global_var(field)), layout.require_width(field)?))
        };
        builder
            .assertions
            .push(translate(&program.header_constraint, &globals)?);
    }

    let mut goals = Vec::with_capacity(program.queries.len());
    for query in &program.queries {
        let rel = ctx.rel(query);
        let term = match polarity {
            Polarity::Positive => rel,
            Polarity::Negated => rel.not(),
        };
        let witness = layout
            .fields()
            .map(|(field, width)| {
                let var = if ctx.transformed.contains(field) && ctx.deps.tracks(query, field) {
                    copy_var(ns, &query.relation_name(), field)
                } else {
                    global_var(field)
                };
                WitnessVar {
                    field: field.clone(),
                    var,
                    width,
                }
            })
            .collect();
        goals.push(QueryGoal {
            program: index,
            relation: query.clone(),
            polarity,
            term,
            witness,
        });
    }
    Ok(goals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nod_ir::expr::BoolExpr;
    use nod_ir::program::Transform;

    fn post_in(n: &str) -> StateExpr {
        StateExpr::PostIn(n.into())
    }

    fn declared(encoding: &HornEncoding, name: &str) -> Option<SmtSort> {
        encoding
            .declarations
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.clone())
    }

    #[test]
    fn globals_cover_the_layout_and_copies_only_transformed_fields() -> Result<(), SmtError> {
        let program = Program::default()
            .with_rules([
                Rule::axiom(post_in("a"), BoolExpr::field_eq(HeaderField::DstPort, 22)),
                Rule::new(StateExpr::Query)
                    .when(post_in("a"))
                    .transform(Transform::assign(HeaderField::SrcIp, 1)),
            ])
            .with_queries([StateExpr::Query]);
        let enc = assemble(&[(program, Polarity::Positive)])?;
        assert_eq!(declared(&enc, "DST_PORT_const"), Some(SmtSort::BitVec(16)));
        assert_eq!(declared(&enc, "copy!Query!SRC_IP"), Some(SmtSort::BitVec(32)));
        assert_eq!(declared(&enc, "copy!PostIn:a!SRC_IP"), None);
        assert_eq!(declared(&enc, "rank!PostIn:a"), None);
        let goal = enc.goal(0, &StateExpr::Query)?;
        let src = goal
            .witness
            .iter()
            .find(|w| w.field == HeaderField::SrcIp)
            .map(|w| w.var.as_str());
        assert_eq!(src, Some("copy!Query!SRC_IP"));
        Ok(())
    }

    #[test]
    fn negated_programs_reject_transforms() {
        let program = Program::default()
            .with_rules([Rule::axiom(StateExpr::Query, BoolExpr::True)
                .transform(Transform::assign(HeaderField::SrcIp, 1))])
            .with_queries([StateExpr::Query]);
        let err = assemble(&[(program, Polarity::Negated)]);
        assert!(matches!(err, Err(SmtError::UnsupportedNegation { .. })));
    }

    #[test]
    fn header_constraint_may_not_mention_transformed_fields() {
        let program = Program::default()
            .with_rules([Rule::axiom(StateExpr::Query, BoolExpr::True)
                .transform(Transform::assign(HeaderField::SrcIp, 1))])
            .with_queries([StateExpr::Query])
            .with_header_constraint(BoolExpr::field_eq(HeaderField::SrcIp, 5));
        let err = assemble(&[(program, Polarity::Positive)]);
        assert!(matches!(
            err,
            Err(SmtError::FieldTransformedInHeaderConstraint(_))
        ));
    }

    #[test]
    fn negated_completions_ignore_ranks() -> Result<(), SmtError> {
        let program = Program::default()
            .with_rules([
                Rule::axiom(post_in("a"), BoolExpr::True),
                Rule::new(post_in("b")).when(post_in("a")),
                Rule::new(post_in("c")).when(post_in("b")),
                Rule::new(post_in("b")).when(post_in("c")),
                Rule::new(StateExpr::Query).when(post_in("c")),
            ])
            .with_queries([StateExpr::Query]);
        let enc = assemble(&[(program, Polarity::Negated)])?;
        assert_eq!(declared(&enc, "rank!PostIn:b"), Some(SmtSort::Int));
        let completion = SmtTerm::var("rel!PostIn:b").implies(SmtTerm::var("rel!PostIn:c"));
        assert!(enc.assertions.contains(&completion));
        let ranked_completion = SmtTerm::and(vec![
            SmtTerm::var("rel!PostIn:b"),
            SmtTerm::var("rank!PostIn:b").lt(SmtTerm::var("rank!PostIn:c")),
        ])
        .implies(SmtTerm::var("rel!PostIn:c"));
        assert!(!enc.assertions.contains(&ranked_completion));
        Ok(())
    }

    #[test]
    fn composites_namespace_relations() -> Result<(), SmtError> {
        let program = Program::default()
            .with_rules([Rule::axiom(StateExpr::Query, BoolExpr::True)])
            .with_queries([StateExpr::Query]);
        let enc = assemble(&[
            (program.clone(), Polarity::Positive),
            (program, Polarity::Negated),
        ])?;
        assert_eq!(declared(&enc, "rel!p0/Query"), Some(SmtSort::Bool));
        assert_eq!(declared(&enc, "rel!p1/Query"), Some(SmtSort::Bool));
        assert_eq!(enc.goals.len(), 2);
        assert_eq!(enc.goals[1].term, SmtTerm::var("rel!p1/Query").not());
        assert!(matches!(
            enc.goal(2, &StateExpr::Query),
            Err(SmtError::UnknownRelation(_))
        ));
        Ok(())
    }
}
