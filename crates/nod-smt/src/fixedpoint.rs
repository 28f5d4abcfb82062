//! Solving a [`HornEncoding`] query by query.
//!
//! The background (declarations and rule assertions) is loaded once per
//! solver; each goal set is checked inside its own `push`/`pop` scope so
//! later checks see none of the earlier goals.

use std::collections::BTreeMap;

use nod_ir::field::HeaderField;
use nod_ir::program::Polarity;
use tracing::{debug, info, warn};

use crate::encoder::{HornEncoding, QueryGoal};
use crate::solver::{Model, SatResult, SmtSolver};
use crate::sorts::SmtSort;

/// Result of one goal-set check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixedpointOutcome {
    /// Some derivation exists; `witness` is its header at the query.
    Sat { witness: BTreeMap<HeaderField, u64> },
    Unsat,
    Unknown { reason: String },
}

impl FixedpointOutcome {
    pub fn is_sat(&self) -> bool {
        matches!(self, FixedpointOutcome::Sat { .. })
    }

    pub fn is_unsat(&self) -> bool {
        matches!(self, FixedpointOutcome::Unsat)
    }
}

/// Reset the solver and load the encoding's declarations and assertions.
pub fn load<S: SmtSolver>(solver: &mut S, encoding: &HornEncoding) -> Result<(), S::Error> {
    solver.reset()?;
    for (name, sort) in &encoding.declarations {
        solver.declare_var(name, sort)?;
    }
    for assertion in &encoding.assertions {
        solver.assert(assertion)?;
    }
    debug!(
        declarations = encoding.declarations.len(),
        assertions = encoding.assertions.len(),
        "NoD: loaded encoding"
    );
    Ok(())
}

/// Check the conjunction of the goals at `indices` against a loaded
/// encoding. The witness is read at the first positive goal.
pub fn check_goals<S: SmtSolver>(
    solver: &mut S,
    encoding: &HornEncoding,
    indices: &[usize],
) -> Result<FixedpointOutcome, S::Error> {
    let goals: Vec<&QueryGoal> = indices
        .iter()
        .filter_map(|&i| encoding.goals.get(i))
        .collect();
    let witness_goal = goals
        .iter()
        .find(|g| g.polarity == Polarity::Positive)
        .or_else(|| goals.first())
        .copied();

    let sorts: Vec<(String, SmtSort)> = witness_goal
        .map(|g| {
            g.witness
                .iter()
                .map(|w| (w.var.clone(), SmtSort::BitVec(w.width)))
                .collect()
        })
        .unwrap_or_default();
    let var_refs: Vec<(&str, &SmtSort)> = sorts.iter().map(|(n, s)| (n.as_str(), s)).collect();

    solver.push()?;
    for goal in &goals {
        solver.assert(&goal.term)?;
    }
    let (result, model) = solver.check_sat_with_model(&var_refs)?;
    solver.pop()?;

    let query = witness_goal
        .map(|g| g.relation.relation_name())
        .unwrap_or_default();
    match result {
        SatResult::Sat => {
            info!(%query, goals = goals.len(), "NoD: SAT - derivation found");
            let Some(model) = model else {
                warn!(%query, "NoD: solver returned SAT without a model");
                return Ok(FixedpointOutcome::Unknown {
                    reason: "Solver returned SAT without a model".into(),
                });
            };
            Ok(FixedpointOutcome::Sat {
                witness: decode_witness(witness_goal, &model),
            })
        }
        SatResult::Unsat => {
            info!(%query, goals = goals.len(), "NoD: UNSAT");
            Ok(FixedpointOutcome::Unsat)
        }
        SatResult::Unknown(reason) => {
            info!(%query, %reason, "NoD: unknown result");
            Ok(FixedpointOutcome::Unknown { reason })
        }
    }
}

/// Check every goal of the encoding together.
pub fn check_all<S: SmtSolver>(
    solver: &mut S,
    encoding: &HornEncoding,
) -> Result<FixedpointOutcome, S::Error> {
    let indices: Vec<usize> = (0..encoding.goals.len()).collect();
    check_goals(solver, encoding, &indices)
}

/// Load the encoding and check each goal on its own, in order.
pub fn check_each<S: SmtSolver>(
    solver: &mut S,
    encoding: &HornEncoding,
) -> Result<Vec<FixedpointOutcome>, S::Error> {
    load(solver, encoding)?;
    (0..encoding.goals.len())
        .map(|i| check_goals(solver, encoding, &[i]))
        .collect()
}

fn decode_witness(goal: Option<&QueryGoal>, model: &Model) -> BTreeMap<HeaderField, u64> {
    let Some(goal) = goal else {
        return BTreeMap::new();
    };
    goal.witness
        .iter()
        .map(|w| (w.field.clone(), model.get_bv(&w.var).unwrap_or(0)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::assemble;
    use crate::solver::ModelValue;
    use crate::terms::SmtTerm;
    use nod_ir::expr::BoolExpr;
    use nod_ir::program::{Program, Rule};
    use nod_ir::state::StateExpr;
    use std::collections::HashMap;
    use std::io;

    /// Records scopes and answers from a script.
    #[derive(Default)]
    struct ScriptedSolver {
        depth: usize,
        max_depth: usize,
        asserted: Vec<SmtTerm>,
        answers: Vec<SatResult>,
    }

    impl SmtSolver for ScriptedSolver {
        type Error = io::Error;

        fn declare_var(&mut self, _name: &str, _sort: &SmtSort) -> Result<(), io::Error> {
            Ok(())
        }

        fn assert(&mut self, term: &SmtTerm) -> Result<(), io::Error> {
            self.asserted.push(term.clone());
            Ok(())
        }

        fn push(&mut self) -> Result<(), io::Error> {
            self.depth += 1;
            self.max_depth = self.max_depth.max(self.depth);
            Ok(())
        }

        fn pop(&mut self) -> Result<(), io::Error> {
            self.depth = self
                .depth
                .checked_sub(1)
                .ok_or_else(|| io::Error::other("pop without push"))?;
            Ok(())
        }

        fn check_sat(&mut self) -> Result<SatResult, io::Error> {
            Ok(self.answers.pop().unwrap_or(SatResult::Unsat))
        }

        fn check_sat_with_model(
            &mut self,
            vars: &[(&str, &SmtSort)],
        ) -> Result<(SatResult, Option<Model>), io::Error> {
            let result = self.check_sat()?;
            let model = (result == SatResult::Sat).then(|| Model {
                values: vars
                    .iter()
                    .map(|(n, _)| (n.to_string(), ModelValue::BitVec(7)))
                    .collect::<HashMap<_, _>>(),
            });
            Ok((result, model))
        }

        fn reset(&mut self) -> Result<(), io::Error> {
            self.asserted.clear();
            Ok(())
        }
    }

    fn two_queries() -> Program {
        Program::default()
            .with_rules([
                Rule::axiom(StateExpr::NumberedQuery(0), BoolExpr::True),
                Rule::axiom(StateExpr::NumberedQuery(1), BoolExpr::False),
            ])
            .with_queries([StateExpr::NumberedQuery(0), StateExpr::NumberedQuery(1)])
    }

    #[test]
    fn each_goal_is_checked_in_its_own_scope() -> Result<(), Box<dyn std::error::Error>> {
        let encoding = assemble(&[(two_queries(), Polarity::Positive)])?;
        let mut solver = ScriptedSolver {
            answers: vec![SatResult::Unknown("timeout".into()), SatResult::Sat],
            ..Default::default()
        };
        let outcomes = check_each(&mut solver, &encoding)?;
        assert_eq!(solver.depth, 0);
        assert_eq!(solver.max_depth, 1);
        assert!(solver
            .asserted
            .contains(&SmtTerm::var("rel!NumberedQuery:1")));
        assert!(outcomes[0].is_sat());
        assert_eq!(
            outcomes[1],
            FixedpointOutcome::Unknown {
                reason: "timeout".into()
            }
        );
        if let FixedpointOutcome::Sat { witness } = &outcomes[0] {
            assert_eq!(witness.get(&HeaderField::DstPort), Some(&7));
            assert_eq!(witness.len(), encoding.layout.len());
        }
        Ok(())
    }
}
