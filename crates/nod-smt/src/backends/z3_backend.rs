use std::collections::HashMap;

use thiserror::Error;
use z3::SatResult as Z3SatResult;

use crate::solver::{Model, ModelValue, SatResult, SmtSolver};
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

#[derive(Debug, Error)]
pub enum Z3Error {
    #[error("Z3 error: {0}")]
    Internal(String),
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
    #[error("Sort mismatch in {0}")]
    SortMismatch(String),
}

/// In-process Z3 solver. One instance must stay on the thread that built it.
pub struct Z3Solver {
    solver: z3::Solver,
    int_vars: HashMap<String, z3::ast::Int>,
    bool_vars: HashMap<String, z3::ast::Bool>,
    bv_vars: HashMap<String, z3::ast::BV>,
    params: Option<z3::Params>,
}

impl Z3Solver {
    pub fn new() -> Self {
        Self {
            solver: z3::Solver::new(),
            int_vars: HashMap::new(),
            bool_vars: HashMap::new(),
            bv_vars: HashMap::new(),
            params: None,
        }
    }

    /// A solver whose checks give up after `timeout_ms`. Zero means no limit.
    pub fn with_timeout_ms(timeout_ms: u64) -> Self {
        if timeout_ms == 0 {
            return Self::new();
        }
        let mut solver = Self::new();
        let mut params = z3::Params::new();
        let timeout = u32::try_from(timeout_ms).unwrap_or(u32::MAX);
        params.set_u32("timeout", timeout);
        solver.solver.set_params(&params);
        solver.params = Some(params);
        solver
    }

    pub fn has_timeout(&self) -> bool {
        self.params.is_some()
    }

    fn translate_term(&self, term: &SmtTerm) -> Result<Z3Term, Z3Error> {
        match term {
            SmtTerm::Var(name) => {
                if let Some(v) = self.bv_vars.get(name) {
                    Ok(Z3Term::Bv(v.clone()))
                } else if let Some(v) = self.bool_vars.get(name) {
                    Ok(Z3Term::Bool(v.clone()))
                } else if let Some(v) = self.int_vars.get(name) {
                    Ok(Z3Term::Int(v.clone()))
                } else {
                    Err(Z3Error::UnknownVariable(name.clone()))
                }
            }
            SmtTerm::IntLit(n) => Ok(Z3Term::Int(z3::ast::Int::from_i64(*n))),
            SmtTerm::BoolLit(b) => Ok(Z3Term::Bool(z3::ast::Bool::from_bool(*b))),
            SmtTerm::BvLit { value, width } => {
                Ok(Z3Term::Bv(z3::ast::BV::from_u64(*value, *width)))
            }
            SmtTerm::Extract { high, low, term } => {
                let bv = self.translate_term(term)?.into_bv()?;
                if low > high || *high >= bv.get_size() {
                    return Err(Z3Error::SortMismatch(format!(
                        "extract {high}..{low} of a {}-bit term",
                        bv.get_size()
                    )));
                }
                Ok(Z3Term::Bv(bv.extract(*high, *low)))
            }
            SmtTerm::Eq(lhs, rhs) => {
                let l = self.translate_term(lhs)?;
                let r = self.translate_term(rhs)?;
                match (l, r) {
                    (Z3Term::Int(li), Z3Term::Int(ri)) => Ok(Z3Term::Bool(li.eq(&ri))),
                    (Z3Term::Bool(lb), Z3Term::Bool(rb)) => Ok(Z3Term::Bool(lb.eq(&rb))),
                    (Z3Term::Bv(lv), Z3Term::Bv(rv)) if lv.get_size() == rv.get_size() => {
                        Ok(Z3Term::Bool(lv.eq(&rv)))
                    }
                    _ => Err(Z3Error::SortMismatch("Eq".into())),
                }
            }
            SmtTerm::Lt(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_int()?;
                let r = self.translate_term(rhs)?.into_int()?;
                Ok(Z3Term::Bool(l.lt(&r)))
            }
            SmtTerm::Le(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_int()?;
                let r = self.translate_term(rhs)?.into_int()?;
                Ok(Z3Term::Bool(l.le(&r)))
            }
            SmtTerm::Gt(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_int()?;
                let r = self.translate_term(rhs)?.into_int()?;
                Ok(Z3Term::Bool(l.gt(&r)))
            }
            SmtTerm::Ge(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_int()?;
                let r = self.translate_term(rhs)?.into_int()?;
                Ok(Z3Term::Bool(l.ge(&r)))
            }
            SmtTerm::BvUle(lhs, rhs) => {
                let (l, r) = self.translate_bv_pair(lhs, rhs, "bvule")?;
                Ok(Z3Term::Bool(l.bvule(&r)))
            }
            SmtTerm::BvUge(lhs, rhs) => {
                let (l, r) = self.translate_bv_pair(lhs, rhs, "bvuge")?;
                Ok(Z3Term::Bool(l.bvuge(&r)))
            }
            SmtTerm::And(terms) => {
                let bools = self.translate_bools(terms)?;
                let refs: Vec<&z3::ast::Bool> = bools.iter().collect();
                Ok(Z3Term::Bool(z3::ast::Bool::and(&refs)))
            }
            SmtTerm::Or(terms) => {
                let bools = self.translate_bools(terms)?;
                let refs: Vec<&z3::ast::Bool> = bools.iter().collect();
                Ok(Z3Term::Bool(z3::ast::Bool::or(&refs)))
            }
            SmtTerm::Not(inner) => {
                let b = self.translate_term(inner)?.into_bool()?;
                Ok(Z3Term::Bool(b.not()))
            }
            SmtTerm::Implies(lhs, rhs) => {
                let l = self.translate_term(lhs)?.into_bool()?;
                let r = self.translate_term(rhs)?.into_bool()?;
                Ok(Z3Term::Bool(l.implies(&r)))
            }
            SmtTerm::Ite(cond, then, els) => {
                let c = self.translate_term(cond)?.into_bool()?;
                let t = self.translate_term(then)?;
                let e = self.translate_term(els)?;
                match (t, e) {
                    (Z3Term::Int(ti), Z3Term::Int(ei)) => Ok(Z3Term::Int(c.ite(&ti, &ei))),
                    (Z3Term::Bool(tb), Z3Term::Bool(eb)) => Ok(Z3Term::Bool(c.ite(&tb, &eb))),
                    (Z3Term::Bv(tv), Z3Term::Bv(ev)) if tv.get_size() == ev.get_size() => {
                        Ok(Z3Term::Bv(c.ite(&tv, &ev)))
                    }
                    _ => Err(Z3Error::SortMismatch("ITE".into())),
                }
            }
        }
    }

    fn translate_bools(&self, terms: &[SmtTerm]) -> Result<Vec<z3::ast::Bool>, Z3Error> {
        terms
            .iter()
            .map(|t| self.translate_term(t).and_then(Z3Term::into_bool))
            .collect()
    }

    fn translate_bv_pair(
        &self,
        lhs: &SmtTerm,
        rhs: &SmtTerm,
        op: &str,
    ) -> Result<(z3::ast::BV, z3::ast::BV), Z3Error> {
        let l = self.translate_term(lhs)?.into_bv()?;
        let r = self.translate_term(rhs)?.into_bv()?;
        if l.get_size() != r.get_size() {
            return Err(Z3Error::SortMismatch(format!(
                "{op} of {}-bit and {}-bit terms",
                l.get_size(),
                r.get_size()
            )));
        }
        Ok((l, r))
    }
}

enum Z3Term {
    Int(z3::ast::Int),
    Bool(z3::ast::Bool),
    Bv(z3::ast::BV),
}

impl Z3Term {
    fn into_int(self) -> Result<z3::ast::Int, Z3Error> {
        match self {
            Z3Term::Int(i) => Ok(i),
            _ => Err(Z3Error::SortMismatch("expected Int".into())),
        }
    }

    fn into_bool(self) -> Result<z3::ast::Bool, Z3Error> {
        match self {
            Z3Term::Bool(b) => Ok(b),
            _ => Err(Z3Error::SortMismatch("expected Bool".into())),
        }
    }

    fn into_bv(self) -> Result<z3::ast::BV, Z3Error> {
        match self {
            Z3Term::Bv(v) => Ok(v),
            _ => Err(Z3Error::SortMismatch("expected BitVec".into())),
        }
    }
}

impl Default for Z3Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtSolver for Z3Solver {
    type Error = Z3Error;

    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), Z3Error> {
        self.int_vars.remove(name);
        self.bool_vars.remove(name);
        self.bv_vars.remove(name);
        match sort {
            SmtSort::Int => {
                let v = z3::ast::Int::new_const(name);
                self.int_vars.insert(name.to_string(), v);
            }
            SmtSort::Bool => {
                let v = z3::ast::Bool::new_const(name);
                self.bool_vars.insert(name.to_string(), v);
            }
            SmtSort::BitVec(width) => {
                let v = z3::ast::BV::new_const(name, *width);
                self.bv_vars.insert(name.to_string(), v);
            }
        }
        Ok(())
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), Z3Error> {
        let z3_term = self.translate_term(term)?.into_bool()?;
        self.solver.assert(&z3_term);
        Ok(())
    }

    fn push(&mut self) -> Result<(), Z3Error> {
        self.solver.push();
        Ok(())
    }

    fn pop(&mut self) -> Result<(), Z3Error> {
        self.solver.pop(1);
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, Z3Error> {
        Ok(convert(self.solver.check(), &self.solver))
    }

    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Z3Error> {
        match self.solver.check() {
            Z3SatResult::Sat => {
                let z3_model = self
                    .solver
                    .get_model()
                    .ok_or_else(|| Z3Error::Internal("SAT but no model available".into()))?;
                let mut values = HashMap::new();

                for &(name, sort) in var_names {
                    let value = match sort {
                        SmtSort::Int => self
                            .int_vars
                            .get(name)
                            .and_then(|v| z3_model.eval::<z3::ast::Int>(v, true))
                            .and_then(|val| val.as_i64())
                            .map(ModelValue::Int),
                        SmtSort::Bool => self
                            .bool_vars
                            .get(name)
                            .and_then(|v| z3_model.eval::<z3::ast::Bool>(v, true))
                            .and_then(|val| val.as_bool())
                            .map(ModelValue::Bool),
                        SmtSort::BitVec(_) => self
                            .bv_vars
                            .get(name)
                            .and_then(|v| z3_model.eval::<z3::ast::BV>(v, true))
                            .and_then(|val| val.as_u64())
                            .map(ModelValue::BitVec),
                    };
                    if let Some(value) = value {
                        values.insert(name.to_string(), value);
                    }
                }

                Ok((SatResult::Sat, Some(Model { values })))
            }
            other => Ok((convert(other, &self.solver), None)),
        }
    }

    fn reset(&mut self) -> Result<(), Z3Error> {
        self.solver.reset();
        // Z3 may drop per-solver parameters on reset; reapply timeout if configured.
        if let Some(params) = &self.params {
            self.solver.set_params(params);
        }
        self.int_vars.clear();
        self.bool_vars.clear();
        self.bv_vars.clear();
        Ok(())
    }
}

fn convert(result: Z3SatResult, solver: &z3::Solver) -> SatResult {
    match result {
        Z3SatResult::Sat => SatResult::Sat,
        Z3SatResult::Unsat => SatResult::Unsat,
        Z3SatResult::Unknown => SatResult::Unknown(
            solver
                .get_reason_unknown()
                .unwrap_or_else(|| "Z3 returned unknown".into()),
        ),
    }
}
