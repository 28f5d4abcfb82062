//! Backend parity: z3 and cvc5 agree on bit-vector header formulas and on
//! whole Horn encodings.
//!
//! cvc5 tests are `#[ignore]` so they can be skipped where cvc5 is not
//! installed. Run with `cargo test -- --ignored` to include them.

use nod_ir::expr::BoolExpr;
use nod_ir::field::HeaderField;
use nod_ir::program::{Polarity, Program, Rule, Transform};
use nod_ir::state::StateExpr;
use nod_smt::backends::cvc5_backend::Cvc5Solver;
use nod_smt::backends::z3_backend::Z3Solver;
use nod_smt::encoder::assemble;
use nod_smt::fixedpoint::{self, FixedpointOutcome};
use nod_smt::solver::{SatResult, SmtSolver};
use nod_smt::sorts::SmtSort;
use nod_smt::terms::SmtTerm;

fn port_window<S: SmtSolver>(solver: &mut S, lo: u64, hi: u64) -> SatResult
where
    S::Error: std::fmt::Debug,
{
    solver
        .declare_var("DST_PORT_const", &SmtSort::BitVec(16))
        .expect("declare");
    solver
        .assert(&SmtTerm::and(vec![
            SmtTerm::var("DST_PORT_const").bvuge(SmtTerm::bv(lo, 16)),
            SmtTerm::var("DST_PORT_const").bvule(SmtTerm::bv(hi, 16)),
            SmtTerm::var("DST_PORT_const")
                .extract(15, 8)
                .eq(SmtTerm::bv(0, 8)),
        ]))
        .expect("assert");
    solver.check_sat().expect("check")
}

fn nat_program() -> Program {
    Program::default()
        .with_rules([
            Rule::axiom(
                StateExpr::Originate("r1".into()),
                BoolExpr::fields_eq(HeaderField::SrcIp, HeaderField::OrigSrcIp),
            ),
            Rule::new(StateExpr::PostIn("r1".into()))
                .when(StateExpr::Originate("r1".into()))
                .transform(Transform::range(HeaderField::SrcIp, 100, 200)),
            Rule::new(StateExpr::Query)
                .when(StateExpr::PostIn("r1".into()))
                .guard(BoolExpr::field_eq(HeaderField::SrcIp, 150)),
        ])
        .with_queries([StateExpr::Query])
}

#[test]
fn z3_bit_vector_windows() {
    assert_eq!(port_window(&mut Z3Solver::new(), 10, 200), SatResult::Sat);
    assert_eq!(port_window(&mut Z3Solver::new(), 300, 400), SatResult::Unsat);
}

#[test]
fn z3_solves_nat_encoding() {
    let encoding = assemble(&[(nat_program(), Polarity::Positive)]).expect("assemble");
    let outcomes = fixedpoint::check_each(&mut Z3Solver::new(), &encoding).expect("solve");
    match &outcomes[0] {
        FixedpointOutcome::Sat { witness } => {
            assert_eq!(witness.get(&HeaderField::SrcIp), Some(&150));
        }
        other => panic!("expected SAT, got {other:?}"),
    }
}

// ---- cvc5 parity tests (ignored by default) ----

#[test]
#[ignore = "requires cvc5 binary"]
fn cvc5_bit_vector_windows() {
    let mut sat = Cvc5Solver::new().expect("cvc5 should be available");
    assert_eq!(port_window(&mut sat, 10, 200), SatResult::Sat);
    let mut unsat = Cvc5Solver::new().expect("cvc5 should be available");
    assert_eq!(port_window(&mut unsat, 300, 400), SatResult::Unsat);
}

#[test]
#[ignore = "requires cvc5 binary"]
fn cvc5_z3_parity_on_nat_encoding() {
    let encoding = assemble(&[(nat_program(), Polarity::Positive)]).expect("assemble");
    let z3 = fixedpoint::check_each(&mut Z3Solver::new(), &encoding).expect("z3");
    let mut cvc5 = Cvc5Solver::new().expect("cvc5 should be available");
    let other = fixedpoint::check_each(&mut cvc5, &encoding).expect("cvc5");
    let verdicts =
        |o: &[FixedpointOutcome]| o.iter().map(FixedpointOutcome::is_sat).collect::<Vec<_>>();
    assert_eq!(verdicts(&z3), verdicts(&other));
}
