use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nod_ir::expr::BoolExpr;
use nod_ir::field::HeaderField;
use nod_ir::program::{Polarity, Program, Rule, Transform};
use nod_ir::state::StateExpr;
use nod_smt::datalog::render_datalog;
use nod_smt::encoder::assemble;

/// A ring of `n` nodes forwarding to each other, with a NAT on every hop.
fn ring(n: usize) -> Program {
    let node = |i: usize| StateExpr::PostIn(format!("r{}", i % n));
    let mut rules = vec![Rule::axiom(
        node(0),
        BoolExpr::fields_eq(HeaderField::SrcIp, HeaderField::OrigSrcIp),
    )];
    for i in 0..n {
        rules.push(
            Rule::new(node(i + 1))
                .when(node(i))
                .guard(BoolExpr::field_range(HeaderField::DstPort, i as u64, 1024))
                .transform(Transform::assign(HeaderField::SrcIp, i as u64)),
        );
    }
    rules.push(Rule::new(StateExpr::Query).when(node(n / 2)));
    Program::default()
        .with_rules(rules)
        .with_queries([StateExpr::Query])
}

fn bench_assemble_ring_50(c: &mut Criterion) {
    let program = ring(50);
    c.bench_function("assemble_ring_50", |b| {
        b.iter(|| assemble(black_box(&[(program.clone(), Polarity::Positive)])))
    });
}

fn bench_assemble_ring_500(c: &mut Criterion) {
    let program = ring(500);
    c.bench_function("assemble_ring_500", |b| {
        b.iter(|| assemble(black_box(&[(program.clone(), Polarity::Positive)])))
    });
}

fn bench_render_ring_500(c: &mut Criterion) {
    let program = ring(500);
    c.bench_function("render_datalog_ring_500", |b| {
        b.iter(|| render_datalog(black_box(&program)))
    });
}

criterion_group!(
    benches,
    bench_assemble_ring_50,
    bench_assemble_ring_500,
    bench_render_ring_500
);
criterion_main!(benches);
