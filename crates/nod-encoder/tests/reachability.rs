//! Encoded queries over a two-router network, solved with z3.

mod common;

use std::collections::{BTreeMap, BTreeSet};

use common::{ip, line_network, TestResult};
use nod_encoder::query::{IngressLocation, StandardReachability};
use nod_encoder::snapshot::InterfaceRef;
use nod_encoder::{encode_query, Disabled, EncodedQuery, QuerySynthesizer, SynthesizerInput};
use nod_ir::field::HeaderField;
use nod_ir::header_space::{HeaderSpace, IpProtocol, IpSpace, SubRange};
use nod_ir::state::Disposition;
use nod_smt::backends::z3_backend::Z3Solver;
use nod_smt::encoder::assemble;
use nod_smt::fixedpoint::{self, FixedpointOutcome};

fn solve(encoded: &EncodedQuery) -> Result<FixedpointOutcome, Box<dyn std::error::Error>> {
    let encoding = assemble(&[(encoded.program.clone(), encoded.polarity)])?;
    let mut solver = Z3Solver::new();
    fixedpoint::load(&mut solver, &encoding)?;
    Ok(fixedpoint::check_all(&mut solver, &encoding)?)
}

fn run(
    input: &SynthesizerInput,
    query: &dyn QuerySynthesizer,
) -> Result<(EncodedQuery, FixedpointOutcome), Box<dyn std::error::Error>> {
    let encoded = encode_query(input, query)?;
    let outcome = solve(&encoded)?;
    Ok((encoded, outcome))
}

fn witness(outcome: &FixedpointOutcome) -> Option<&BTreeMap<HeaderField, u64>> {
    match outcome {
        FixedpointOutcome::Sat { witness } => Some(witness),
        _ => None,
    }
}

fn from_lan(actions: &[Disposition], header_space: HeaderSpace) -> StandardReachability {
    StandardReachability {
        actions: actions.iter().copied().collect(),
        header_space,
        ingress: vec![IngressLocation::interface_link("r1", "eth1")],
        ..Default::default()
    }
}

fn to(dst: &str) -> Result<HeaderSpace, Box<dyn std::error::Error>> {
    Ok(HeaderSpace::new().with_dst_ips(IpSpace::Ip(ip(dst)?)))
}

#[test]
fn lan_traffic_leaves_through_the_uplink() -> TestResult {
    let snapshot = line_network()?;
    let input = SynthesizerInput::builder(&snapshot).build()?;
    let query = from_lan(&[Disposition::NeighborUnreachableOrExitsNetwork], to("8.8.8.8")?);
    let (encoded, outcome) = run(&input, &query)?;
    let w = witness(&outcome).ok_or("expected a flow")?;
    assert_eq!(w.get(&HeaderField::DstIp), Some(&ip("8.8.8.8")?.as_u64()));
    let location = encoded
        .ingress
        .as_ref()
        .and_then(|i| i.location_of(w.get(&HeaderField::IngressLocation).copied().unwrap_or(0)));
    assert_eq!(location, Some(&IngressLocation::interface_link("r1", "eth1")));
    Ok(())
}

#[test]
fn ssh_is_denied_on_the_way_out() -> TestResult {
    let snapshot = line_network()?;
    let input = SynthesizerInput::builder(&snapshot).build()?;
    let ssh = to("8.8.8.8")?
        .with_ip_protocols(vec![IpProtocol::TCP])
        .with_dst_ports(vec![SubRange::single(22)]);

    let (_, denied) = run(&input, &from_lan(&[Disposition::DeniedOut], ssh.clone()))?;
    let w = witness(&denied).ok_or("expected a denied flow")?;
    assert_eq!(w.get(&HeaderField::DstPort), Some(&22));
    assert_eq!(w.get(&HeaderField::IpProtocol), Some(&6));

    let exits = from_lan(&[Disposition::NeighborUnreachableOrExitsNetwork], ssh);
    assert!(run(&input, &exits)?.1.is_unsat());
    Ok(())
}

#[test]
fn the_neighbor_router_accepts_its_own_address() -> TestResult {
    let snapshot = line_network()?;
    let input = SynthesizerInput::builder(&snapshot).build()?;
    let mut query = from_lan(&[Disposition::Accepted], to("10.0.0.2")?);
    query.final_nodes = BTreeSet::from(["r2".to_string()]);
    assert!(run(&input, &query)?.1.is_sat());

    // with the link down the address is gone and so is the path
    let reduced = input.with_disabled(&Disabled {
        interfaces: BTreeSet::from([InterfaceRef::new("r2", "eth0")]),
        ..Default::default()
    })?;
    query.final_nodes.clear();
    assert!(run(&reduced, &query)?.1.is_unsat());
    Ok(())
}

#[test]
fn transit_constraints_filter_paths() -> TestResult {
    let snapshot = line_network()?;
    let input = SynthesizerInput::builder(&snapshot).build()?;
    let base = from_lan(&[Disposition::NeighborUnreachableOrExitsNetwork], to("8.8.8.8")?);

    let through_r2 = StandardReachability {
        transit_nodes: BTreeSet::from(["r2".to_string()]),
        ..base.clone()
    };
    let (encoded, outcome) = run(&input, &through_r2)?;
    assert!(outcome.is_sat());
    assert_eq!(
        encoded.program.layout.width(&HeaderField::Transit("r2".into())),
        Some(1)
    );

    let avoiding_r2 = StandardReachability {
        non_transit_nodes: BTreeSet::from(["r2".to_string()]),
        ..base
    };
    assert!(run(&input, &avoiding_r2)?.1.is_unsat());
    Ok(())
}

#[test]
fn witnesses_name_one_of_the_allowed_ingress_locations() -> TestResult {
    let snapshot = line_network()?;
    let input = SynthesizerInput::builder(&snapshot).build()?;
    let locations = vec![
        IngressLocation::vrf("r1", "default"),
        IngressLocation::interface_link("r1", "eth1"),
        IngressLocation::vrf("r2", "default"),
    ];
    let query = StandardReachability {
        ingress: locations.clone(),
        ..from_lan(&[Disposition::NeighborUnreachableOrExitsNetwork], to("8.8.8.8")?)
    };
    let (encoded, outcome) = run(&input, &query)?;
    let w = witness(&outcome).ok_or("expected a flow")?;
    let index = w.get(&HeaderField::IngressLocation).copied().ok_or("no location")?;
    let ingress = encoded.ingress.as_ref().ok_or("not instrumented")?;
    let location = ingress.location_of(index).ok_or("index out of range")?;
    assert!(locations.contains(location));
    Ok(())
}

#[test]
fn unknown_final_nodes_are_rejected() -> TestResult {
    let snapshot = line_network()?;
    let input = SynthesizerInput::builder(&snapshot).build()?;
    let mut query = from_lan(&[Disposition::Accepted], HeaderSpace::new());
    query.final_nodes = BTreeSet::from(["r9".to_string()]);
    assert!(encode_query(&input, &query).is_err());
    Ok(())
}
