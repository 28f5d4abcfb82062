//! Comparing a network with a copy that has parts disabled.

mod common;

use std::collections::BTreeSet;

use common::{executor, ip, TestResult};
use nod_encoder::snapshot::InterfaceRef;
use nod_encoder::Disabled;
use nod_engine::{path_diff, reduced_reachability, DifferentialKind, TAG_DIFFERENTIAL};
use nod_ir::header_space::{HeaderSpace, IpSpace};
use nod_ir::state::Edge;

fn link_down() -> Disabled {
    let edge = Edge::new("r1", "eth0", "r2", "eth0");
    Disabled {
        edges: BTreeSet::from([edge.reversed(), edge]),
        ..Default::default()
    }
}

fn to_r2_lan() -> Result<HeaderSpace, Box<dyn std::error::Error>> {
    Ok(HeaderSpace::new().with_dst_ips(IpSpace::Prefix("10.2.0.0/24".parse()?)))
}

#[test]
fn losing_the_link_loses_the_far_lan() -> TestResult {
    let snapshot = common::pair()?;
    let answer = reduced_reachability(&executor()?, &snapshot, &link_down(), &to_r2_lan()?)?;
    assert_eq!(answer.kind, DifferentialKind::ReducedReachability);
    assert!(answer.unanswered.is_empty(), "{:?}", answer.unanswered);
    assert_eq!(answer.flows.len(), 1);
    let flow = answer.flows.iter().next().ok_or("no flow")?;
    // r2 still reaches its own LAN, so only r1 loses it
    assert_eq!(flow.ingress_node, "r1");
    assert_eq!(flow.dst_ip, ip("10.2.0.1")?);
    assert_eq!(flow.tag, TAG_DIFFERENTIAL);
    Ok(())
}

#[test]
fn blacklisting_the_transit_interface_loses_what_lies_behind_it() -> TestResult {
    let snapshot = common::pair()?;
    let disabled = Disabled {
        interfaces: BTreeSet::from([InterfaceRef::new("r2", "eth0")]),
        ..Default::default()
    };
    let answer = reduced_reachability(&executor()?, &snapshot, &disabled, &HeaderSpace::new())?;
    assert!(answer.unanswered.is_empty(), "{:?}", answer.unanswered);
    let (lan, blacklisted) = (ip("10.2.0.1")?, ip("10.0.0.2")?);
    assert!(answer.flows.iter().any(|f| f.dst_ip == lan));
    assert!(answer.flows.iter().all(|f| f.dst_ip != blacklisted));
    Ok(())
}

#[test]
fn addresses_of_disabled_interfaces_are_not_reported() -> TestResult {
    let snapshot = common::pair()?;
    let disabled = Disabled {
        interfaces: BTreeSet::from([InterfaceRef::new("r2", "eth1")]),
        ..Default::default()
    };
    let hs = HeaderSpace::new().with_dst_ips(IpSpace::Ip(ip("10.2.0.1")?));
    let answer = reduced_reachability(&executor()?, &snapshot, &disabled, &hs)?;
    assert!(answer.unanswered.is_empty(), "{:?}", answer.unanswered);
    assert!(answer.flows.is_empty());
    Ok(())
}

#[test]
fn nothing_disabled_is_rejected() -> TestResult {
    let snapshot = common::pair()?;
    let result = reduced_reachability(
        &executor()?,
        &snapshot,
        &Disabled::default(),
        &HeaderSpace::new(),
    );
    assert!(result.is_err());
    Ok(())
}

#[test]
fn removed_edges_are_checked_from_the_sending_side() -> TestResult {
    let snapshot = common::pair()?;
    let answer = path_diff(&executor()?, &snapshot, &link_down(), &to_r2_lan()?)?;
    assert_eq!(answer.kind, DifferentialKind::PathDiff);
    assert!(answer.unanswered.is_empty(), "{:?}", answer.unanswered);
    assert!(!answer.flows.is_empty());
    for flow in &answer.flows {
        assert_eq!(flow.ingress_node, "r1");
        assert!(flow.dst_ip >= ip("10.2.0.0")? && flow.dst_ip <= ip("10.2.0.255")?);
    }
    Ok(())
}

fn far_lan_down() -> Disabled {
    Disabled {
        interfaces: BTreeSet::from([InterfaceRef::new("r2", "eth1")]),
        ..Default::default()
    }
}

fn to_transfer_net() -> Result<HeaderSpace, Box<dyn std::error::Error>> {
    Ok(HeaderSpace::new().with_dst_ips(IpSpace::Prefix("10.0.0.0/30".parse()?)))
}

#[test]
fn flows_over_a_surviving_link_are_not_lost() -> TestResult {
    // r1 and r2 route to each other, so both snapshots derive acceptance
    // through a cycle of relations
    let snapshot = common::pair()?;
    let answer = reduced_reachability(
        &executor()?,
        &snapshot,
        &far_lan_down(),
        &to_transfer_net()?,
    )?;
    assert!(answer.unanswered.is_empty(), "{:?}", answer.unanswered);
    assert!(answer.flows.is_empty(), "{:?}", answer.flows);
    Ok(())
}

#[test]
fn paths_over_a_surviving_link_do_not_differ() -> TestResult {
    let snapshot = common::pair()?;
    let answer = path_diff(&executor()?, &snapshot, &far_lan_down(), &to_transfer_net()?)?;
    assert!(answer.unanswered.is_empty(), "{:?}", answer.unanswered);
    assert!(answer.flows.is_empty(), "{:?}", answer.flows);
    Ok(())
}
