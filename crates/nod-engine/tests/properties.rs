//! Randomized checks of decoded flows against the question asked.

mod common;

use std::collections::BTreeMap;

use nod_encoder::IngressLocation;
use nod_engine::{
    reachability, Flow, JobExecutor, ReachabilityParameters, Settings, SpecializerChoice,
};
use nod_ir::acl::Acl;
use nod_ir::expr::{BoolExpr, Packet};
use nod_ir::field::HeaderField;
use nod_ir::header_space::HeaderSpace;
use nod_ir::proptest_generators::arb_header_space;
use nod_ir::state::Disposition;
use proptest::prelude::*;

fn packet_of(flow: &Flow) -> Packet {
    let flags = &flow.tcp_flags;
    Packet::new()
        .with(HeaderField::SrcIp, flow.src_ip.as_u64())
        .with(HeaderField::DstIp, flow.dst_ip.as_u64())
        .with(HeaderField::SrcPort, flow.src_port.into())
        .with(HeaderField::DstPort, flow.dst_port.into())
        .with(HeaderField::IpProtocol, flow.ip_protocol.into())
        .with(HeaderField::IcmpType, flow.icmp_type.into())
        .with(HeaderField::IcmpCode, flow.icmp_code.into())
        .with(HeaderField::Dscp, flow.dscp.into())
        .with(HeaderField::Ecn, flow.ecn.into())
        .with(HeaderField::FragmentOffset, flow.fragment_offset.into())
        .with(HeaderField::PacketLength, flow.packet_length.into())
        .with(HeaderField::State, flow.state.into())
        .with(HeaderField::TcpCwr, flags.cwr.into())
        .with(HeaderField::TcpEce, flags.ece.into())
        .with(HeaderField::TcpUrg, flags.urg.into())
        .with(HeaderField::TcpAck, flags.ack.into())
        .with(HeaderField::TcpPsh, flags.psh.into())
        .with(HeaderField::TcpRst, flags.rst.into())
        .with(HeaderField::TcpSyn, flags.syn.into())
        .with(HeaderField::TcpFin, flags.fin.into())
}

fn params(header_space: HeaderSpace) -> ReachabilityParameters {
    ReachabilityParameters {
        actions: [
            Disposition::Accepted,
            Disposition::NoRoute,
            Disposition::NeighborUnreachableOrExitsNetwork,
        ]
        .into(),
        header_space,
        ingress: vec![IngressLocation::vrf("r1", "default")],
        ..Default::default()
    }
}

fn sequential(specialize: bool, specializer: SpecializerChoice) -> JobExecutor {
    let settings = Settings {
        sequential: true,
        specialize,
        specializer,
        ..Default::default()
    };
    JobExecutor::new(&settings).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn flows_satisfy_the_header_space(hs in arb_header_space()) {
        prop_assume!(hs.validate().is_ok());
        let snapshot = common::pair().unwrap();
        let executor = sequential(false, SpecializerChoice::Bdd);
        let answer = reachability(&executor, &snapshot, &params(hs.clone())).unwrap();
        prop_assert!(answer.is_complete());
        let acls: BTreeMap<String, Acl> = BTreeMap::new();
        for flow in &answer.flows {
            let holds = BoolExpr::header_space(hs.clone()).eval(&packet_of(flow), &acls);
            prop_assert_eq!(holds, Ok(true), "{}", flow);
        }
    }

    #[test]
    fn specialization_does_not_change_answers(hs in arb_header_space()) {
        prop_assume!(hs.validate().is_ok());
        let snapshot = common::pair_without_ssh().unwrap();
        let question = params(hs);
        let executor = sequential(false, SpecializerChoice::Bdd);
        let plain = reachability(&executor, &snapshot, &question).unwrap();
        for choice in [SpecializerChoice::Bdd, SpecializerChoice::Direct] {
            let executor = sequential(true, choice);
            let specialized = reachability(&executor, &snapshot, &question).unwrap();
            prop_assert_eq!(plain.flows.is_empty(), specialized.flows.is_empty());
        }
    }
}
