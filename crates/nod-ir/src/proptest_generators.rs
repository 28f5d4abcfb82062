//! Proptest strategies for header spaces, expressions, ACLs and packets.
//!
//! Addresses and ports are drawn from small pools so that generated
//! constraints and packets overlap often enough to exercise every branch of
//! the specializers.

use proptest::collection::vec;
use proptest::prelude::*;

use crate::acl::{Acl, AclLine, LineAction};
use crate::expr::{BoolExpr, Packet};
use crate::field::HeaderField;
use crate::header_space::{HeaderSpace, IpProtocol, IpSpace, SubRange};
use crate::ip::{Ip, IpWildcard, Prefix};

pub fn arb_ip() -> impl Strategy<Value = Ip> {
    prop_oneof![
        3 => (0u32..=0xffff).prop_map(|low| Ip(0x0a00_0000 | low)),
        2 => (0u32..=0xff).prop_map(|low| Ip(0xc0a8_0100 | low)),
        1 => any::<u32>().prop_map(Ip),
    ]
}

pub fn arb_prefix() -> impl Strategy<Value = Prefix> {
    (arb_ip(), prop_oneof![Just(0u8), 8u8..=32]).prop_map(|(ip, len)| Prefix::new(ip, len))
}

pub fn arb_ip_wildcard() -> impl Strategy<Value = IpWildcard> {
    prop_oneof![
        3 => arb_prefix().prop_map(IpWildcard::from),
        1 => (arb_ip(), 0u32..=0xffff).prop_map(|(ip, mask)| IpWildcard::new(ip, mask)),
    ]
}

pub fn arb_ip_space() -> impl Strategy<Value = IpSpace> {
    let leaf = prop_oneof![
        Just(IpSpace::Universe),
        Just(IpSpace::Empty),
        arb_ip().prop_map(IpSpace::Ip),
        arb_prefix().prop_map(IpSpace::Prefix),
        (vec(arb_ip_wildcard(), 1..3), vec(arb_ip_wildcard(), 0..2)).prop_map(
            |(whitelist, blacklist)| IpSpace::Wildcards {
                whitelist,
                blacklist,
            }
        ),
    ];
    leaf.prop_recursive(2, 8, 3, |inner| {
        prop_oneof![
            vec(inner.clone(), 1..3).prop_map(IpSpace::Union),
            inner.prop_map(IpSpace::complement),
        ]
    })
}

pub fn arb_port() -> impl Strategy<Value = u32> {
    prop_oneof![
        Just(22u32),
        Just(80),
        Just(443),
        Just(1024),
        0u32..=65535,
    ]
}

pub fn arb_sub_range() -> impl Strategy<Value = SubRange> {
    (arb_port(), 0u32..200).prop_map(|(start, len)| SubRange::new(start, (start + len).min(65535)))
}

pub fn arb_ip_protocol() -> impl Strategy<Value = IpProtocol> {
    prop_oneof![
        Just(IpProtocol::TCP),
        Just(IpProtocol::UDP),
        Just(IpProtocol::ICMP),
    ]
}

pub fn arb_header_space() -> impl Strategy<Value = HeaderSpace> {
    (
        proptest::option::of(arb_ip_space()),
        proptest::option::of(arb_ip_space()),
        vec(arb_sub_range(), 0..3),
        vec(arb_sub_range(), 0..2),
        vec(arb_ip_protocol(), 0..3),
        any::<bool>(),
    )
        .prop_map(
            |(src_ips, dst_ips, dst_ports, not_dst_ports, ip_protocols, negate)| HeaderSpace {
                src_ips,
                dst_ips,
                dst_ports,
                not_dst_ports,
                ip_protocols,
                negate,
                ..HeaderSpace::default()
            },
        )
}

pub fn arb_bool_expr() -> impl Strategy<Value = BoolExpr> {
    let leaf = prop_oneof![
        Just(BoolExpr::True),
        Just(BoolExpr::False),
        arb_header_space().prop_map(BoolExpr::header_space),
        arb_port().prop_map(|p| BoolExpr::field_eq(HeaderField::DstPort, u64::from(p))),
        arb_sub_range().prop_map(|r| {
            let (lo, hi) = r.as_pair();
            BoolExpr::field_range(HeaderField::SrcPort, lo, hi)
        }),
        arb_ip_space().prop_map(|s| BoolExpr::ip_in(HeaderField::DstIp, s)),
        arb_ip_protocol()
            .prop_map(|p| BoolExpr::field_eq(HeaderField::IpProtocol, u64::from(p.number()))),
    ];
    leaf.prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            vec(inner.clone(), 0..3).prop_map(BoolExpr::And),
            vec(inner.clone(), 0..3).prop_map(BoolExpr::Or),
            inner.prop_map(BoolExpr::not),
        ]
    })
}

pub fn arb_acl() -> impl Strategy<Value = Acl> {
    vec((any::<bool>(), arb_bool_expr()), 0..5).prop_map(|lines| {
        let lines = lines
            .into_iter()
            .enumerate()
            .map(|(i, (permit, condition))| {
                let action = if permit {
                    LineAction::Permit
                } else {
                    LineAction::Deny
                };
                AclLine::new(action, condition, format!("line{i}"))
            })
            .collect();
        Acl::new("generated", lines)
    })
}

pub fn arb_packet() -> impl Strategy<Value = Packet> {
    (
        arb_ip(),
        arb_ip(),
        arb_port(),
        arb_port(),
        prop_oneof![Just(1u64), Just(6), Just(17), 0u64..=255],
    )
        .prop_map(|(dst, src, dst_port, src_port, proto)| {
            Packet::new()
                .with(HeaderField::DstIp, dst.as_u64())
                .with(HeaderField::SrcIp, src.as_u64())
                .with(HeaderField::OrigSrcIp, src.as_u64())
                .with(HeaderField::DstPort, u64::from(dst_port))
                .with(HeaderField::SrcPort, u64::from(src_port))
                .with(HeaderField::IpProtocol, proto)
        })
}

/// A positive constraint together with a packet satisfying it.
pub fn arb_constrained_packet() -> impl Strategy<Value = (HeaderSpace, Packet)> {
    (
        proptest::option::of(arb_prefix()),
        vec(arb_sub_range(), 0..2),
        vec(arb_ip_protocol(), 0..2),
        arb_packet(),
    )
        .prop_map(|(prefix, dst_ports, ip_protocols, mut packet)| {
            if let Some(p) = prefix {
                let host = packet.get(&HeaderField::DstIp) as u32;
                let pinned = p.network().as_u32() | (host & !p.mask());
                packet.set(HeaderField::DstIp, u64::from(pinned));
            }
            if let Some(range) = dst_ports.first() {
                packet.set(HeaderField::DstPort, u64::from(range.start));
            }
            if let Some(proto) = ip_protocols.first() {
                packet.set(HeaderField::IpProtocol, u64::from(proto.number()));
            }
            let constraint = HeaderSpace {
                dst_ips: prefix.map(IpSpace::Prefix),
                dst_ports,
                ip_protocols,
                ..HeaderSpace::default()
            };
            (constraint, packet)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldLayout;
    use crate::simplify::simplify;
    use crate::specialize::{
        specialize_acl, BddPacket, BddSpecializer, HeaderSpaceSpecializer, Specializer,
    };
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn no_acls() -> BTreeMap<String, Acl> {
        BTreeMap::new()
    }

    proptest! {
        #[test]
        fn constrained_packets_satisfy_their_constraint((hs, packet) in arb_constrained_packet()) {
            let holds = BoolExpr::header_space(hs).eval(&packet, &no_acls());
            prop_assert_eq!(holds, Ok(true));
        }

        #[test]
        fn simplify_preserves_truth(expr in arb_bool_expr(), packet in arb_packet()) {
            let acls = no_acls();
            prop_assert_eq!(expr.eval(&packet, &acls), simplify(&expr).eval(&packet, &acls));
        }

        #[test]
        fn permit_expr_is_first_match(acl in arb_acl(), packet in arb_packet()) {
            let acls = no_acls();
            prop_assert_eq!(acl.permit_expr().eval(&packet, &acls), acl.permits(&packet, &acls));
        }

        #[test]
        fn direct_specialization_is_sound(
            (hs, packet) in arb_constrained_packet(),
            expr in arb_bool_expr(),
        ) {
            let acls = no_acls();
            let specializer = HeaderSpaceSpecializer::new(&hs);
            prop_assert_eq!(
                expr.eval(&packet, &acls),
                specializer.specialize(&expr).eval(&packet, &acls)
            );
        }

        #[test]
        fn bdd_specialization_is_sound(
            (hs, packet) in arb_constrained_packet(),
            expr in arb_bool_expr(),
        ) {
            let acls = no_acls();
            let bdd_packet = Arc::new(BddPacket::new(&FieldLayout::basic()));
            let specializer = BddSpecializer::from_header_space(bdd_packet, &hs)
                .expect("header spaces are representable");
            prop_assert_eq!(
                expr.eval(&packet, &acls),
                specializer.specialize(&expr).eval(&packet, &acls)
            );
        }

        #[test]
        fn specialized_acls_keep_first_match_action(
            (hs, packet) in arb_constrained_packet(),
            acl in arb_acl(),
        ) {
            let acls = no_acls();
            let bdd_packet = Arc::new(BddPacket::new(&FieldLayout::basic()));
            let specializer = BddSpecializer::from_header_space(bdd_packet, &hs)
                .expect("header spaces are representable");
            let specialized = specialize_acl(&acl, &specializer);
            prop_assert_eq!(specialized.lines.len(), acl.lines.len());
            let before = acl.first_match(&packet, &acls).map(|m| m.map(|(_, a)| a));
            let after = specialized.first_match(&packet, &acls).map(|m| m.map(|(_, a)| a));
            prop_assert_eq!(before, after);
        }
    }
}
