//! Lowering of `HeaderSpace` and `IpSpace` shorthand into primitive
//! equalities, bit extracts and range matches.

use crate::expr::{BoolExpr, IntExpr};
use crate::field::{HeaderField, TCP_FLAG_FIELDS};
use crate::header_space::{FlowState, HeaderSpace, IpProtocol, IpSpace, Protocol, SubRange};
use crate::ip::IpWildcard;

/// Constraint "`field` matches wildcard `w`" on a 32-bit IP field.
pub fn match_wildcard(field: &HeaderField, w: &IpWildcard) -> BoolExpr {
    match w.prefix_len() {
        Some(0) => BoolExpr::True,
        Some(32) => BoolExpr::field_eq(field.clone(), w.ip().as_u64()),
        Some(len) => {
            let low = 32 - u32::from(len);
            BoolExpr::eq(
                IntExpr::extract(field.clone(), low, 31),
                IntExpr::lit(u64::from(w.ip().as_u32() >> low)),
            )
        }
        None => {
            let care = w.care_mask();
            let bits = (0..32u32)
                .rev()
                .filter(|i| care & (1 << i) != 0)
                .map(|i| {
                    BoolExpr::eq(
                        IntExpr::extract(field.clone(), i, i),
                        IntExpr::lit(u64::from((w.ip().as_u32() >> i) & 1)),
                    )
                })
                .collect();
            BoolExpr::and(bits)
        }
    }
}

fn match_space_on_field(space: &IpSpace, field: &HeaderField) -> BoolExpr {
    match space {
        IpSpace::Universe => BoolExpr::True,
        IpSpace::Empty => BoolExpr::False,
        IpSpace::Ip(ip) => BoolExpr::field_eq(field.clone(), ip.as_u64()),
        IpSpace::Prefix(p) => match_wildcard(field, &IpWildcard::from(*p)),
        IpSpace::Wildcards {
            whitelist,
            blacklist,
        } => {
            let allowed =
                BoolExpr::or(whitelist.iter().map(|w| match_wildcard(field, w)).collect());
            if blacklist.is_empty() {
                allowed
            } else {
                let blocked =
                    BoolExpr::or(blacklist.iter().map(|w| match_wildcard(field, w)).collect());
                BoolExpr::and(vec![allowed, blocked.not()])
            }
        }
        IpSpace::Union(spaces) => BoolExpr::or(
            spaces
                .iter()
                .map(|s| match_space_on_field(s, field))
                .collect(),
        ),
        IpSpace::Complement(inner) => match_space_on_field(inner, field).not(),
    }
}

/// "Any of `fields` lies in `space`".
pub fn match_ip_space(space: &IpSpace, fields: &[HeaderField]) -> BoolExpr {
    match fields {
        [single] => match_space_on_field(space, single),
        _ => BoolExpr::or(
            fields
                .iter()
                .map(|f| match_space_on_field(space, f))
                .collect(),
        ),
    }
}

pub(crate) fn ranges_expr(field: HeaderField, ranges: &[SubRange]) -> BoolExpr {
    BoolExpr::RangeMatch {
        var: IntExpr::Var(field),
        ranges: ranges.iter().map(SubRange::as_pair).collect(),
    }
}

pub(crate) fn values_expr(field: HeaderField, values: impl IntoIterator<Item = u64>) -> BoolExpr {
    BoolExpr::or(
        values
            .into_iter()
            .map(|v| BoolExpr::field_eq(field.clone(), v))
            .collect(),
    )
}

pub(crate) fn protocol_expr(protocol: Protocol, port_fields: &[HeaderField]) -> BoolExpr {
    let proto = BoolExpr::field_eq(
        HeaderField::IpProtocol,
        u64::from(protocol.ip_protocol().number()),
    );
    match protocol.port() {
        None => proto,
        Some(port) => BoolExpr::and(vec![
            proto,
            values_expr_any(port_fields, u64::from(port)),
        ]),
    }
}

fn values_expr_any(fields: &[HeaderField], value: u64) -> BoolExpr {
    match fields {
        [single] => BoolExpr::field_eq(single.clone(), value),
        _ => BoolExpr::or(
            fields
                .iter()
                .map(|f| BoolExpr::field_eq(f.clone(), value))
                .collect(),
        ),
    }
}

fn protocols_expr(protocols: &[Protocol], port_fields: &[HeaderField]) -> BoolExpr {
    BoolExpr::or(
        protocols
            .iter()
            .map(|p| protocol_expr(*p, port_fields))
            .collect(),
    )
}

pub(crate) fn tcp_flags_expr(pattern: &crate::header_space::TcpFlagsMatch) -> BoolExpr {
    BoolExpr::and(
        TCP_FLAG_FIELDS
            .iter()
            .zip(pattern.bits())
            .filter_map(|(field, bit)| bit.map(|b| BoolExpr::field_eq(field.clone(), u64::from(b))))
            .collect(),
    )
}

/// Lower a header space into a conjunction with one conjunct per
/// constrained field. With `orig_src` set, source-IP constraints are placed
/// on `ORIG_SRC_IP`.
pub fn match_header_space(hs: &HeaderSpace, orig_src: bool) -> BoolExpr {
    let src_ip = if orig_src {
        HeaderField::OrigSrcIp
    } else {
        HeaderField::SrcIp
    };
    let src_ips = [src_ip.clone()];
    let dst_ips = [HeaderField::DstIp];
    let both_ips = [src_ip, HeaderField::DstIp];
    let src_ports = [HeaderField::SrcPort];
    let dst_ports = [HeaderField::DstPort];
    let both_ports = [HeaderField::DstPort, HeaderField::SrcPort];
    let mut conjuncts = Vec::new();

    let ip_sets = [
        (&hs.src_ips, &hs.not_src_ips, &src_ips[..]),
        (&hs.dst_ips, &hs.not_dst_ips, &dst_ips[..]),
        (&hs.src_or_dst_ips, &hs.not_src_or_dst_ips, &both_ips[..]),
    ];
    for (positive, negative, fields) in ip_sets {
        if let Some(space) = positive {
            conjuncts.push(match_ip_space(space, fields));
        }
        if let Some(space) = negative {
            conjuncts.push(match_ip_space(space, fields).not());
        }
    }

    let port_sets = [
        (&hs.src_ports, &hs.not_src_ports, &src_ports[..]),
        (&hs.dst_ports, &hs.not_dst_ports, &dst_ports[..]),
        (&hs.src_or_dst_ports, &hs.not_src_or_dst_ports, &both_ports[..]),
    ];
    for (positive, negative, fields) in port_sets {
        let any_field = |ranges: &[SubRange]| {
            BoolExpr::or(fields.iter().map(|f| ranges_expr(f.clone(), ranges)).collect())
        };
        if !positive.is_empty() {
            conjuncts.push(any_field(positive));
        }
        if !negative.is_empty() {
            conjuncts.push(any_field(negative).not());
        }
    }

    let protocol_sets = [
        (&hs.src_protocols, &hs.not_src_protocols, &src_ports[..]),
        (&hs.dst_protocols, &hs.not_dst_protocols, &dst_ports[..]),
        (&hs.src_or_dst_protocols, &hs.not_src_or_dst_protocols, &both_ports[..]),
    ];
    for (positive, negative, fields) in protocol_sets {
        if !positive.is_empty() {
            conjuncts.push(protocols_expr(positive, fields));
        }
        if !negative.is_empty() {
            conjuncts.push(protocols_expr(negative, fields).not());
        }
    }

    let proto_number = |p: &IpProtocol| u64::from(p.number());
    if !hs.ip_protocols.is_empty() {
        conjuncts.push(values_expr(
            HeaderField::IpProtocol,
            hs.ip_protocols.iter().map(proto_number),
        ));
    }
    if !hs.not_ip_protocols.is_empty() {
        let excluded = hs.not_ip_protocols.iter().map(proto_number);
        conjuncts.push(values_expr(HeaderField::IpProtocol, excluded).not());
    }

    for (positive, negative, field) in [
        (&hs.dscps, &hs.not_dscps, HeaderField::Dscp),
        (&hs.ecns, &hs.not_ecns, HeaderField::Ecn),
    ] {
        if !positive.is_empty() {
            conjuncts.push(values_expr(field.clone(), positive.iter().map(|v| u64::from(*v))));
        }
        if !negative.is_empty() {
            conjuncts.push(values_expr(field, negative.iter().map(|v| u64::from(*v))).not());
        }
    }

    for (positive, negative, field) in [
        (&hs.fragment_offsets, &hs.not_fragment_offsets, HeaderField::FragmentOffset),
        (&hs.icmp_types, &hs.not_icmp_types, HeaderField::IcmpType),
        (&hs.icmp_codes, &hs.not_icmp_codes, HeaderField::IcmpCode),
        (&hs.packet_lengths, &hs.not_packet_lengths, HeaderField::PacketLength),
    ] {
        if !positive.is_empty() {
            conjuncts.push(ranges_expr(field.clone(), positive));
        }
        if !negative.is_empty() {
            conjuncts.push(ranges_expr(field, negative).not());
        }
    }

    if !hs.states.is_empty() {
        conjuncts.push(values_expr(
            HeaderField::State,
            hs.states.iter().map(|s| FlowState::number(*s)),
        ));
    }
    if !hs.tcp_flags.is_empty() {
        conjuncts.push(BoolExpr::or(hs.tcp_flags.iter().map(tcp_flags_expr).collect()));
    }

    let matched = BoolExpr::and(conjuncts);
    if hs.negate {
        matched.not()
    } else {
        matched
    }
}

/// Replace every `HeaderSpaceMatch` and `IpSpaceMatch` with its lowered form.
/// Node-relative forms are left in place.
pub fn lower_shorthand(expr: &BoolExpr) -> BoolExpr {
    match expr {
        BoolExpr::HeaderSpaceMatch { space, orig_src } => {
            lower_shorthand(&match_header_space(space, *orig_src))
        }
        BoolExpr::IpSpaceMatch { fields, space } => match_ip_space(space, fields),
        BoolExpr::And(items) => BoolExpr::And(items.iter().map(lower_shorthand).collect()),
        BoolExpr::Or(items) => BoolExpr::Or(items.iter().map(lower_shorthand).collect()),
        BoolExpr::Not(inner) => lower_shorthand(inner).not(),
        BoolExpr::True
        | BoolExpr::False
        | BoolExpr::Eq(..)
        | BoolExpr::RangeMatch { .. }
        | BoolExpr::MatchSrcInterface(_)
        | BoolExpr::OriginatingFromDevice
        | BoolExpr::PermittedByAcl(_) => expr.clone(),
    }
}
