#![allow(dead_code)]

use nod_encoder::snapshot::{FibRoute, InterfaceConfig, NodeConfig, Snapshot};
use nod_ir::acl::{Acl, AclLine};
use nod_ir::expr::BoolExpr;
use nod_ir::header_space::{HeaderSpace, IpProtocol, SubRange};
use nod_ir::ip::Ip;
use nod_ir::state::Edge;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;
pub type Fixture<T> = Result<T, Box<dyn std::error::Error>>;

pub fn ip(text: &str) -> Fixture<Ip> {
    Ok(text.parse()?)
}

pub fn iface(addr: &str) -> Fixture<InterfaceConfig> {
    Ok(InterfaceConfig {
        addresses: vec![addr.parse()?],
        ..Default::default()
    })
}

/// `r1` serves the 192.168.1.0/24 LAN on `eth1` and defaults towards `r2`;
/// `r2` hands everything else to an upstream router on `eth1` that is not
/// part of the snapshot, filtered by `no-ssh`.
///
/// ```text
/// LAN --eth1[r1]eth0 ---- eth0[r2]eth1--> internet
/// ```
pub fn line_network() -> Fixture<Snapshot> {
    let r1 = NodeConfig::default()
        .with_interface("eth0", iface("10.0.0.1/30")?)
        .with_interface("eth1", iface("192.168.1.1/24")?)
        .with_routes(
            "default",
            vec![
                FibRoute::connected("10.0.0.0/30".parse()?, "eth0"),
                FibRoute::connected("192.168.1.0/24".parse()?, "eth1"),
                FibRoute::via("0.0.0.0/0".parse()?, "eth0", ip("10.0.0.2")?),
            ],
        );

    let no_ssh = Acl::new(
        "no-ssh",
        vec![
            AclLine::deny(
                BoolExpr::header_space(
                    HeaderSpace::new()
                        .with_ip_protocols(vec![IpProtocol::TCP])
                        .with_dst_ports(vec![SubRange::single(22)]),
                ),
                "deny ssh",
            ),
            AclLine::permit(BoolExpr::True, "permit any"),
        ],
    );
    let mut uplink = iface("203.0.113.1/24")?;
    uplink.outgoing_filter = Some("no-ssh".into());
    let r2 = NodeConfig::default()
        .with_interface("eth0", iface("10.0.0.2/30")?)
        .with_interface("eth1", uplink)
        .with_acl(no_ssh)
        .with_routes(
            "default",
            vec![
                FibRoute::connected("10.0.0.0/30".parse()?, "eth0"),
                FibRoute::via("192.168.1.0/24".parse()?, "eth0", ip("10.0.0.1")?),
                FibRoute::connected("203.0.113.0/24".parse()?, "eth1"),
                FibRoute::via("0.0.0.0/0".parse()?, "eth1", ip("203.0.113.254")?),
            ],
        );

    Ok(Snapshot::default()
        .with_node("r1", r1)
        .with_node("r2", r2)
        .with_link(Edge::new("r1", "eth0", "r2", "eth0")))
}
