#![allow(dead_code)]

use nod_encoder::snapshot::{FibRoute, InterfaceConfig, NodeConfig, Snapshot, SourceNat};
use nod_engine::{JobExecutor, Settings};
use nod_ir::acl::{Acl, AclLine};
use nod_ir::expr::BoolExpr;
use nod_ir::header_space::{HeaderSpace, IpProtocol, IpSpace, SubRange};
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

pub fn executor() -> Fixture<JobExecutor> {
    let settings = Settings {
        threads: Some(2),
        ..Default::default()
    };
    Ok(JobExecutor::new(&settings)?)
}

pub fn ssh() -> BoolExpr {
    BoolExpr::header_space(
        HeaderSpace::new()
            .with_ip_protocols(vec![IpProtocol::TCP])
            .with_dst_ports(vec![SubRange::single(22)]),
    )
}

/// `r1` defaults towards `r2`; `r2` serves 10.2.0.0/24 on `eth1` and has
/// no route for anything else.
///
/// ```text
/// r1 eth0 10.0.0.1/30 ---- 10.0.0.2/30 eth0 r2 eth1 10.2.0.1/24
/// ```
pub fn pair() -> Fixture<Snapshot> {
    let r1 = NodeConfig::default()
        .with_interface("eth0", iface("10.0.0.1/30")?)
        .with_routes(
            "default",
            vec![
                FibRoute::connected("10.0.0.0/30".parse()?, "eth0"),
                FibRoute::via("0.0.0.0/0".parse()?, "eth0", ip("10.0.0.2")?),
            ],
        );
    let r2 = NodeConfig::default()
        .with_interface("eth0", iface("10.0.0.2/30")?)
        .with_interface("eth1", iface("10.2.0.1/24")?)
        .with_routes(
            "default",
            vec![
                FibRoute::connected("10.0.0.0/30".parse()?, "eth0"),
                FibRoute::connected("10.2.0.0/24".parse()?, "eth1"),
            ],
        );
    Ok(Snapshot::default()
        .with_node("r1", r1)
        .with_node("r2", r2)
        .with_link(Edge::new("r1", "eth0", "r2", "eth0")))
}

/// [`pair`] with `r2` filtering ssh on the way in.
pub fn pair_without_ssh() -> Fixture<Snapshot> {
    let mut snapshot = pair()?;
    let r2 = snapshot.nodes.get_mut("r2").ok_or("no r2")?;
    r2.acls.insert(
        "no-ssh-in".into(),
        Acl::new(
            "no-ssh-in",
            vec![
                AclLine::deny(ssh(), "deny ssh"),
                AclLine::permit(BoolExpr::True, "permit any"),
            ],
        ),
    );
    r2.interfaces.get_mut("eth0").ok_or("no eth0")?.incoming_filter = Some("no-ssh-in".into());
    Ok(snapshot)
}

/// `r1` splits its default route between `r2` and `r3`. `r2` sends the
/// traffic on to an upstream that is not modeled; `r3` drops all of it.
///
/// ```text
///            eth0 -- r2 -- eth1 (upstream)
///   r1 <
///            eth1 -- r3 (deny all in)
/// ```
pub fn ecmp() -> Fixture<Snapshot> {
    let r1 = NodeConfig::default()
        .with_interface("eth0", iface("10.0.0.1/30")?)
        .with_interface("eth1", iface("10.0.1.1/30")?)
        .with_routes(
            "default",
            vec![
                FibRoute::connected("10.0.0.0/30".parse()?, "eth0"),
                FibRoute::connected("10.0.1.0/30".parse()?, "eth1"),
                FibRoute::via("0.0.0.0/0".parse()?, "eth0", ip("10.0.0.2")?),
                FibRoute::via("0.0.0.0/0".parse()?, "eth1", ip("10.0.1.2")?),
            ],
        );
    let r2 = NodeConfig::default()
        .with_interface("eth0", iface("10.0.0.2/30")?)
        .with_interface("eth1", iface("198.51.100.1/24")?)
        .with_routes(
            "default",
            vec![
                FibRoute::connected("10.0.0.0/30".parse()?, "eth0"),
                FibRoute::connected("198.51.100.0/24".parse()?, "eth1"),
                FibRoute::via("0.0.0.0/0".parse()?, "eth1", ip("198.51.100.254")?),
            ],
        );
    let mut r3_in = iface("10.0.1.2/30")?;
    r3_in.incoming_filter = Some("deny-all".into());
    let r3 = NodeConfig::default()
        .with_interface("eth0", r3_in)
        .with_acl(Acl::new(
            "deny-all",
            vec![AclLine::deny(BoolExpr::True, "deny any")],
        ))
        .with_routes(
            "default",
            vec![FibRoute::connected("10.0.1.0/30".parse()?, "eth0")],
        );
    Ok(Snapshot::default()
        .with_node("r1", r1)
        .with_node("r2", r2)
        .with_node("r3", r3)
        .with_link(Edge::new("r1", "eth0", "r2", "eth0"))
        .with_link(Edge::new("r1", "eth1", "r3", "eth0")))
}

/// A single gateway translating its LAN behind 10.0.0.1 - 10.0.0.10 on
/// the way to its upstream.
pub fn nat_gateway() -> Fixture<Snapshot> {
    let mut uplink = iface("203.0.113.1/24")?;
    uplink.source_nats = vec![SourceNat {
        acl: None,
        pool_start: ip("10.0.0.1")?,
        pool_end: ip("10.0.0.10")?,
    }];
    let gw = NodeConfig::default()
        .with_interface("lan", iface("192.168.1.1/24")?)
        .with_interface("wan", uplink)
        .with_routes(
            "default",
            vec![
                FibRoute::connected("192.168.1.0/24".parse()?, "lan"),
                FibRoute::connected("203.0.113.0/24".parse()?, "wan"),
                FibRoute::via("0.0.0.0/0".parse()?, "wan", ip("203.0.113.254")?),
            ],
        );
    Ok(Snapshot::default().with_node("gw", gw))
}

/// [`nat_gateway`] with one ACL, `inside`, serving both as the NAT guard
/// (seeing LAN sources) and as the WAN egress filter (seeing pool sources).
pub fn nat_gateway_shared_acl() -> Fixture<Snapshot> {
    let mut snapshot = nat_gateway()?;
    let gw = snapshot.nodes.get_mut("gw").ok_or("no gw")?;
    gw.acls.insert(
        "inside".into(),
        Acl::new(
            "inside",
            vec![
                AclLine::permit(src_in("192.168.1.0/24")?, "lan sources"),
                AclLine::permit(src_in("10.0.0.0/28")?, "pool sources"),
            ],
        ),
    );
    let wan = gw.interfaces.get_mut("wan").ok_or("no wan")?;
    wan.source_nats[0].acl = Some("inside".into());
    wan.outgoing_filter = Some("inside".into());
    Ok(snapshot)
}

fn src_in(prefix: &str) -> Fixture<BoolExpr> {
    Ok(BoolExpr::header_space(
        HeaderSpace::new().with_src_ips(IpSpace::Prefix(prefix.parse()?)),
    ))
}

/// Two routers each pointing 10.9.0.0/16 at the other.
pub fn routing_loop() -> Fixture<Snapshot> {
    let node = |local: &str, remote: &str| -> Fixture<NodeConfig> {
        Ok(NodeConfig::default()
            .with_interface("eth0", iface(&format!("{local}/30"))?)
            .with_routes(
                "default",
                vec![
                    FibRoute::connected("10.0.0.0/30".parse()?, "eth0"),
                    FibRoute::via("10.9.0.0/16".parse()?, "eth0", ip(remote)?),
                ],
            ))
    };
    Ok(Snapshot::default()
        .with_node("r1", node("10.0.0.1", "10.0.0.2")?)
        .with_node("r2", node("10.0.0.2", "10.0.0.1")?)
        .with_link(Edge::new("r1", "eth0", "r2", "eth0")))
}
