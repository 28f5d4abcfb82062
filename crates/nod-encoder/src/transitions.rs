//! The base dataplane program: every rule that moves a header from its
//! origination point to a disposition.
//!
//! Rules come out grouped by family and always in the same order for the
//! same input, so renderings and fingerprints are reproducible.

use std::collections::BTreeSet;

use nod_ir::acl::Acl;
use nod_ir::expr::BoolExpr;
use nod_ir::field::HeaderField;
use nod_ir::header_space::IpSpace;
use nod_ir::program::{Rule, Transform};
use nod_ir::simplify::simplify;
use nod_ir::state::{AclSite, Edge, StateExpr};
use tracing::debug;

use crate::fib::ForwardingAction;
use crate::input::SynthesizerInput;

pub const FAMILY_POST_OUT_NEIGHBOR: &str = "PostOutNeighbor";
pub const FAMILY_POST_OUT_FLOW_SINK: &str = "PostOutFlowSinkInterface";
pub const FAMILY_NEIGHBOR_UNREACHABLE: &str = "NeighborUnreachable";
pub const FAMILY_ORIGINATE: &str = "Originate";

/// Rules are collected here; a rule whose guard can never hold is dropped.
/// Every ACL verdict referenced through `permit`/`deny` is remembered so its
/// line relations can be emitted for that site.
#[derive(Default)]
struct Rules {
    rules: Vec<Rule>,
    acl_uses: BTreeSet<(String, String, AclSite)>,
}

impl Rules {
    fn push(&mut self, rule: Rule) {
        if !simplify(&rule.guard).is_false() {
            self.rules.push(rule);
        }
    }

    fn permit(&mut self, node: &str, acl: &str, site: &AclSite) -> StateExpr {
        self.acl_uses
            .insert((node.to_string(), acl.to_string(), site.clone()));
        StateExpr::AclPermit(node.to_string(), acl.to_string(), site.clone())
    }

    fn deny(&mut self, node: &str, acl: &str, site: &AclSite) -> StateExpr {
        self.acl_uses
            .insert((node.to_string(), acl.to_string(), site.clone()));
        StateExpr::AclDeny(node.to_string(), acl.to_string(), site.clone())
    }
}

fn dst_owned_by(input: &SynthesizerInput, node: &str) -> BoolExpr {
    let ips = input
        .ips_by_hostname()
        .get(node)
        .cloned()
        .unwrap_or_default();
    if ips.is_empty() {
        BoolExpr::False
    } else {
        BoolExpr::ip_in(HeaderField::DstIp, IpSpace::ips(ips))
    }
}

/// Generate the transition rules of `input`.
pub fn generate_transitions(input: &SynthesizerInput) -> Vec<Rule> {
    let mut rules = Rules::default();
    originate_and_ingress(input, &mut rules);
    node_interior(input, &mut rules);
    let egress = destination_routing(input, &mut rules);
    egress_rules(input, &egress, &mut rules);
    for (node, table) in input.acls() {
        for acl in table.values() {
            acl_rules(node, acl, &AclSite::Standalone, &mut rules);
        }
    }
    for (node, name, site) in std::mem::take(&mut rules.acl_uses) {
        if let Some(acl) = input.acl(&node, &name) {
            acl_rules(&node, acl, &site, &mut rules);
        }
    }
    projections(input, &mut rules);
    debug!(rules = rules.rules.len(), "NoD: generated transition rules");
    rules.rules
}

fn originate_and_ingress(input: &SynthesizerInput, rules: &mut Rules) {
    for (node, vrfs) in input.enabled_vrfs() {
        for vrf in vrfs {
            let origin = StateExpr::OriginateVrf(node.clone(), vrf.clone());
            rules.push(
                Rule::new(StateExpr::PostInVrf(node.clone(), vrf.clone()))
                    .when(origin.clone())
                    .family("CopyOriginateVrf"),
            );
            rules.push(
                Rule::new(StateExpr::Originate(node.clone()))
                    .when(origin)
                    .family("ProjectOriginateVrf"),
            );
        }
        rules.push(
            Rule::new(StateExpr::PostIn(node.clone()))
                .when(StateExpr::Originate(node.clone()))
                .family("CopyOriginate"),
        );
    }

    for (node, ifaces) in input.enabled_interfaces() {
        for iface in ifaces {
            let pre_in = StateExpr::PreInInterface(node.clone(), iface.clone());
            let mut originate = Rule::new(pre_in.clone())
                .when(StateExpr::OriginateInterfaceLink(node.clone(), iface.clone()))
                .family("OriginateInterfaceLink");
            if let Some(t) = src_interface_transform(input, node, iface) {
                originate = originate.transform(t);
            }
            rules.push(originate);

            let post_in = StateExpr::PostInInterface(node.clone(), iface.clone());
            let mut pass = Rule::new(post_in).when(pre_in.clone()).family("PassIncomingAcl");
            if let Some(filter) = input.incoming_filter(node, iface) {
                let site = AclSite::Incoming(iface.clone());
                pass = pass.when(rules.permit(node, filter, &site));
                let deny = rules.deny(node, filter, &site);
                rules.push(
                    Rule::new(StateExpr::NodeDropAclIn(node.clone()))
                        .when(pre_in)
                        .when(deny)
                        .family("FailIncomingAcl"),
                );
            }
            rules.push(pass);
        }
    }
}

fn src_interface_transform(input: &SynthesizerInput, node: &str, iface: &str) -> Option<Transform> {
    if !input.tracks_src_interface() {
        return None;
    }
    input
        .interface_index(node, iface)
        .map(|k| Transform::assign(HeaderField::SrcInterface, k))
}

fn node_interior(input: &SynthesizerInput, rules: &mut Rules) {
    for (node, ifaces) in input.enabled_interfaces() {
        for iface in ifaces {
            let post_in = StateExpr::PostInInterface(node.clone(), iface.clone());
            rules.push(
                Rule::new(StateExpr::PostIn(node.clone()))
                    .when(post_in.clone())
                    .family("ProjectPostInInterface"),
            );
            if let Some(vrf) = input.interface_vrf(node, iface) {
                rules.push(
                    Rule::new(StateExpr::PostInVrf(node.clone(), vrf.to_string()))
                        .when(post_in)
                        .family("PostInInterfaceCorrespondingVrf"),
                );
            }
        }
    }

    for node in input.enabled_nodes() {
        let post_in = StateExpr::PostIn(node.clone());
        let for_me = dst_owned_by(input, node);
        let mut accept = Rule::new(StateExpr::NodeAccept(node.clone()))
            .when(post_in.clone())
            .guard(for_me.clone())
            .family("PostInForMe");
        if let Some(zone) = input.zone_inbound_filter(node) {
            accept = accept.when(rules.permit(node, zone, &AclSite::ZoneInbound));
            let deny = rules.deny(node, zone, &AclSite::ZoneInbound);
            rules.push(
                Rule::new(StateExpr::NodeDropAclIn(node.clone()))
                    .when(post_in.clone())
                    .when(deny)
                    .guard(for_me.clone())
                    .family("FailZoneInbound"),
            );
        }
        rules.push(accept);
        rules.push(
            Rule::new(StateExpr::PreOut(node.clone()))
                .when(post_in)
                .guard(simplify(&for_me.not()))
                .family("PostInNotMine"),
        );
    }
}

/// Emit the routing rules and return every edge a packet can be routed to.
fn destination_routing(input: &SynthesizerInput, rules: &mut Rules) -> BTreeSet<Edge> {
    let mut egress = BTreeSet::new();
    for (node, per_vrf) in input.fib_conditions() {
        for (vrf, actions) in per_vrf {
            for (action, condition) in actions {
                let target = match action {
                    ForwardingAction::Edge(edge) => {
                        egress.insert(edge.clone());
                        StateExpr::PreOutEdge(edge.clone())
                    }
                    ForwardingAction::NullRoute => StateExpr::NodeDropNullRoute(node.clone()),
                    ForwardingAction::NoRoute => StateExpr::NodeDropNoRoute(node.clone()),
                };
                rules.push(
                    Rule::new(target)
                        .when(StateExpr::PreOut(node.clone()))
                        .when(StateExpr::PostInVrf(node.clone(), vrf.clone()))
                        .guard(condition.clone())
                        .family("DestinationRouting"),
                );
            }
        }
    }
    egress
}

fn egress_rules(input: &SynthesizerInput, egress: &BTreeSet<Edge>, rules: &mut Rules) {
    for edge in egress {
        source_nat(input, edge, rules);
    }

    for edge in egress {
        let node = &edge.node1;
        let iface = &edge.iface1;
        let post_nat = StateExpr::PreOutEdgePostNat(edge.clone());
        let filters: Vec<&str> = input
            .outgoing_filter(node, iface)
            .into_iter()
            .chain(input.zone_outgoing_filter(node, iface))
            .collect();

        let site = AclSite::Outgoing(iface.clone());
        for filter in &filters {
            let deny = rules.deny(node, filter, &site);
            rules.push(
                Rule::new(StateExpr::NodeDropAclOut(node.clone()))
                    .when(post_nat.clone())
                    .when(deny)
                    .family("FailOutgoingAcl"),
            );
        }
        let permits: Vec<StateExpr> = filters
            .iter()
            .map(|f| rules.permit(node, f, &site))
            .collect();

        if edge.is_neighbor_unreachable() {
            rules.push(
                Rule::new(StateExpr::NodeNeighborUnreachable(node.clone()))
                    .when(post_nat)
                    .when_all(permits)
                    .family(FAMILY_NEIGHBOR_UNREACHABLE),
            );
            continue;
        }
        rules.push(
            Rule::new(StateExpr::PostOutInterface(node.clone(), iface.clone()))
                .when(post_nat.clone())
                .when_all(permits)
                .family("PassOutgoingAcl"),
        );

        let sink_endpoint =
            input.is_flow_sink(node, iface) || input.is_flow_sink(&edge.node2, &edge.iface2);
        if edge.is_pseudo() || sink_endpoint {
            continue;
        }
        let mut neighbor = Rule::new(StateExpr::PreInInterface(
            edge.node2.clone(),
            edge.iface2.clone(),
        ))
        .when(post_nat)
        .when(StateExpr::PostOutInterface(node.clone(), iface.clone()))
        .family(FAMILY_POST_OUT_NEIGHBOR);
        if let Some(t) = src_interface_transform(input, &edge.node2, &edge.iface2) {
            neighbor = neighbor.transform(t);
        }
        rules.push(neighbor);
    }

    let out_ifaces: BTreeSet<(&String, &String)> = egress
        .iter()
        .filter(|e| !e.is_neighbor_unreachable())
        .map(|e| (&e.node1, &e.iface1))
        .collect();
    for (node, iface) in &out_ifaces {
        let post_out = StateExpr::PostOutInterface((*node).clone(), (*iface).clone());
        if input.is_flow_sink(node, iface) {
            rules.push(
                Rule::new(StateExpr::NodeAccept((*node).clone()))
                    .when(post_out.clone())
                    .family(FAMILY_POST_OUT_FLOW_SINK),
            );
        }
        rules.push(
            Rule::new(StateExpr::NodeTransit((*node).clone()))
                .when(post_out)
                .family("ProjectPostOutInterface"),
        );
    }
}

fn source_nat(input: &SynthesizerInput, edge: &Edge, rules: &mut Rules) {
    let node = &edge.node1;
    let pre = StateExpr::PreOutEdge(edge.clone());
    let post = StateExpr::PreOutEdgePostNat(edge.clone());
    let nats = input.source_nats(node, &edge.iface1);
    let site = AclSite::SourceNat(edge.iface1.clone());
    let denies: Vec<StateExpr> = nats
        .iter()
        .map(|nat| rules.deny(node, &nat.acl, &site))
        .collect();
    for (k, nat) in nats.iter().enumerate() {
        let permit = rules.permit(node, &nat.acl, &site);
        rules.push(
            Rule::new(post.clone())
                .when(pre.clone())
                .when(permit)
                .when_all(denies[..k].iter().cloned())
                .transform(Transform::range(
                    HeaderField::SrcIp,
                    nat.pool_start.as_u64(),
                    nat.pool_end.as_u64(),
                ))
                .family("SourceNat"),
        );
    }
    rules.push(
        Rule::new(post)
            .when(pre)
            .when_all(denies)
            .family("SourceNat"),
    );
}

/// First-match line relations of one ACL at one site, with the implicit
/// deny at the end.
fn acl_rules(node: &str, acl: &Acl, site: &AclSite, rules: &mut Rules) {
    let name = acl.name.as_str();
    let permit = StateExpr::AclPermit(node.to_string(), name.to_string(), site.clone());
    let deny = StateExpr::AclDeny(node.to_string(), name.to_string(), site.clone());
    if acl.lines.is_empty() {
        rules.push(Rule::axiom(deny, BoolExpr::True).family("AclDeny"));
        return;
    }
    let line_match =
        |i| StateExpr::AclLineMatch(node.to_string(), name.to_string(), site.clone(), i);
    let line_no_match =
        |i| StateExpr::AclLineNoMatch(node.to_string(), name.to_string(), site.clone(), i);

    for (i, acl_line) in acl.lines.iter().enumerate() {
        let previous = i.checked_sub(1).map(line_no_match);
        let condition = &acl_line.condition;
        let mut matched =
            Rule::axiom(line_match(i), condition.clone()).family("AclLineMatch");
        let mut unmatched =
            Rule::axiom(line_no_match(i), simplify(&condition.clone().not()))
                .family("AclLineNoMatch");
        if let Some(previous) = previous {
            matched = matched.when(previous.clone());
            unmatched = unmatched.when(previous);
        }
        rules.push(matched);
        rules.push(unmatched);

        let verdict = if acl_line.action.is_permit() {
            Rule::new(permit.clone()).family("AclPermit")
        } else {
            Rule::new(deny.clone()).family("AclDeny")
        };
        rules.push(verdict.when(line_match(i)));
    }
    rules.push(
        Rule::new(deny)
            .when(line_no_match(acl.lines.len() - 1))
            .family("AclDeny"),
    );
}

fn projections(input: &SynthesizerInput, rules: &mut Rules) {
    let project = |from: StateExpr, to: StateExpr, family: &'static str| {
        Rule::new(to).when(from).family(family)
    };
    for node in input.enabled_nodes() {
        let n = || node.clone();
        for (from, to) in [
            (StateExpr::NodeDropAclIn(n()), StateExpr::NodeDropAcl(n())),
            (StateExpr::NodeDropAclOut(n()), StateExpr::NodeDropAcl(n())),
            (StateExpr::NodeDropAcl(n()), StateExpr::NodeDrop(n())),
            (StateExpr::NodeDropNoRoute(n()), StateExpr::NodeDrop(n())),
            (StateExpr::NodeDropNullRoute(n()), StateExpr::NodeDrop(n())),
        ] {
            rules.push(project(from, to, "ProjectNodeDrop"));
        }
        for (from, to) in [
            (StateExpr::NodeAccept(n()), StateExpr::Accept),
            (StateExpr::NodeDrop(n()), StateExpr::Drop),
            (StateExpr::NodeDropAcl(n()), StateExpr::DropAcl),
            (StateExpr::NodeDropAclIn(n()), StateExpr::DropAclIn),
            (StateExpr::NodeDropAclOut(n()), StateExpr::DropAclOut),
            (StateExpr::NodeDropNoRoute(n()), StateExpr::DropNoRoute),
            (StateExpr::NodeDropNullRoute(n()), StateExpr::DropNullRoute),
            (
                StateExpr::NodeNeighborUnreachable(n()),
                StateExpr::NeighborUnreachableOrExitsNetwork,
            ),
        ] {
            rules.push(project(from, to, "ProjectNodeDisposition"));
        }
    }
    for (from, to) in [
        (StateExpr::DropAclIn, StateExpr::DropAcl),
        (StateExpr::DropAclOut, StateExpr::DropAcl),
        (StateExpr::DropNoRoute, StateExpr::Drop),
        (StateExpr::DropNullRoute, StateExpr::Drop),
    ] {
        rules.push(project(from, to, "ProjectDisposition"));
    }
}
