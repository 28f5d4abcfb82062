//! The frozen view of a snapshot that every rule and query generator reads.
//!
//! Everything here is computed once at build time: which nodes, VRFs,
//! interfaces and edges are enabled, the node-resolved ACLs, the source NAT
//! tables, the FIB forwarding conditions and the `SRC_INTERFACE` indexing.
//! Disabling more of the network builds a fresh input.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use nod_ir::acl::{Acl, AclLine};
use nod_ir::expr::BoolExpr;
use nod_ir::field::{bits_for, FieldLayout, HeaderField};
use nod_ir::ip::Ip;
use nod_ir::simplify::simplify;
use nod_ir::specialize::{specialize_acl, Specializer};
use nod_ir::state::Edge;
use nod_ir::IrError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EncoderError;
use crate::fib::{resolve_vrf, ForwardingAction, Topology};
use crate::snapshot::{InterfaceConfig, InterfaceRef, NodeConfig, Snapshot, VrfRef};
use crate::zones::{
    reads_src_interface, zone_inbound_acl, zone_outgoing_acl, zone_outgoing_acl_name,
    ZONE_INBOUND_ACL,
};

/// ACL standing in for a source NAT rule that names no ACL.
pub const DEFAULT_SOURCE_NAT_ACL: &str = "~DEFAULT_SOURCE_NAT_ACL~";

/// The parts of the network taken out of consideration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Disabled {
    pub nodes: BTreeSet<String>,
    pub vrfs: BTreeSet<VrfRef>,
    pub interfaces: BTreeSet<InterfaceRef>,
    pub edges: BTreeSet<Edge>,
}

impl Disabled {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
            && self.vrfs.is_empty()
            && self.interfaces.is_empty()
            && self.edges.is_empty()
    }

    /// Union of two blacklists.
    pub fn union(&self, other: &Disabled) -> Disabled {
        Disabled {
            nodes: self.nodes.union(&other.nodes).cloned().collect(),
            vrfs: self.vrfs.union(&other.vrfs).cloned().collect(),
            interfaces: self.interfaces.union(&other.interfaces).cloned().collect(),
            edges: self.edges.union(&other.edges).cloned().collect(),
        }
    }
}

/// A source NAT rule with its selecting ACL resolved to a name on the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSourceNat {
    pub acl: String,
    pub pool_start: Ip,
    pub pool_end: Ip,
}

type SharedSpecializer = Arc<dyn Specializer + Send + Sync>;

pub struct SynthesizerInputBuilder {
    snapshot: Arc<Snapshot>,
    disabled: Disabled,
    specializer: Option<SharedSpecializer>,
    simplify: bool,
}

impl SynthesizerInputBuilder {
    pub fn disabled_nodes(mut self, nodes: impl IntoIterator<Item = String>) -> Self {
        self.disabled.nodes.extend(nodes);
        self
    }

    pub fn disabled_vrfs(mut self, vrfs: impl IntoIterator<Item = VrfRef>) -> Self {
        self.disabled.vrfs.extend(vrfs);
        self
    }

    pub fn disabled_interfaces(mut self, ifaces: impl IntoIterator<Item = InterfaceRef>) -> Self {
        self.disabled.interfaces.extend(ifaces);
        self
    }

    pub fn disabled_edges(mut self, edges: impl IntoIterator<Item = Edge>) -> Self {
        self.disabled.edges.extend(edges);
        self
    }

    pub fn disabled(mut self, disabled: &Disabled) -> Self {
        self.disabled = self.disabled.union(disabled);
        self
    }

    /// Specialize every ACL against a header constraint before lowering.
    pub fn specializer(mut self, specializer: SharedSpecializer) -> Self {
        self.specializer = Some(specializer);
        self
    }

    /// Simplify lowered ACL conditions. On by default.
    pub fn simplify(mut self, simplify: bool) -> Self {
        self.simplify = simplify;
        self
    }

    pub fn build(self) -> Result<SynthesizerInput, EncoderError> {
        SynthesizerInput::compute(self.snapshot, self.disabled, self.specializer, self.simplify)
    }
}

/// Frozen, enabled-only view of a snapshot.
pub struct SynthesizerInput {
    snapshot: Arc<Snapshot>,
    disabled: Disabled,
    specializer: Option<SharedSpecializer>,
    simplify: bool,

    enabled_nodes: BTreeSet<String>,
    enabled_vrfs: BTreeMap<String, BTreeSet<String>>,
    enabled_interfaces: BTreeMap<String, BTreeSet<String>>,
    enabled_edges: BTreeSet<Edge>,
    enabled_flow_sinks: BTreeSet<InterfaceRef>,
    topology_interfaces: BTreeMap<String, BTreeSet<String>>,
    ips_by_hostname: BTreeMap<String, BTreeSet<Ip>>,
    interface_ips: BTreeMap<InterfaceRef, BTreeSet<Ip>>,
    acls: BTreeMap<String, BTreeMap<String, Acl>>,
    source_nats: BTreeMap<InterfaceRef, Vec<ResolvedSourceNat>>,
    fib_conditions: BTreeMap<String, BTreeMap<String, BTreeMap<ForwardingAction, BoolExpr>>>,
    interface_index: BTreeMap<String, BTreeMap<String, u64>>,
    tracks_src_interface: bool,
    layout: FieldLayout,
}

impl fmt::Debug for SynthesizerInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynthesizerInput")
            .field("enabled_nodes", &self.enabled_nodes)
            .field("enabled_edges", &self.enabled_edges.len())
            .field("disabled", &self.disabled)
            .field("specialized", &self.specializer.is_some())
            .field("tracks_src_interface", &self.tracks_src_interface)
            .finish()
    }
}

impl SynthesizerInput {
    pub fn builder(snapshot: &Snapshot) -> SynthesizerInputBuilder {
        SynthesizerInputBuilder {
            snapshot: Arc::new(snapshot.clone()),
            disabled: Disabled::default(),
            specializer: None,
            simplify: true,
        }
    }

    /// A new input over the same snapshot with `disabled` taken out on top
    /// of what this input already excludes.
    pub fn with_disabled(&self, disabled: &Disabled) -> Result<SynthesizerInput, EncoderError> {
        Self::compute(
            Arc::clone(&self.snapshot),
            self.disabled.union(disabled),
            self.specializer.clone(),
            self.simplify,
        )
    }

    fn compute(
        snapshot: Arc<Snapshot>,
        disabled: Disabled,
        specializer: Option<SharedSpecializer>,
        simplify_conditions: bool,
    ) -> Result<Self, EncoderError> {
        let enabled_nodes: BTreeSet<String> = snapshot
            .nodes
            .keys()
            .filter(|n| !disabled.nodes.contains(*n))
            .cloned()
            .collect();

        let mut enabled_vrfs: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut enabled_interfaces: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut interface_ips: BTreeMap<InterfaceRef, BTreeSet<Ip>> = BTreeMap::new();
        let mut ips_by_hostname: BTreeMap<String, BTreeSet<Ip>> = BTreeMap::new();
        for node in &enabled_nodes {
            let config = &snapshot.nodes[node];
            let vrfs: BTreeSet<String> = config
                .all_vrfs()
                .into_iter()
                .filter(|v| !disabled.vrfs.contains(&VrfRef::new(node, v)))
                .collect();
            let mut ifaces = BTreeSet::new();
            for (name, iface) in &config.interfaces {
                let iref = InterfaceRef::new(node, name);
                if !iface.active
                    || disabled.interfaces.contains(&iref)
                    || !vrfs.contains(&iface.vrf)
                {
                    continue;
                }
                if iface.routing_policy.is_some() {
                    return Err(EncoderError::Unsupported(format!(
                        "interface-level policy routing on {node}:{name}"
                    )));
                }
                let ips: BTreeSet<Ip> = iface.addresses.iter().map(|a| a.ip).collect();
                ips_by_hostname
                    .entry(node.clone())
                    .or_default()
                    .extend(ips.iter().copied());
                interface_ips.insert(iref, ips);
                ifaces.insert(name.clone());
            }
            ips_by_hostname.entry(node.clone()).or_default();
            enabled_vrfs.insert(node.clone(), vrfs);
            enabled_interfaces.insert(node.clone(), ifaces);
        }

        let is_enabled = |node: &str, iface: &str| {
            enabled_interfaces
                .get(node)
                .is_some_and(|ifaces| ifaces.contains(iface))
        };
        let enabled_edges: BTreeSet<Edge> = snapshot
            .edges
            .iter()
            .filter(|e| {
                !disabled.edges.contains(*e)
                    && is_enabled(&e.node1, &e.iface1)
                    && is_enabled(&e.node2, &e.iface2)
            })
            .cloned()
            .collect();
        let enabled_flow_sinks: BTreeSet<InterfaceRef> = snapshot
            .flow_sinks
            .iter()
            .filter(|s| is_enabled(&s.node, &s.iface))
            .cloned()
            .collect();

        let mut topology_interfaces: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for edge in &enabled_edges {
            topology_interfaces
                .entry(edge.node1.clone())
                .or_default()
                .insert(edge.iface1.clone());
        }
        for sink in &enabled_flow_sinks {
            topology_interfaces
                .entry(sink.node.clone())
                .or_default()
                .insert(sink.iface.clone());
        }

        // Raw ACL tables per node: configured, zone and default NAT ACLs.
        let mut raw_acls: BTreeMap<String, BTreeMap<String, Acl>> = BTreeMap::new();
        let mut source_nats: BTreeMap<InterfaceRef, Vec<ResolvedSourceNat>> = BTreeMap::new();
        for node in &enabled_nodes {
            let config = &snapshot.nodes[node];
            let mut table: BTreeMap<String, Acl> = config
                .acls
                .iter()
                .map(|(name, acl)| (name.clone(), Acl::new(name.clone(), acl.lines.clone())))
                .collect();
            if let Some(acl) = zone_inbound_acl(config) {
                table.insert(acl.name.clone(), acl);
            }
            for iface in &enabled_interfaces[node] {
                if let Some(acl) = zone_outgoing_acl(config, iface) {
                    table.insert(acl.name.clone(), acl);
                }
                let nats = resolve_source_nats(node, config, iface, &mut table)?;
                if !nats.is_empty() {
                    source_nats.insert(InterfaceRef::new(node, iface), nats);
                }
                for filter in filters_of(config, iface) {
                    if !table.contains_key(filter) {
                        return Err(IrError::UnknownAcl(format!("{node}:{filter}")).into());
                    }
                }
            }
            raw_acls.insert(node.clone(), table);
        }

        let tracks_src_interface = raw_acls
            .values()
            .flat_map(|table| table.values())
            .flat_map(|acl| acl.lines.iter())
            .any(|line| reads_src_interface(&line.condition));

        let interface_index: BTreeMap<String, BTreeMap<String, u64>> = enabled_nodes
            .iter()
            .map(|node| {
                let index = snapshot.nodes[node]
                    .interfaces
                    .keys()
                    .enumerate()
                    .map(|(k, name)| (name.clone(), k as u64 + 1))
                    .collect();
                (node.clone(), index)
            })
            .collect();

        let mut layout = FieldLayout::basic();
        if tracks_src_interface {
            let most = interface_index.values().map(BTreeMap::len).max().unwrap_or(0);
            layout.allocate(HeaderField::SrcInterface, bits_for(most as u64 + 1));
        }

        let mut acls = BTreeMap::new();
        for (node, table) in raw_acls {
            let table = match &specializer {
                Some(s) if s.can_specialize() => table
                    .into_iter()
                    .map(|(name, acl)| (name, specialize_acl(&acl, s.as_ref())))
                    .collect(),
                _ => table,
            };
            let index = &interface_index[&node];
            let mut lowered = BTreeMap::new();
            for (name, acl) in &table {
                let mut stack = vec![name.clone()];
                let mut lines = Vec::with_capacity(acl.lines.len());
                for line in &acl.lines {
                    let condition = resolve_condition(&line.condition, &table, index, &mut stack)?;
                    let condition = if simplify_conditions {
                        simplify(&condition)
                    } else {
                        condition
                    };
                    lines.push(AclLine::new(line.action, condition, line.name.clone()));
                }
                lowered.insert(name.clone(), Acl::new(name.clone(), lines));
            }
            acls.insert(node, lowered);
        }

        let topology = Topology {
            interfaces: &enabled_interfaces,
            flow_sinks: &enabled_flow_sinks,
            edges: &enabled_edges,
            addresses: &interface_ips,
        };
        let mut fib_conditions = BTreeMap::new();
        for node in &enabled_nodes {
            let config = &snapshot.nodes[node];
            let per_vrf: BTreeMap<String, BTreeMap<ForwardingAction, BoolExpr>> = enabled_vrfs
                [node]
                .iter()
                .map(|vrf| {
                    let routes = config.fibs.get(vrf).map(Vec::as_slice).unwrap_or(&[]);
                    (vrf.clone(), resolve_vrf(node, routes, &topology))
                })
                .collect();
            fib_conditions.insert(node.clone(), per_vrf);
        }

        debug!(
            nodes = enabled_nodes.len(),
            edges = enabled_edges.len(),
            flow_sinks = enabled_flow_sinks.len(),
            tracks_src_interface,
            specialized = specializer.is_some(),
            "NoD: built synthesizer input"
        );

        Ok(Self {
            snapshot,
            disabled,
            specializer,
            simplify: simplify_conditions,
            enabled_nodes,
            enabled_vrfs,
            enabled_interfaces,
            enabled_edges,
            enabled_flow_sinks,
            topology_interfaces,
            ips_by_hostname,
            interface_ips,
            acls,
            source_nats,
            fib_conditions,
            interface_index,
            tracks_src_interface,
            layout,
        })
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn disabled(&self) -> &Disabled {
        &self.disabled
    }

    pub fn node_config(&self, node: &str) -> Result<&NodeConfig, EncoderError> {
        if !self.enabled_nodes.contains(node) {
            return Err(EncoderError::UnknownNode(node.to_string()));
        }
        self.snapshot
            .nodes
            .get(node)
            .ok_or_else(|| EncoderError::UnknownNode(node.to_string()))
    }

    pub fn enabled_nodes(&self) -> &BTreeSet<String> {
        &self.enabled_nodes
    }

    pub fn enabled_vrfs(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.enabled_vrfs
    }

    pub fn enabled_interfaces(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.enabled_interfaces
    }

    pub fn is_vrf_enabled(&self, node: &str, vrf: &str) -> bool {
        self.enabled_vrfs
            .get(node)
            .is_some_and(|vrfs| vrfs.contains(vrf))
    }

    pub fn is_interface_enabled(&self, node: &str, iface: &str) -> bool {
        self.enabled_interfaces
            .get(node)
            .is_some_and(|ifaces| ifaces.contains(iface))
    }

    pub fn enabled_edges(&self) -> &BTreeSet<Edge> {
        &self.enabled_edges
    }

    pub fn enabled_flow_sinks(&self) -> &BTreeSet<InterfaceRef> {
        &self.enabled_flow_sinks
    }

    pub fn is_flow_sink(&self, node: &str, iface: &str) -> bool {
        self.enabled_flow_sinks
            .contains(&InterfaceRef::new(node, iface))
    }

    /// Egress interfaces of each node that lead somewhere: the near end of an
    /// enabled edge or an enabled flow sink.
    pub fn topology_interfaces(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.topology_interfaces
    }

    pub fn ips_by_hostname(&self) -> &BTreeMap<String, BTreeSet<Ip>> {
        &self.ips_by_hostname
    }

    pub fn interface_ips(&self, node: &str, iface: &str) -> Option<&BTreeSet<Ip>> {
        self.interface_ips.get(&InterfaceRef::new(node, iface))
    }

    /// The VRF an enabled interface belongs to.
    pub fn interface_vrf(&self, node: &str, iface: &str) -> Option<&str> {
        if !self.is_interface_enabled(node, iface) {
            return None;
        }
        self.snapshot
            .nodes
            .get(node)
            .and_then(|n| n.interfaces.get(iface))
            .map(|i| i.vrf.as_str())
    }

    pub fn incoming_filter(&self, node: &str, iface: &str) -> Option<&str> {
        self.interface_config(node, iface)
            .and_then(|i| i.incoming_filter.as_deref())
    }

    pub fn outgoing_filter(&self, node: &str, iface: &str) -> Option<&str> {
        self.interface_config(node, iface)
            .and_then(|i| i.outgoing_filter.as_deref())
    }

    /// Name of the synthesized zone-pair filter of an egress interface.
    pub fn zone_outgoing_filter(&self, node: &str, iface: &str) -> Option<&str> {
        let name = zone_outgoing_acl_name(iface);
        self.acls
            .get(node)
            .and_then(|table| table.get_key_value(&name))
            .map(|(key, _)| key.as_str())
    }

    /// Name of the synthesized inbound zone filter of a node.
    pub fn zone_inbound_filter(&self, node: &str) -> Option<&str> {
        self.acls
            .get(node)
            .and_then(|table| table.get_key_value(ZONE_INBOUND_ACL))
            .map(|(key, _)| key.as_str())
    }

    fn interface_config(&self, node: &str, iface: &str) -> Option<&InterfaceConfig> {
        if !self.is_interface_enabled(node, iface) {
            return None;
        }
        self.snapshot.nodes.get(node)?.interfaces.get(iface)
    }

    /// Node-resolved ACLs of every enabled node.
    pub fn acls(&self) -> &BTreeMap<String, BTreeMap<String, Acl>> {
        &self.acls
    }

    pub fn acl(&self, node: &str, name: &str) -> Option<&Acl> {
        self.acls.get(node)?.get(name)
    }

    pub fn source_nats(&self, node: &str, iface: &str) -> &[ResolvedSourceNat] {
        self.source_nats
            .get(&InterfaceRef::new(node, iface))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn has_source_nats(&self) -> bool {
        !self.source_nats.is_empty()
    }

    /// Forwarding conditions per node and VRF, keyed by receiver.
    pub fn fib_conditions(
        &self,
    ) -> &BTreeMap<String, BTreeMap<String, BTreeMap<ForwardingAction, BoolExpr>>> {
        &self.fib_conditions
    }

    /// `SRC_INTERFACE` value of a packet that entered on `iface`.
    pub fn interface_index(&self, node: &str, iface: &str) -> Option<u64> {
        self.interface_index.get(node)?.get(iface).copied()
    }

    pub fn tracks_src_interface(&self) -> bool {
        self.tracks_src_interface
    }

    /// Header fields of the base transition program.
    pub fn layout(&self) -> &FieldLayout {
        &self.layout
    }
}

fn filters_of<'a>(config: &'a NodeConfig, iface: &str) -> impl Iterator<Item = &'a String> {
    config
        .interfaces
        .get(iface)
        .into_iter()
        .flat_map(|i| i.incoming_filter.iter().chain(i.outgoing_filter.iter()))
}

fn resolve_source_nats(
    node: &str,
    config: &NodeConfig,
    iface: &str,
    table: &mut BTreeMap<String, Acl>,
) -> Result<Vec<ResolvedSourceNat>, EncoderError> {
    let Some(iface_config) = config.interfaces.get(iface) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::with_capacity(iface_config.source_nats.len());
    for nat in &iface_config.source_nats {
        if nat.pool_start > nat.pool_end {
            return Err(EncoderError::Invalid(format!(
                "source NAT pool {}-{} on {node}:{iface} is empty",
                nat.pool_start, nat.pool_end
            )));
        }
        let acl = match &nat.acl {
            Some(name) if table.contains_key(name) => name.clone(),
            Some(name) => return Err(IrError::UnknownAcl(format!("{node}:{name}")).into()),
            None => {
                table
                    .entry(DEFAULT_SOURCE_NAT_ACL.to_string())
                    .or_insert_with(|| Acl::permit_all(DEFAULT_SOURCE_NAT_ACL));
                DEFAULT_SOURCE_NAT_ACL.to_string()
            }
        };
        out.push(ResolvedSourceNat {
            acl,
            pool_start: nat.pool_start,
            pool_end: nat.pool_end,
        });
    }
    Ok(out)
}

/// Rewrite the node-relative forms of `expr`: ingress interface tests become
/// `SRC_INTERFACE` comparisons and ACL references are inlined.
fn resolve_condition(
    expr: &BoolExpr,
    table: &BTreeMap<String, Acl>,
    index: &BTreeMap<String, u64>,
    stack: &mut Vec<String>,
) -> Result<BoolExpr, IrError> {
    Ok(match expr {
        BoolExpr::MatchSrcInterface(names) => BoolExpr::or(
            names
                .iter()
                .filter_map(|name| index.get(name))
                .map(|&k| BoolExpr::field_eq(HeaderField::SrcInterface, k))
                .collect(),
        ),
        BoolExpr::OriginatingFromDevice => BoolExpr::field_eq(HeaderField::SrcInterface, 0),
        BoolExpr::PermittedByAcl(name) => {
            if stack.contains(name) {
                return Err(IrError::AclCycle(name.clone()));
            }
            let acl = table
                .get(name)
                .ok_or_else(|| IrError::UnknownAcl(name.clone()))?;
            stack.push(name.clone());
            let inlined = resolve_condition(&acl.permit_expr(), table, index, stack)?;
            stack.pop();
            inlined
        }
        BoolExpr::And(items) => BoolExpr::and(
            items
                .iter()
                .map(|i| resolve_condition(i, table, index, stack))
                .collect::<Result<_, _>>()?,
        ),
        BoolExpr::Or(items) => BoolExpr::or(
            items
                .iter()
                .map(|i| resolve_condition(i, table, index, stack))
                .collect::<Result<_, _>>()?,
        ),
        BoolExpr::Not(inner) => resolve_condition(inner, table, index, stack)?.not(),
        BoolExpr::True
        | BoolExpr::False
        | BoolExpr::Eq(..)
        | BoolExpr::RangeMatch { .. }
        | BoolExpr::HeaderSpaceMatch { .. }
        | BoolExpr::IpSpaceMatch { .. } => expr.clone(),
    })
}
