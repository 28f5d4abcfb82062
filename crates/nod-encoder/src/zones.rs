//! Zone-based firewall filters, synthesized as ordinary ACLs so the
//! transition rules treat them like any interface filter.

use std::collections::{BTreeMap, BTreeSet};

use nod_ir::acl::{Acl, AclLine};
use nod_ir::expr::BoolExpr;

use crate::snapshot::NodeConfig;

/// ACL guarding traffic addressed to the device itself.
pub const ZONE_INBOUND_ACL: &str = "~ZONE_INBOUND~";
const ZONE_OUTGOING_PREFIX: &str = "~ZONE_OUTGOING~";

pub fn zone_outgoing_acl_name(iface: &str) -> String {
    format!("{ZONE_OUTGOING_PREFIX}{iface}")
}

fn zone_members(node: &NodeConfig) -> BTreeMap<&str, BTreeSet<String>> {
    let mut members: BTreeMap<&str, BTreeSet<String>> = node
        .zones
        .keys()
        .map(|zone| (zone.as_str(), BTreeSet::new()))
        .collect();
    for (name, iface) in &node.interfaces {
        if let Some(zone) = iface.zone.as_deref() {
            members.entry(zone).or_default().insert(name.clone());
        }
    }
    members
}

fn from_zone(members: &BTreeSet<String>) -> BoolExpr {
    BoolExpr::MatchSrcInterface(members.clone())
}

/// The inbound filter of a zoned node, `None` when the node has no zones.
pub fn zone_inbound_acl(node: &NodeConfig) -> Option<Acl> {
    if node.zones.is_empty() {
        return None;
    }
    let members = zone_members(node);
    let mut lines = vec![AclLine::permit(
        BoolExpr::OriginatingFromDevice,
        "originated by device",
    )];
    for (zone, ifaces) in &members {
        let filter = node.zones.get(*zone).and_then(|z| z.inbound_filter.as_ref());
        match filter {
            Some(filter) => {
                lines.push(AclLine::permit(
                    BoolExpr::and(vec![
                        from_zone(ifaces),
                        BoolExpr::PermittedByAcl(filter.clone()),
                    ]),
                    format!("zone {zone} inbound filter {filter}"),
                ));
                lines.push(AclLine::deny(
                    from_zone(ifaces),
                    format!("zone {zone} inbound filter {filter} denies"),
                ));
            }
            None => lines.push(AclLine::new(
                node.default_inbound_action,
                from_zone(ifaces),
                format!("zone {zone} default inbound action"),
            )),
        }
    }
    lines.push(AclLine::permit(BoolExpr::True, "interfaces without a zone"));
    Some(Acl::new(ZONE_INBOUND_ACL, lines))
}

/// The zone-pair filter of egress interface `iface`, `None` when the
/// interface belongs to no zone.
pub fn zone_outgoing_acl(node: &NodeConfig, iface: &str) -> Option<Acl> {
    let to_zone = node.interfaces.get(iface)?.zone.as_deref()?;
    let members = zone_members(node);
    let mut lines = vec![AclLine::permit(
        BoolExpr::OriginatingFromDevice,
        "originated by device",
    )];

    let mut explicit_intra_zone = false;
    for filter in node
        .cross_zone_filters
        .iter()
        .filter(|f| f.to_zone == to_zone)
    {
        let Some(ifaces) = members.get(filter.from_zone.as_str()) else {
            continue;
        };
        explicit_intra_zone |= filter.from_zone == to_zone;
        lines.push(AclLine::permit(
            BoolExpr::and(vec![
                from_zone(ifaces),
                BoolExpr::PermittedByAcl(filter.acl.clone()),
            ]),
            format!("zone {} to {to_zone} filter {}", filter.from_zone, filter.acl),
        ));
        lines.push(AclLine::deny(
            from_zone(ifaces),
            format!("zone {} to {to_zone} filter {} denies", filter.from_zone, filter.acl),
        ));
    }
    if !explicit_intra_zone {
        if let Some(ifaces) = members.get(to_zone) {
            lines.push(AclLine::permit(from_zone(ifaces), format!("intra-zone {to_zone}")));
        }
    }
    lines.push(AclLine::new(
        node.default_cross_zone_action,
        BoolExpr::True,
        "default cross-zone action",
    ));
    Some(Acl::new(zone_outgoing_acl_name(iface), lines))
}

/// Whether the condition depends on the packet's ingress interface.
pub(crate) fn reads_src_interface(expr: &BoolExpr) -> bool {
    match expr {
        BoolExpr::MatchSrcInterface(_) | BoolExpr::OriginatingFromDevice => true,
        BoolExpr::And(items) | BoolExpr::Or(items) => items.iter().any(reads_src_interface),
        BoolExpr::Not(inner) => reads_src_interface(inner),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::{CrossZoneFilter, InterfaceConfig, Zone};
    use nod_ir::expr::Packet;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn zoned(zone: &str) -> InterfaceConfig {
        InterfaceConfig {
            zone: Some(zone.to_string()),
            ..Default::default()
        }
    }

    fn firewall() -> NodeConfig {
        let mut node = NodeConfig::default()
            .with_interface("inside", zoned("trust"))
            .with_interface("dmz", zoned("dmz"))
            .with_interface("outside", zoned("untrust"))
            .with_interface("mgmt", InterfaceConfig::default())
            .with_acl(Acl::permit_all("any"));
        node.zones.insert("trust".into(), Zone::default());
        node.zones.insert("dmz".into(), Zone::default());
        node.zones.insert(
            "untrust".into(),
            Zone {
                inbound_filter: Some("nothing".into()),
            },
        );
        node.acls.insert("nothing".into(), Acl::new("nothing", Vec::new()));
        node.cross_zone_filters.push(CrossZoneFilter {
            from_zone: "trust".into(),
            to_zone: "untrust".into(),
            acl: "any".into(),
        });
        node
    }

    fn verdict(acl: &Acl, node: &NodeConfig, packet: &Packet) -> Result<bool, nod_ir::IrError> {
        acl.permits(packet, &node.acls)
    }

    #[test]
    fn cross_zone_traffic_needs_a_pair_filter() -> TestResult {
        let node = firewall();
        let acl = zone_outgoing_acl(&node, "outside").ok_or("outside is zoned")?;
        assert_eq!(acl.name, "~ZONE_OUTGOING~outside");
        assert!(verdict(&acl, &node, &Packet::new().entering("inside"))?);
        assert!(!verdict(&acl, &node, &Packet::new().entering("dmz"))?);
        assert!(!verdict(&acl, &node, &Packet::new().entering("mgmt"))?);
        assert!(verdict(&acl, &node, &Packet::new())?);
        assert!(verdict(&acl, &node, &Packet::new().entering("outside"))?);
        assert!(zone_outgoing_acl(&node, "mgmt").is_none());
        Ok(())
    }

    #[test]
    fn inbound_filter_applies_per_zone() -> TestResult {
        let node = firewall();
        let acl = zone_inbound_acl(&node).ok_or("node has zones")?;
        assert!(verdict(&acl, &node, &Packet::new().entering("inside"))?);
        assert!(!verdict(&acl, &node, &Packet::new().entering("outside"))?);
        assert!(verdict(&acl, &node, &Packet::new().entering("mgmt"))?);
        assert!(verdict(&acl, &node, &Packet::new())?);
        assert!(reads_src_interface(&acl.lines[0].condition));
        Ok(())
    }

    #[test]
    fn unzoned_nodes_get_no_filters() {
        assert!(zone_inbound_acl(&NodeConfig::default()).is_none());
    }
}
