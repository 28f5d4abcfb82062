//! Network-wide analyses: each builds the frozen input once, splits the
//! question into independent jobs, dispatches them and merges the reports.

mod acl_lines;
mod differential;
mod multipath;
mod reachability;

pub use acl_lines::acl_reachability;
pub use differential::{path_diff, reduced_reachability, Negated};
pub use multipath::multipath;
pub use reachability::{reachability, reachability_datalog, IngressSrcIps, ReachabilityParameters};

use std::sync::Arc;

use nod_encoder::snapshot::Snapshot;
use nod_encoder::{Disabled, SynthesizerInput};
use nod_ir::field::FieldLayout;
use nod_ir::header_space::HeaderSpace;
use nod_ir::specialize::{BddPacket, BddSpecializer, HeaderSpaceSpecializer, Specializer};
use tracing::debug;

use crate::error::AnalysisError;
use crate::settings::{Settings, SpecializerChoice};

fn has_source_nats(snapshot: &Snapshot) -> bool {
    snapshot
        .nodes
        .values()
        .flat_map(|n| n.interfaces.values())
        .any(|i| !i.source_nats.is_empty())
}

/// The constraint ACLs may be specialized against. Source addresses are
/// dropped when NAT can rewrite them before a filter sees the packet.
fn specialization_constraint(
    snapshot: &Snapshot,
    header_space: &HeaderSpace,
) -> Option<HeaderSpace> {
    if header_space.negate || header_space.is_unconstrained() {
        return None;
    }
    let mut constraint = header_space.clone();
    if has_source_nats(snapshot) {
        constraint.src_ips = None;
        constraint.not_src_ips = None;
        constraint.src_or_dst_ips = None;
        constraint.not_src_or_dst_ips = None;
    }
    (!constraint.is_unconstrained()).then_some(constraint)
}

fn specializer_for(
    settings: &Settings,
    constraint: &HeaderSpace,
) -> Result<Arc<dyn Specializer + Send + Sync>, AnalysisError> {
    Ok(match settings.specializer {
        SpecializerChoice::Direct => Arc::new(HeaderSpaceSpecializer::new(constraint)),
        SpecializerChoice::Bdd => {
            let packet = Arc::new(BddPacket::new(&FieldLayout::basic()));
            Arc::new(BddSpecializer::from_header_space(packet, constraint)?)
        }
    })
}

/// Build the shared input for one analysis.
pub(crate) fn build_input(
    snapshot: &Snapshot,
    settings: &Settings,
    header_space: Option<&HeaderSpace>,
    disabled: &Disabled,
) -> Result<Arc<SynthesizerInput>, AnalysisError> {
    let mut builder = SynthesizerInput::builder(snapshot)
        .simplify(settings.simplify)
        .disabled(disabled);
    if settings.specialize {
        let constraint = header_space.and_then(|hs| specialization_constraint(snapshot, hs));
        if let Some(constraint) = constraint {
            debug!(specializer = ?settings.specializer, "NoD: specializing ACLs to the query");
            builder = builder.specializer(specializer_for(settings, &constraint)?);
        }
    }
    Ok(Arc::new(builder.build()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nod_encoder::snapshot::{InterfaceConfig, NodeConfig, SourceNat};
    use nod_ir::header_space::IpSpace;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn nat_drops_source_constraints_from_specialization() -> TestResult {
        let hs = HeaderSpace::new()
            .with_src_ips(IpSpace::Prefix("10.0.0.0/8".parse()?))
            .with_dst_ips(IpSpace::Prefix("192.168.0.0/16".parse()?));
        let plain = Snapshot::default();
        assert_eq!(specialization_constraint(&plain, &hs), Some(hs.clone()));

        let natted_iface = InterfaceConfig {
            source_nats: vec![SourceNat {
                acl: None,
                pool_start: "1.1.1.1".parse()?,
                pool_end: "1.1.1.1".parse()?,
            }],
            ..Default::default()
        };
        let natted = Snapshot::default()
            .with_node("r1", NodeConfig::default().with_interface("eth0", natted_iface));
        let constraint = specialization_constraint(&natted, &hs).ok_or("no constraint")?;
        assert_eq!(constraint.src_ips, None);
        assert_eq!(constraint.dst_ips, hs.dst_ips);

        let src_only = HeaderSpace::new().with_src_ips(IpSpace::Prefix("10.0.0.0/8".parse()?));
        assert_eq!(specialization_constraint(&natted, &src_only), None);
        assert_eq!(specialization_constraint(&plain, &src_only.clone().negated()), None);
        Ok(())
    }
}
