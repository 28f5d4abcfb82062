//! Concrete flows decoded from solver witnesses.

use std::collections::BTreeMap;
use std::fmt;

use nod_encoder::IngressLocation;
use nod_ir::field::HeaderField;
use nod_ir::ip::Ip;
use serde::{Deserialize, Serialize};

/// Tag of flows found against the unmodified network.
pub const TAG_BASE: &str = "BASE";
/// Tag of flows found by comparing the network with a reduced copy.
pub const TAG_DIFFERENTIAL: &str = "DIFFERENTIAL";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TcpFlags {
    pub cwr: bool,
    pub ece: bool,
    pub urg: bool,
    pub ack: bool,
    pub psh: bool,
    pub rst: bool,
    pub syn: bool,
    pub fin: bool,
}

/// One packet header together with where it was injected.
///
/// `src_ip` is the source address after any source NAT on the path;
/// `orig_src_ip` is the address the packet carried when injected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Flow {
    pub ingress_node: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_vrf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingress_interface: Option<String>,
    pub src_ip: Ip,
    pub dst_ip: Ip,
    pub src_port: u32,
    pub dst_port: u32,
    pub ip_protocol: u32,
    pub icmp_type: u32,
    pub icmp_code: u32,
    pub dscp: u32,
    pub ecn: u32,
    pub fragment_offset: u32,
    pub packet_length: u32,
    pub state: u32,
    pub tcp_flags: TcpFlags,
    pub orig_src_ip: Ip,
    pub tag: String,
}

fn value(witness: &BTreeMap<HeaderField, u64>, field: HeaderField) -> u32 {
    witness
        .get(&field)
        .map_or(0, |&v| u32::try_from(v).unwrap_or(u32::MAX))
}

fn flag(witness: &BTreeMap<HeaderField, u64>, field: HeaderField) -> bool {
    witness.get(&field).is_some_and(|&v| v != 0)
}

impl Flow {
    /// Read a flow out of a witness header. Missing fields read as zero.
    pub fn from_witness(
        witness: &BTreeMap<HeaderField, u64>,
        ingress: &IngressLocation,
        tag: &str,
    ) -> Self {
        let (ingress_vrf, ingress_interface) = match ingress {
            IngressLocation::Vrf { vrf, .. } => (Some(vrf.clone()), None),
            IngressLocation::InterfaceLink { iface, .. } => (None, Some(iface.clone())),
        };
        Flow {
            ingress_node: ingress.node().to_string(),
            ingress_vrf,
            ingress_interface,
            src_ip: Ip(value(witness, HeaderField::SrcIp)),
            dst_ip: Ip(value(witness, HeaderField::DstIp)),
            src_port: value(witness, HeaderField::SrcPort),
            dst_port: value(witness, HeaderField::DstPort),
            ip_protocol: value(witness, HeaderField::IpProtocol),
            icmp_type: value(witness, HeaderField::IcmpType),
            icmp_code: value(witness, HeaderField::IcmpCode),
            dscp: value(witness, HeaderField::Dscp),
            ecn: value(witness, HeaderField::Ecn),
            fragment_offset: value(witness, HeaderField::FragmentOffset),
            packet_length: value(witness, HeaderField::PacketLength),
            state: value(witness, HeaderField::State),
            tcp_flags: TcpFlags {
                cwr: flag(witness, HeaderField::TcpCwr),
                ece: flag(witness, HeaderField::TcpEce),
                urg: flag(witness, HeaderField::TcpUrg),
                ack: flag(witness, HeaderField::TcpAck),
                psh: flag(witness, HeaderField::TcpPsh),
                rst: flag(witness, HeaderField::TcpRst),
                syn: flag(witness, HeaderField::TcpSyn),
                fin: flag(witness, HeaderField::TcpFin),
            },
            orig_src_ip: Ip(value(witness, HeaderField::OrigSrcIp)),
            tag: tag.to_string(),
        }
    }

    /// The flow as it has to be injected to reproduce the witness: with
    /// its pre-NAT source address.
    pub fn as_injected(&self) -> Flow {
        Flow {
            src_ip: self.orig_src_ip,
            ..self.clone()
        }
    }

    pub fn is_natted(&self) -> bool {
        self.src_ip != self.orig_src_ip
    }

    pub fn ingress(&self) -> IngressLocation {
        match (&self.ingress_vrf, &self.ingress_interface) {
            (_, Some(iface)) => IngressLocation::interface_link(&self.ingress_node, iface),
            (Some(vrf), None) => IngressLocation::vrf(&self.ingress_node, vrf),
            (None, None) => {
                IngressLocation::vrf(&self.ingress_node, nod_encoder::snapshot::DEFAULT_VRF)
            }
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} -> {}:{} proto={}",
            self.ingress(),
            self.src_ip,
            self.src_port,
            self.dst_ip,
            self.dst_port,
            self.ip_protocol
        )?;
        if self.is_natted() {
            write!(f, " (injected as {})", self.orig_src_ip)?;
        }
        write!(f, " [{}]", self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn witness_fields_land_in_the_flow() -> TestResult {
        let src: Ip = "10.0.0.5".parse()?;
        let orig: Ip = "192.168.1.7".parse()?;
        let witness = BTreeMap::from([
            (HeaderField::SrcIp, src.as_u64()),
            (HeaderField::OrigSrcIp, orig.as_u64()),
            (HeaderField::DstPort, 443),
            (HeaderField::IpProtocol, 6),
            (HeaderField::TcpSyn, 1),
            (HeaderField::Transit("r1".into()), 1),
        ]);
        let ingress = IngressLocation::interface_link("r1", "eth1");
        let flow = Flow::from_witness(&witness, &ingress, TAG_BASE);
        assert_eq!(flow.ingress_node, "r1");
        assert_eq!(flow.ingress_interface.as_deref(), Some("eth1"));
        assert_eq!(flow.ingress_vrf, None);
        assert_eq!(flow.src_ip, src);
        assert_eq!(flow.dst_ip, Ip(0));
        assert_eq!(flow.dst_port, 443);
        assert!(flow.tcp_flags.syn);
        assert!(!flow.tcp_flags.ack);
        assert!(flow.is_natted());
        assert_eq!(flow.ingress(), IngressLocation::interface_link("r1", "eth1"));

        let injected = flow.as_injected();
        assert_eq!(injected.src_ip, orig);
        assert!(!injected.is_natted());
        assert_eq!(injected.dst_port, flow.dst_port);
        Ok(())
    }

    #[test]
    fn display_mentions_the_injected_source() -> TestResult {
        let witness = BTreeMap::from([
            (HeaderField::SrcIp, "1.1.1.1".parse::<Ip>()?.as_u64()),
            (HeaderField::OrigSrcIp, "2.2.2.2".parse::<Ip>()?.as_u64()),
        ]);
        let flow = Flow::from_witness(&witness, &IngressLocation::vrf("r2", "default"), TAG_BASE);
        let text = flow.to_string();
        assert!(text.starts_with("r2@default 1.1.1.1:0"), "{text}");
        assert!(text.contains("injected as 2.2.2.2"), "{text}");
        Ok(())
    }
}
