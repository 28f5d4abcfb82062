use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::IrError;

/// A packet header field, either a basic field with a fixed width or a
/// synthetic bookkeeping field whose width is chosen per encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeaderField {
    DstIp,
    SrcIp,
    DstPort,
    SrcPort,
    IpProtocol,
    IcmpType,
    IcmpCode,
    Dscp,
    Ecn,
    FragmentOffset,
    PacketLength,
    State,
    TcpCwr,
    TcpEce,
    TcpUrg,
    TcpAck,
    TcpPsh,
    TcpRst,
    TcpSyn,
    TcpFin,
    /// Source IP before any NAT was applied.
    OrigSrcIp,
    /// Index of the interface the packet entered on; 0 when the packet was
    /// originated by the device itself.
    SrcInterface,
    /// Index of the ingress option the packet was injected at.
    IngressLocation,
    /// One bit recording whether the packet left the named node.
    Transit(String),
}

/// Basic fields in their canonical encoding order.
pub const BASIC_FIELDS: [HeaderField; 21] = [
    HeaderField::DstIp,
    HeaderField::SrcIp,
    HeaderField::DstPort,
    HeaderField::SrcPort,
    HeaderField::IpProtocol,
    HeaderField::IcmpType,
    HeaderField::IcmpCode,
    HeaderField::Dscp,
    HeaderField::Ecn,
    HeaderField::FragmentOffset,
    HeaderField::PacketLength,
    HeaderField::State,
    HeaderField::TcpCwr,
    HeaderField::TcpEce,
    HeaderField::TcpUrg,
    HeaderField::TcpAck,
    HeaderField::TcpPsh,
    HeaderField::TcpRst,
    HeaderField::TcpSyn,
    HeaderField::TcpFin,
    HeaderField::OrigSrcIp,
];

/// TCP flag fields in the order flags appear in a `TcpFlagsMatch`.
pub const TCP_FLAG_FIELDS: [HeaderField; 8] = [
    HeaderField::TcpCwr,
    HeaderField::TcpEce,
    HeaderField::TcpUrg,
    HeaderField::TcpAck,
    HeaderField::TcpPsh,
    HeaderField::TcpRst,
    HeaderField::TcpSyn,
    HeaderField::TcpFin,
];

impl HeaderField {
    /// Width of a basic field. Synthetic fields return `None`; their width
    /// lives in the `FieldLayout` of the encoding.
    pub fn basic_width(&self) -> Option<u32> {
        let width = match self {
            HeaderField::DstIp | HeaderField::SrcIp | HeaderField::OrigSrcIp => 32,
            HeaderField::DstPort | HeaderField::SrcPort | HeaderField::PacketLength => 16,
            HeaderField::IpProtocol | HeaderField::IcmpType | HeaderField::IcmpCode => 8,
            HeaderField::Dscp => 6,
            HeaderField::Ecn | HeaderField::State => 2,
            HeaderField::FragmentOffset => 13,
            HeaderField::TcpCwr
            | HeaderField::TcpEce
            | HeaderField::TcpUrg
            | HeaderField::TcpAck
            | HeaderField::TcpPsh
            | HeaderField::TcpRst
            | HeaderField::TcpSyn
            | HeaderField::TcpFin => 1,
            HeaderField::SrcInterface | HeaderField::IngressLocation | HeaderField::Transit(_) => {
                return None
            }
        };
        Some(width)
    }

    pub fn is_synthetic(&self) -> bool {
        self.basic_width().is_none()
    }

    pub fn is_ip(&self) -> bool {
        matches!(
            self,
            HeaderField::DstIp | HeaderField::SrcIp | HeaderField::OrigSrcIp
        )
    }

    /// Canonical upper-snake name used for solver variables.
    pub fn name(&self) -> String {
        let base = match self {
            HeaderField::DstIp => "DST_IP",
            HeaderField::SrcIp => "SRC_IP",
            HeaderField::DstPort => "DST_PORT",
            HeaderField::SrcPort => "SRC_PORT",
            HeaderField::IpProtocol => "IP_PROTOCOL",
            HeaderField::IcmpType => "ICMP_TYPE",
            HeaderField::IcmpCode => "ICMP_CODE",
            HeaderField::Dscp => "DSCP",
            HeaderField::Ecn => "ECN",
            HeaderField::FragmentOffset => "FRAGMENT_OFFSET",
            HeaderField::PacketLength => "PACKET_LENGTH",
            HeaderField::State => "STATE",
            HeaderField::TcpCwr => "TCP_CWR",
            HeaderField::TcpEce => "TCP_ECE",
            HeaderField::TcpUrg => "TCP_URG",
            HeaderField::TcpAck => "TCP_ACK",
            HeaderField::TcpPsh => "TCP_PSH",
            HeaderField::TcpRst => "TCP_RST",
            HeaderField::TcpSyn => "TCP_SYN",
            HeaderField::TcpFin => "TCP_FIN",
            HeaderField::OrigSrcIp => "ORIG_SRC_IP",
            HeaderField::SrcInterface => "SRC_INTERFACE",
            HeaderField::IngressLocation => "INGRESS_LOCATION",
            HeaderField::Transit(node) => return format!("TRANSIT_{}", escape_name_part(node)),
        };
        base.to_string()
    }
}

impl fmt::Display for HeaderField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Percent-escape the characters solver variable names use as separators
/// or quote delimiters. Distinct inputs give distinct outputs.
pub(crate) fn escape_name_part(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '%' | '|' | '\\' | ':' | '!' => out.push_str(&format!("%{:02X}", c as u32)),
            other => out.push(other),
        }
    }
    out
}

/// Minimal number of bits able to index `count` distinct values, at least 1.
pub fn bits_for(count: u64) -> u32 {
    if count <= 2 {
        1
    } else {
        64 - (count - 1).leading_zeros()
    }
}

/// The ordered set of fields an encoding uses, with their widths.
///
/// Basic fields always come first in `BASIC_FIELDS` order; synthetic fields
/// follow in allocation order. Every relation takes its arguments in this
/// order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    widths: IndexMap<HeaderField, u32>,
}

impl Default for FieldLayout {
    fn default() -> Self {
        Self::basic()
    }
}

impl FieldLayout {
    pub fn basic() -> Self {
        let widths = BASIC_FIELDS
            .iter()
            .filter_map(|f| f.basic_width().map(|w| (f.clone(), w)))
            .collect();
        Self { widths }
    }

    /// A layout with no fields, for programs over a hand-picked header.
    pub fn empty() -> Self {
        Self {
            widths: IndexMap::new(),
        }
    }

    /// Allocate (or widen) a synthetic field.
    pub fn allocate(&mut self, field: HeaderField, width: u32) {
        let entry = self.widths.entry(field).or_insert(width);
        *entry = (*entry).max(width);
    }

    pub fn with_field(mut self, field: HeaderField, width: u32) -> Self {
        self.allocate(field, width);
        self
    }

    pub fn width(&self, field: &HeaderField) -> Option<u32> {
        self.widths.get(field).copied()
    }

    pub fn require_width(&self, field: &HeaderField) -> Result<u32, IrError> {
        self.width(field).ok_or_else(|| IrError::FieldWidth {
            field: field.name(),
        })
    }

    pub fn contains(&self, field: &HeaderField) -> bool {
        self.widths.contains_key(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&HeaderField, u32)> {
        self.widths.iter().map(|(f, w)| (f, *w))
    }

    pub fn len(&self) -> usize {
        self.widths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widths.is_empty()
    }

    /// Merge another layout into this one, keeping this layout's order for
    /// shared fields.
    pub fn merge(&mut self, other: &FieldLayout) {
        for (field, width) in other.fields() {
            self.allocate(field.clone(), width);
        }
    }
}
