use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::IrError;
use crate::ip::{Ip, IpWildcard, Prefix};

/// An inclusive range of integer values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubRange {
    pub start: u32,
    pub end: u32,
}

impl SubRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn single(value: u32) -> Self {
        Self::new(value, value)
    }

    pub fn contains(&self, value: u32) -> bool {
        self.start <= value && value <= self.end
    }

    pub fn is_subset_of(&self, other: &SubRange) -> bool {
        other.start <= self.start && self.end <= other.end
    }

    pub fn intersects(&self, other: &SubRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn as_pair(&self) -> (u64, u64) {
        (u64::from(self.start), u64::from(self.end))
    }
}

impl fmt::Display for SubRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// IP protocol number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IpProtocol(pub u8);

impl IpProtocol {
    pub const ICMP: IpProtocol = IpProtocol(1);
    pub const TCP: IpProtocol = IpProtocol(6);
    pub const UDP: IpProtocol = IpProtocol(17);

    pub fn number(self) -> u8 {
        self.0
    }

    pub fn has_ports(self) -> bool {
        self == IpProtocol::TCP || self == IpProtocol::UDP
    }
}

/// Named application protocols: an IP protocol plus an optional well-known port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Dns,
    Http,
    Https,
    Ntp,
    Snmp,
    Ssh,
    Telnet,
}

impl Protocol {
    pub fn ip_protocol(self) -> IpProtocol {
        match self {
            Protocol::Dns | Protocol::Ntp | Protocol::Snmp => IpProtocol::UDP,
            Protocol::Http | Protocol::Https | Protocol::Ssh | Protocol::Telnet => IpProtocol::TCP,
        }
    }

    pub fn port(self) -> Option<u16> {
        Some(match self {
            Protocol::Dns => 53,
            Protocol::Http => 80,
            Protocol::Https => 443,
            Protocol::Ntp => 123,
            Protocol::Snmp => 161,
            Protocol::Ssh => 22,
            Protocol::Telnet => 23,
        })
    }
}

/// Connection-tracking state of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowState {
    New,
    Established,
    Related,
}

impl FlowState {
    pub fn number(self) -> u64 {
        match self {
            FlowState::New => 0,
            FlowState::Established => 1,
            FlowState::Related => 2,
        }
    }
}

/// A pattern over TCP flag bits. `None` means the bit is not constrained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpFlagsMatch {
    pub cwr: Option<bool>,
    pub ece: Option<bool>,
    pub urg: Option<bool>,
    pub ack: Option<bool>,
    pub psh: Option<bool>,
    pub rst: Option<bool>,
    pub syn: Option<bool>,
    pub fin: Option<bool>,
}

impl TcpFlagsMatch {
    /// Flag constraints in `TCP_FLAG_FIELDS` order.
    pub fn bits(&self) -> [Option<bool>; 8] {
        [
            self.cwr, self.ece, self.urg, self.ack, self.psh, self.rst, self.syn, self.fin,
        ]
    }
}

/// A set of IPv4 addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpSpace {
    Universe,
    Empty,
    Ip(Ip),
    Prefix(Prefix),
    Wildcards {
        #[serde(default)]
        whitelist: Vec<IpWildcard>,
        #[serde(default)]
        blacklist: Vec<IpWildcard>,
    },
    Union(Vec<IpSpace>),
    Complement(Box<IpSpace>),
}

impl IpSpace {
    pub fn wildcards(whitelist: Vec<IpWildcard>) -> Self {
        IpSpace::Wildcards {
            whitelist,
            blacklist: Vec::new(),
        }
    }

    pub fn prefixes(prefixes: impl IntoIterator<Item = Prefix>) -> Self {
        IpSpace::wildcards(prefixes.into_iter().map(IpWildcard::from).collect())
    }

    pub fn ips(ips: impl IntoIterator<Item = Ip>) -> Self {
        IpSpace::wildcards(ips.into_iter().map(IpWildcard::from).collect())
    }

    pub fn complement(self) -> Self {
        IpSpace::Complement(Box::new(self))
    }

    pub fn contains(&self, ip: Ip) -> bool {
        match self {
            IpSpace::Universe => true,
            IpSpace::Empty => false,
            IpSpace::Ip(single) => *single == ip,
            IpSpace::Prefix(p) => p.contains_ip(ip),
            IpSpace::Wildcards {
                whitelist,
                blacklist,
            } => {
                whitelist.iter().any(|w| w.contains_ip(ip))
                    && !blacklist.iter().any(|w| w.contains_ip(ip))
            }
            IpSpace::Union(spaces) => spaces.iter().any(|s| s.contains(ip)),
            IpSpace::Complement(inner) => !inner.contains(ip),
        }
    }

    /// The space as a plain list of wildcards, when it has no blacklist or
    /// complement.
    pub fn as_whitelist(&self) -> Option<Vec<IpWildcard>> {
        match self {
            IpSpace::Universe => Some(vec![IpWildcard::ANY]),
            IpSpace::Empty => Some(Vec::new()),
            IpSpace::Ip(ip) => Some(vec![IpWildcard::from(*ip)]),
            IpSpace::Prefix(p) => Some(vec![IpWildcard::from(*p)]),
            IpSpace::Wildcards {
                whitelist,
                blacklist,
            } if blacklist.is_empty() => Some(whitelist.clone()),
            IpSpace::Wildcards { .. } | IpSpace::Complement(_) => None,
            IpSpace::Union(spaces) => {
                let mut out = Vec::new();
                for space in spaces {
                    out.extend(space.as_whitelist()?);
                }
                Some(out)
            }
        }
    }
}

#[allow(clippy::ptr_arg)]
fn is_empty<T>(v: &Vec<T>) -> bool {
    v.is_empty()
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// A conjunction of per-field packet constraints. Empty sets and `None`
/// spaces are unconstrained; every `not_*` set excludes its members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderSpace {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_ips: Option<IpSpace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_src_ips: Option<IpSpace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dst_ips: Option<IpSpace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_dst_ips: Option<IpSpace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub src_or_dst_ips: Option<IpSpace>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_src_or_dst_ips: Option<IpSpace>,

    #[serde(skip_serializing_if = "is_empty")]
    pub src_ports: Vec<SubRange>,
    #[serde(skip_serializing_if = "is_empty")]
    pub not_src_ports: Vec<SubRange>,
    #[serde(skip_serializing_if = "is_empty")]
    pub dst_ports: Vec<SubRange>,
    #[serde(skip_serializing_if = "is_empty")]
    pub not_dst_ports: Vec<SubRange>,
    #[serde(skip_serializing_if = "is_empty")]
    pub src_or_dst_ports: Vec<SubRange>,
    #[serde(skip_serializing_if = "is_empty")]
    pub not_src_or_dst_ports: Vec<SubRange>,

    #[serde(skip_serializing_if = "is_empty")]
    pub src_protocols: Vec<Protocol>,
    #[serde(skip_serializing_if = "is_empty")]
    pub not_src_protocols: Vec<Protocol>,
    #[serde(skip_serializing_if = "is_empty")]
    pub dst_protocols: Vec<Protocol>,
    #[serde(skip_serializing_if = "is_empty")]
    pub not_dst_protocols: Vec<Protocol>,
    #[serde(skip_serializing_if = "is_empty")]
    pub src_or_dst_protocols: Vec<Protocol>,
    #[serde(skip_serializing_if = "is_empty")]
    pub not_src_or_dst_protocols: Vec<Protocol>,

    #[serde(skip_serializing_if = "is_empty")]
    pub ip_protocols: Vec<IpProtocol>,
    #[serde(skip_serializing_if = "is_empty")]
    pub not_ip_protocols: Vec<IpProtocol>,

    #[serde(skip_serializing_if = "is_empty")]
    pub dscps: Vec<u8>,
    #[serde(skip_serializing_if = "is_empty")]
    pub not_dscps: Vec<u8>,
    #[serde(skip_serializing_if = "is_empty")]
    pub ecns: Vec<u8>,
    #[serde(skip_serializing_if = "is_empty")]
    pub not_ecns: Vec<u8>,
    #[serde(skip_serializing_if = "is_empty")]
    pub fragment_offsets: Vec<SubRange>,
    #[serde(skip_serializing_if = "is_empty")]
    pub not_fragment_offsets: Vec<SubRange>,
    #[serde(skip_serializing_if = "is_empty")]
    pub icmp_types: Vec<SubRange>,
    #[serde(skip_serializing_if = "is_empty")]
    pub not_icmp_types: Vec<SubRange>,
    #[serde(skip_serializing_if = "is_empty")]
    pub icmp_codes: Vec<SubRange>,
    #[serde(skip_serializing_if = "is_empty")]
    pub not_icmp_codes: Vec<SubRange>,
    #[serde(skip_serializing_if = "is_empty")]
    pub packet_lengths: Vec<SubRange>,
    #[serde(skip_serializing_if = "is_empty")]
    pub not_packet_lengths: Vec<SubRange>,

    #[serde(skip_serializing_if = "is_empty")]
    pub states: Vec<FlowState>,
    #[serde(skip_serializing_if = "is_empty")]
    pub tcp_flags: Vec<TcpFlagsMatch>,

    #[serde(skip_serializing_if = "is_false")]
    pub negate: bool,
}

impl HeaderSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_src_ips(mut self, space: IpSpace) -> Self {
        self.src_ips = Some(space);
        self
    }

    pub fn with_dst_ips(mut self, space: IpSpace) -> Self {
        self.dst_ips = Some(space);
        self
    }

    pub fn with_not_dst_ips(mut self, space: IpSpace) -> Self {
        self.not_dst_ips = Some(space);
        self
    }

    pub fn with_src_ports(mut self, ranges: Vec<SubRange>) -> Self {
        self.src_ports = ranges;
        self
    }

    pub fn with_dst_ports(mut self, ranges: Vec<SubRange>) -> Self {
        self.dst_ports = ranges;
        self
    }

    pub fn with_ip_protocols(mut self, protocols: Vec<IpProtocol>) -> Self {
        self.ip_protocols = protocols;
        self
    }

    pub fn negated(mut self) -> Self {
        self.negate = !self.negate;
        self
    }

    /// True when no field is constrained. The `negate` flag is ignored.
    pub fn is_unconstrained(&self) -> bool {
        let mut positive = self.clone();
        positive.negate = false;
        positive == HeaderSpace::default()
    }

    /// Reject ranges and values that cannot be encoded faithfully.
    pub fn validate(&self) -> Result<(), IrError> {
        let range_sets: [(&str, &[SubRange], u32); 14] = [
            ("src_ports", &self.src_ports, 16),
            ("not_src_ports", &self.not_src_ports, 16),
            ("dst_ports", &self.dst_ports, 16),
            ("not_dst_ports", &self.not_dst_ports, 16),
            ("src_or_dst_ports", &self.src_or_dst_ports, 16),
            ("not_src_or_dst_ports", &self.not_src_or_dst_ports, 16),
            ("fragment_offsets", &self.fragment_offsets, 13),
            ("not_fragment_offsets", &self.not_fragment_offsets, 13),
            ("icmp_types", &self.icmp_types, 8),
            ("not_icmp_types", &self.not_icmp_types, 8),
            ("icmp_codes", &self.icmp_codes, 8),
            ("not_icmp_codes", &self.not_icmp_codes, 8),
            ("packet_lengths", &self.packet_lengths, 16),
            ("not_packet_lengths", &self.not_packet_lengths, 16),
        ];
        for (name, ranges, width) in range_sets {
            let max = (1u64 << width) - 1;
            for r in ranges {
                if r.start > r.end {
                    return Err(IrError::InvalidHeaderSpace(format!(
                        "{name}: range {}-{} is reversed",
                        r.start, r.end
                    )));
                }
                if u64::from(r.end) > max {
                    return Err(IrError::InvalidHeaderSpace(format!(
                        "{name}: {} exceeds the {width}-bit field",
                        r.end
                    )));
                }
            }
        }
        for (name, values, width) in [
            ("dscps", &self.dscps, 6u32),
            ("not_dscps", &self.not_dscps, 6),
            ("ecns", &self.ecns, 2),
            ("not_ecns", &self.not_ecns, 2),
        ] {
            if let Some(v) = values.iter().find(|v| u32::from(**v) >= (1 << width)) {
                return Err(IrError::InvalidHeaderSpace(format!(
                    "{name}: {v} exceeds the {width}-bit field"
                )));
            }
        }
        let has_ports = !self.src_ports.is_empty()
            || !self.dst_ports.is_empty()
            || !self.src_or_dst_ports.is_empty();
        if has_ports
            && !self.ip_protocols.is_empty()
            && self.ip_protocols.iter().all(|p| !p.has_ports())
        {
            return Err(IrError::InvalidHeaderSpace(
                "ports constrained but no listed IP protocol carries ports".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn default_header_space_is_unconstrained() {
        assert!(HeaderSpace::default().is_unconstrained());
        assert!(HeaderSpace::default().negated().is_unconstrained());
        assert!(!HeaderSpace::new()
            .with_dst_ports(vec![SubRange::single(80)])
            .is_unconstrained());
    }

    #[test]
    fn reversed_range_is_rejected() {
        let hs = HeaderSpace::new().with_dst_ports(vec![SubRange::new(90, 80)]);
        assert!(matches!(hs.validate(), Err(IrError::InvalidHeaderSpace(_))));
    }

    #[test]
    fn ports_without_port_protocols_are_rejected() {
        let hs = HeaderSpace::new()
            .with_dst_ports(vec![SubRange::single(22)])
            .with_ip_protocols(vec![IpProtocol::ICMP]);
        assert!(hs.validate().is_err());
        let ok = HeaderSpace::new()
            .with_dst_ports(vec![SubRange::single(22)])
            .with_ip_protocols(vec![IpProtocol::ICMP, IpProtocol::TCP]);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn oversized_values_are_rejected() {
        let hs = HeaderSpace {
            icmp_types: vec![SubRange::new(0, 300)],
            ..HeaderSpace::default()
        };
        assert!(hs.validate().is_err());
        let hs = HeaderSpace {
            ecns: vec![4],
            ..HeaderSpace::default()
        };
        assert!(hs.validate().is_err());
    }

    #[test]
    fn ip_space_membership() -> TestResult {
        let space = IpSpace::Wildcards {
            whitelist: vec!["10.0.0.0/8".parse()?],
            blacklist: vec!["10.1.0.0/16".parse()?],
        };
        assert!(space.contains("10.2.0.1".parse()?));
        assert!(!space.contains("10.1.0.1".parse()?));
        assert!(space.clone().complement().contains("10.1.0.1".parse()?));
        assert!(space.as_whitelist().is_none());
        Ok(())
    }

    #[test]
    fn header_space_loads_from_json() -> TestResult {
        let hs: HeaderSpace = serde_json::from_str(
            r#"{"dst_ips": {"prefix": "10.0.0.0/24"}, "dst_ports": [{"start": 80, "end": 80}], "ip_protocols": [6]}"#,
        )?;
        assert_eq!(hs.ip_protocols, vec![IpProtocol::TCP]);
        assert_eq!(hs.dst_ips, Some(IpSpace::Prefix("10.0.0.0/24".parse()?)));
        Ok(())
    }
}
