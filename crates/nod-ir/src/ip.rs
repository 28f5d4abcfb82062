use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::IrError;

/// An IPv4 address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ip(pub u32);

impl Ip {
    pub const ZERO: Ip = Ip(0);
    pub const MAX: Ip = Ip(u32::MAX);

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn as_u64(self) -> u64 {
        u64::from(self.0)
    }
}

impl FromStr for Ip {
    type Err = IrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 4 {
            return Err(IrError::ParseIp(s.to_string()));
        }
        let mut value = 0u32;
        for part in parts {
            let octet: u8 = part.parse().map_err(|_| IrError::ParseIp(s.to_string()))?;
            value = (value << 8) | u32::from(octet);
        }
        Ok(Ip(value))
    }
}

impl fmt::Display for Ip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{}.{}.{}.{}",
            v >> 24,
            (v >> 16) & 0xff,
            (v >> 8) & 0xff,
            v & 0xff
        )
    }
}

impl TryFrom<String> for Ip {
    type Error = IrError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ip> for String {
    fn from(ip: Ip) -> Self {
        ip.to_string()
    }
}

fn prefix_mask(len: u8) -> u32 {
    if len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(len.min(32)))
    }
}

/// An IPv4 prefix, always stored in canonical (network address) form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Prefix {
    ip: Ip,
    len: u8,
}

impl Prefix {
    pub const ZERO: Prefix = Prefix { ip: Ip::ZERO, len: 0 };

    pub fn new(ip: Ip, len: u8) -> Self {
        let len = len.min(32);
        Self {
            ip: Ip(ip.0 & prefix_mask(len)),
            len,
        }
    }

    pub fn host(ip: Ip) -> Self {
        Self::new(ip, 32)
    }

    pub fn network(&self) -> Ip {
        self.ip
    }

    pub fn len(&self) -> u8 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn mask(&self) -> u32 {
        prefix_mask(self.len)
    }

    pub fn first(&self) -> Ip {
        self.ip
    }

    pub fn last(&self) -> Ip {
        Ip(self.ip.0 | !self.mask())
    }

    pub fn contains_ip(&self, ip: Ip) -> bool {
        ip.0 & self.mask() == self.ip.0
    }

    /// True when every address of `other` is inside this prefix.
    pub fn contains_prefix(&self, other: &Prefix) -> bool {
        other.len >= self.len && self.contains_ip(other.ip)
    }
}

impl FromStr for Prefix {
    type Err = IrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, len) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| IrError::ParseIp(s.to_string()))?;
        let len: u8 = len.parse().map_err(|_| IrError::ParseIp(s.to_string()))?;
        if len > 32 {
            return Err(IrError::ParseIp(s.to_string()));
        }
        Ok(Prefix::new(ip.parse()?, len))
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.len)
    }
}

impl TryFrom<String> for Prefix {
    type Error = IrError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Prefix> for String {
    fn from(p: Prefix) -> Self {
        p.to_string()
    }
}

/// An IP address with a wildcard mask: bits set in `wildcard` are "don't care".
///
/// Written as `a.b.c.d/len` for prefixes, `a.b.c.d:w.x.y.z` for arbitrary
/// wildcards, or a bare address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpWildcard {
    ip: Ip,
    wildcard: u32,
}

impl IpWildcard {
    pub const ANY: IpWildcard = IpWildcard {
        ip: Ip::ZERO,
        wildcard: u32::MAX,
    };

    pub fn new(ip: Ip, wildcard: u32) -> Self {
        Self {
            ip: Ip(ip.0 & !wildcard),
            wildcard,
        }
    }

    pub fn ip(&self) -> Ip {
        self.ip
    }

    pub fn wildcard(&self) -> u32 {
        self.wildcard
    }

    /// Bits the wildcard cares about.
    pub fn care_mask(&self) -> u32 {
        !self.wildcard
    }

    /// Prefix length when the wildcard is of the form `2^k - 1`.
    pub fn prefix_len(&self) -> Option<u8> {
        let care = self.care_mask();
        if care.leading_ones() + care.trailing_zeros() == 32 || care == 0 {
            Some(care.leading_ones() as u8)
        } else {
            None
        }
    }

    pub fn to_prefix(&self) -> Option<Prefix> {
        self.prefix_len().map(|len| Prefix::new(self.ip, len))
    }

    pub fn contains_ip(&self, ip: Ip) -> bool {
        ip.0 & self.care_mask() == self.ip.0
    }

    /// True when every address matched by `other` is matched by `self`.
    pub fn superset_of(&self, other: &IpWildcard) -> bool {
        // self may not care about a bit other ignores
        self.care_mask() & other.wildcard == 0
            && (other.ip.0 & self.care_mask()) == self.ip.0
    }

    pub fn intersects(&self, other: &IpWildcard) -> bool {
        let both = self.care_mask() & other.care_mask();
        (self.ip.0 ^ other.ip.0) & both == 0
    }
}

impl From<Prefix> for IpWildcard {
    fn from(p: Prefix) -> Self {
        IpWildcard::new(p.network(), !p.mask())
    }
}

impl From<Ip> for IpWildcard {
    fn from(ip: Ip) -> Self {
        IpWildcard::new(ip, 0)
    }
}

impl FromStr for IpWildcard {
    type Err = IrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains('/') {
            return Ok(s.parse::<Prefix>()?.into());
        }
        if let Some((ip, wildcard)) = s.split_once(':') {
            let wildcard: Ip = wildcard.parse()?;
            return Ok(IpWildcard::new(ip.parse()?, wildcard.0));
        }
        Ok(s.parse::<Ip>()?.into())
    }
}

impl fmt::Display for IpWildcard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_prefix() {
            Some(p) if p.len() == 32 => write!(f, "{}", p.network()),
            Some(p) => write!(f, "{p}"),
            None => write!(f, "{}:{}", self.ip, Ip(self.wildcard)),
        }
    }
}

impl TryFrom<String> for IpWildcard {
    type Error = IrError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<IpWildcard> for String {
    fn from(w: IpWildcard) -> Self {
        w.to_string()
    }
}

/// An address assigned to an interface, e.g. `10.0.0.1/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceAddress {
    pub ip: Ip,
    pub prefix_len: u8,
}

impl InterfaceAddress {
    pub fn prefix(&self) -> Prefix {
        Prefix::new(self.ip, self.prefix_len)
    }
}

impl FromStr for InterfaceAddress {
    type Err = IrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ip, len) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| IrError::ParseIp(s.to_string()))?;
        let prefix_len: u8 = len.parse().map_err(|_| IrError::ParseIp(s.to_string()))?;
        if prefix_len > 32 {
            return Err(IrError::ParseIp(s.to_string()));
        }
        Ok(Self {
            ip: ip.parse()?,
            prefix_len,
        })
    }
}

impl fmt::Display for InterfaceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.prefix_len)
    }
}

impl TryFrom<String> for InterfaceAddress {
    type Error = IrError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InterfaceAddress> for String {
    fn from(a: InterfaceAddress) -> Self {
        a.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn ip_parse_and_display() -> TestResult {
        let ip: Ip = "10.1.2.3".parse()?;
        assert_eq!(ip.0, 0x0a01_0203);
        assert_eq!(ip.to_string(), "10.1.2.3");
        assert!("10.1.2".parse::<Ip>().is_err());
        assert!("10.1.2.256".parse::<Ip>().is_err());
        Ok(())
    }

    #[test]
    fn prefix_is_canonicalized() -> TestResult {
        let p: Prefix = "10.1.2.3/24".parse()?;
        assert_eq!(p.to_string(), "10.1.2.0/24");
        assert!(p.contains_ip("10.1.2.200".parse()?));
        assert!(!p.contains_ip("10.1.3.1".parse()?));
        assert_eq!(p.last().to_string(), "10.1.2.255");
        Ok(())
    }

    #[test]
    fn prefix_containment() -> TestResult {
        let wide: Prefix = "10.0.0.0/8".parse()?;
        let narrow: Prefix = "10.9.0.0/16".parse()?;
        assert!(wide.contains_prefix(&narrow));
        assert!(!narrow.contains_prefix(&wide));
        assert!(Prefix::ZERO.contains_prefix(&narrow));
        Ok(())
    }

    #[test]
    fn wildcard_forms() -> TestResult {
        let w: IpWildcard = "1.2.3.0/24".parse()?;
        assert_eq!(w.prefix_len(), Some(24));
        let odd: IpWildcard = "1.2.0.4:0.0.255.0".parse()?;
        assert_eq!(odd.prefix_len(), None);
        assert!(odd.contains_ip("1.2.77.4".parse()?));
        assert!(!odd.contains_ip("1.2.77.5".parse()?));
        assert_eq!(odd.to_string(), "1.2.0.4:0.0.255.0");
        assert_eq!(IpWildcard::ANY.prefix_len(), Some(0));
        Ok(())
    }

    #[test]
    fn wildcard_superset_and_intersection() -> TestResult {
        let wide: IpWildcard = "1.0.0.0/8".parse()?;
        let narrow: IpWildcard = "1.2.3.0/24".parse()?;
        let other: IpWildcard = "2.0.0.0/8".parse()?;
        assert!(wide.superset_of(&narrow));
        assert!(!narrow.superset_of(&wide));
        assert!(wide.intersects(&narrow));
        assert!(!wide.intersects(&other));
        assert!(IpWildcard::ANY.superset_of(&other));
        Ok(())
    }

    #[test]
    fn serde_round_trips_as_strings() -> TestResult {
        let addr: InterfaceAddress = serde_json::from_str("\"10.0.0.1/30\"")?;
        assert_eq!(addr.prefix().to_string(), "10.0.0.0/30");
        assert_eq!(serde_json::to_string(&addr)?, "\"10.0.0.1/30\"");
        Ok(())
    }
}
