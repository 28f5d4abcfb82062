use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::IrError;
use crate::expr::{eval_with_stack, BoolExpr, Packet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineAction {
    Permit,
    Deny,
}

impl LineAction {
    pub fn is_permit(self) -> bool {
        self == LineAction::Permit
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclLine {
    pub action: LineAction,
    pub condition: BoolExpr,
    #[serde(default)]
    pub name: String,
}

impl AclLine {
    pub fn new(action: LineAction, condition: BoolExpr, name: impl Into<String>) -> Self {
        Self {
            action,
            condition,
            name: name.into(),
        }
    }

    pub fn permit(condition: BoolExpr, name: impl Into<String>) -> Self {
        Self::new(LineAction::Permit, condition, name)
    }

    pub fn deny(condition: BoolExpr, name: impl Into<String>) -> Self {
        Self::new(LineAction::Deny, condition, name)
    }
}

/// An ordered first-match filter. A packet matching no line is denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    #[serde(default)]
    pub name: String,
    pub lines: Vec<AclLine>,
}

impl Acl {
    pub fn new(name: impl Into<String>, lines: Vec<AclLine>) -> Self {
        Self {
            name: name.into(),
            lines,
        }
    }

    /// An ACL with a single line permitting everything.
    pub fn permit_all(name: impl Into<String>) -> Self {
        Self::new(name, vec![AclLine::permit(BoolExpr::True, "permit all")])
    }

    /// Index and action of the first line matching `packet`.
    pub fn first_match(
        &self,
        packet: &Packet,
        acls: &dyn AclResolver,
    ) -> Result<Option<(usize, LineAction)>, IrError> {
        let mut stack = vec![self.name.clone()];
        for (i, line) in self.lines.iter().enumerate() {
            if eval_with_stack(&line.condition, packet, acls, &mut stack)? {
                return Ok(Some((i, line.action)));
            }
        }
        Ok(None)
    }

    pub fn permits(&self, packet: &Packet, acls: &dyn AclResolver) -> Result<bool, IrError> {
        Ok(matches!(
            self.first_match(packet, acls)?,
            Some((_, LineAction::Permit))
        ))
    }

    /// The first-match permit formula: some permit line matches and no
    /// earlier line does.
    pub fn permit_expr(&self) -> BoolExpr {
        let mut disjuncts = Vec::new();
        for (i, line) in self.lines.iter().enumerate() {
            if !line.action.is_permit() {
                continue;
            }
            let mut conjuncts: Vec<BoolExpr> = self.lines[..i]
                .iter()
                .map(|earlier| earlier.condition.clone().not())
                .collect();
            conjuncts.push(line.condition.clone());
            disjuncts.push(BoolExpr::and(conjuncts));
        }
        BoolExpr::or(disjuncts)
    }
}

/// Name lookup for `PermittedByAcl` references.
pub trait AclResolver {
    fn resolve(&self, name: &str) -> Option<&Acl>;
}

impl AclResolver for BTreeMap<String, Acl> {
    fn resolve(&self, name: &str) -> Option<&Acl> {
        self.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::HeaderField;
    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn port_acl() -> Acl {
        Acl::new(
            "ports",
            vec![
                AclLine::deny(BoolExpr::field_eq(HeaderField::DstPort, 23), "no telnet"),
                AclLine::permit(BoolExpr::field_range(HeaderField::DstPort, 1, 1023), "low"),
            ],
        )
    }

    #[test]
    fn first_match_wins_and_default_denies() -> TestResult {
        let acl = port_acl();
        let acls = BTreeMap::new();
        let telnet = Packet::new().with(HeaderField::DstPort, 23);
        let ssh = Packet::new().with(HeaderField::DstPort, 22);
        let high = Packet::new().with(HeaderField::DstPort, 8080);
        assert_eq!(acl.first_match(&telnet, &acls)?, Some((0, LineAction::Deny)));
        assert_eq!(acl.first_match(&ssh, &acls)?, Some((1, LineAction::Permit)));
        assert_eq!(acl.first_match(&high, &acls)?, None);
        assert!(!acl.permits(&high, &acls)?);
        Ok(())
    }

    #[test]
    fn permit_expr_agrees_with_first_match() -> TestResult {
        let acl = port_acl();
        let acls = BTreeMap::new();
        let expr = acl.permit_expr();
        for port in [0u64, 22, 23, 80, 1023, 1024, 65535] {
            let p = Packet::new().with(HeaderField::DstPort, port);
            assert_eq!(expr.eval(&p, &acls)?, acl.permits(&p, &acls)?, "port {port}");
        }
        Ok(())
    }

    #[test]
    fn empty_acl_denies_everything() -> TestResult {
        let acl = Acl::new("empty", Vec::new());
        assert!(!acl.permits(&Packet::new(), &BTreeMap::new())?);
        assert_eq!(acl.permit_expr(), BoolExpr::Or(Vec::new()));
        Ok(())
    }

    #[test]
    fn acl_loads_from_json() -> TestResult {
        let acl: Acl = serde_json::from_str(
            r#"{"name": "a", "lines": [{"action": "permit", "condition": {"eq": [{"var": "DST_PORT"}, {"literal": 80}]}}]}"#,
        )?;
        assert_eq!(acl.lines.len(), 1);
        assert_eq!(acl.lines[0].condition, BoolExpr::field_eq(HeaderField::DstPort, 80));
        Ok(())
    }
}
