use nod_ir::acl::Acl;
use nod_ir::expr::BoolExpr;
use nod_ir::program::Rule;
use nod_ir::simplify::simplify;
use nod_ir::state::{AclSite, StateExpr};
use tracing::warn;

use super::{QueryProgram, QuerySynthesizer};
use crate::error::EncoderError;
use crate::input::SynthesizerInput;

fn resolved_acl<'a>(
    input: &'a SynthesizerInput,
    node: &str,
    acl: &str,
) -> Result<&'a Acl, EncoderError> {
    input.node_config(node)?;
    input
        .acl(node, acl)
        .ok_or_else(|| nod_ir::IrError::UnknownAcl(format!("{node}:{acl}")).into())
}

/// Which lines of an ACL are the first match of some packet. Query `i`
/// is derivable iff line `i` is reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclReachability {
    pub node: String,
    pub acl: String,
}

impl QuerySynthesizer for AclReachability {
    fn describe(&self) -> String {
        format!("line reachability of {}:{}", self.node, self.acl)
    }

    fn synthesize(&self, input: &SynthesizerInput) -> Result<QueryProgram, EncoderError> {
        let acl = resolved_acl(input, &self.node, &self.acl)?;
        if acl.lines.is_empty() {
            warn!(node = %self.node, acl = %self.acl, "NoD: ACL has no lines to check");
        }
        let mut rules = Vec::with_capacity(acl.lines.len());
        let mut queries = Vec::with_capacity(acl.lines.len());
        for i in 0..acl.lines.len() {
            rules.push(
                Rule::new(StateExpr::NumberedQuery(i))
                    .when(StateExpr::AclLineMatch(
                        self.node.clone(),
                        self.acl.clone(),
                        AclSite::Standalone,
                        i,
                    ))
                    .family("Query"),
            );
            queries.push(StateExpr::NumberedQuery(i));
        }
        Ok(QueryProgram {
            rules,
            queries,
            ..Default::default()
        })
    }
}

/// For an unreachable line `u`, query `k` asks whether some packet matches
/// `u` but not the `k`-th earlier reachable line. The first underivable
/// query names the earliest line that covers `u` on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EarliestMoreGeneralReachableLine {
    pub node: String,
    pub acl: String,
    pub unreachable_line: usize,
    pub earlier_reachable_lines: Vec<usize>,
}

impl QuerySynthesizer for EarliestMoreGeneralReachableLine {
    fn describe(&self) -> String {
        format!(
            "earliest line of {}:{} covering line {}",
            self.node, self.acl, self.unreachable_line
        )
    }

    fn synthesize(&self, input: &SynthesizerInput) -> Result<QueryProgram, EncoderError> {
        let acl = resolved_acl(input, &self.node, &self.acl)?;
        let condition = |line: usize| -> Result<BoolExpr, EncoderError> {
            acl.lines
                .get(line)
                .map(|l| l.condition.clone())
                .ok_or_else(|| {
                    EncoderError::Invalid(format!(
                        "{}:{} has no line {line}",
                        self.node, self.acl
                    ))
                })
        };
        let unreachable = condition(self.unreachable_line)?;
        let mut rules = Vec::with_capacity(self.earlier_reachable_lines.len());
        let mut queries = Vec::with_capacity(self.earlier_reachable_lines.len());
        for (k, &earlier) in self.earlier_reachable_lines.iter().enumerate() {
            if earlier >= self.unreachable_line {
                return Err(EncoderError::Invalid(format!(
                    "line {earlier} does not precede line {}",
                    self.unreachable_line
                )));
            }
            let guard = simplify(&BoolExpr::and(vec![
                unreachable.clone(),
                condition(earlier)?.not(),
            ]));
            rules.push(Rule::axiom(StateExpr::NumberedQuery(k), guard).family("Query"));
            queries.push(StateExpr::NumberedQuery(k));
        }
        Ok(QueryProgram {
            rules,
            queries,
            ..Default::default()
        })
    }
}
