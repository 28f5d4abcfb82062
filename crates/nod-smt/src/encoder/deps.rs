//! Relation dependency analysis: cone of influence, tracked fields and
//! recursive components.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use nod_ir::field::HeaderField;
use nod_ir::program::Program;
use nod_ir::state::StateExpr;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};

#[derive(Debug, Clone, Default)]
pub(crate) struct Dependencies {
    /// Relations backward-reachable from a query.
    pub cone: BTreeSet<StateExpr>,
    /// Indices of the rules deriving a relation in the cone, in program order.
    pub rules: Vec<usize>,
    /// Transformed fields whose value is determined where the relation holds.
    pub tracked: BTreeMap<StateExpr, BTreeSet<HeaderField>>,
    /// Component id of every relation that sits on a derivation cycle.
    pub recursive: HashMap<StateExpr, usize>,
}

impl Dependencies {
    pub fn tracks(&self, relation: &StateExpr, field: &HeaderField) -> bool {
        self.tracked
            .get(relation)
            .is_some_and(|fields| fields.contains(field))
    }

    pub fn tracked_fields(&self, relation: &StateExpr) -> impl Iterator<Item = &HeaderField> {
        self.tracked.get(relation).into_iter().flatten()
    }

    /// Whether a rank ordering must separate `body` from `head`.
    pub fn same_component(&self, body: &StateExpr, head: &StateExpr) -> bool {
        match (self.recursive.get(body), self.recursive.get(head)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}

pub(crate) fn analyze(program: &Program) -> Dependencies {
    let mut deriving: BTreeMap<&StateExpr, Vec<usize>> = BTreeMap::new();
    for (k, rule) in program.rules.iter().enumerate() {
        deriving.entry(&rule.postcondition).or_default().push(k);
    }

    let mut cone: BTreeSet<StateExpr> = BTreeSet::new();
    let mut stack: Vec<&StateExpr> = program.queries.iter().collect();
    while let Some(relation) = stack.pop() {
        if !cone.insert(relation.clone()) {
            continue;
        }
        for &k in deriving.get(relation).into_iter().flatten() {
            stack.extend(program.rules[k].body());
        }
    }
    let rules: Vec<usize> = (0..program.rules.len())
        .filter(|&k| cone.contains(&program.rules[k].postcondition))
        .collect();

    let transformed = program.transformed_fields();
    let tracked = tracked_fields(program, &cone, &rules, &transformed);
    let recursive = recursive_components(program, &cone, &rules);

    Dependencies {
        cone,
        rules,
        tracked,
        recursive,
    }
}

fn tracked_fields(
    program: &Program,
    cone: &BTreeSet<StateExpr>,
    rules: &[usize],
    transformed: &BTreeSet<HeaderField>,
) -> BTreeMap<StateExpr, BTreeSet<HeaderField>> {
    let mut tracked: BTreeMap<StateExpr, BTreeSet<HeaderField>> = cone
        .iter()
        .map(|r| {
            let initial = if r.is_query() {
                transformed.clone()
            } else {
                BTreeSet::new()
            };
            (r.clone(), initial)
        })
        .collect();
    if transformed.is_empty() {
        return tracked;
    }

    // Guard fields never change, so compute them once.
    let own: Vec<BTreeSet<HeaderField>> = rules
        .iter()
        .map(|&k| {
            let rule = &program.rules[k];
            rule.guard
                .fields()
                .into_iter()
                .filter(|f| transformed.contains(f))
                .chain(rule.transformed_fields())
                .collect()
        })
        .collect();

    let mut changed = true;
    while changed {
        changed = false;
        for (i, &k) in rules.iter().enumerate() {
            let rule = &program.rules[k];
            let mut fields = own[i].clone();
            for atom in rule.body() {
                if let Some(inherited) = tracked.get(atom) {
                    fields.extend(inherited.iter().cloned());
                }
            }
            if let Some(head) = tracked.get_mut(&rule.postcondition) {
                let before = head.len();
                head.extend(fields);
                changed |= head.len() != before;
            }
        }
    }
    tracked
}

fn recursive_components(
    program: &Program,
    cone: &BTreeSet<StateExpr>,
    rules: &[usize],
) -> HashMap<StateExpr, usize> {
    let mut graph: DiGraph<&StateExpr, ()> = DiGraph::new();
    let index: HashMap<&StateExpr, NodeIndex> =
        cone.iter().map(|r| (r, graph.add_node(r))).collect();
    let mut self_loops: BTreeSet<&StateExpr> = BTreeSet::new();
    for &k in rules {
        let rule = &program.rules[k];
        let head = index[&rule.postcondition];
        for atom in rule.body() {
            if atom == &rule.postcondition {
                self_loops.insert(atom);
            }
            if let Some(&body) = index.get(atom) {
                graph.add_edge(body, head, ());
            }
        }
    }

    let mut out = HashMap::new();
    for (id, scc) in tarjan_scc(&graph).into_iter().enumerate() {
        let cyclic = scc.len() > 1 || scc.iter().any(|n| self_loops.contains(graph[*n]));
        if cyclic {
            for node in scc {
                out.insert(graph[node].clone(), id);
            }
        }
    }
    out
}
