//! Textual Horn-clause rendering of a program, in the `declare-var` /
//! `declare-rel` / `rule` / `query` dialect of fixedpoint engines.

use std::fmt::Write as _;

use nod_ir::field::HeaderField;
use nod_ir::program::{Program, Rule};
use nod_ir::state::StateExpr;
use sha2::{Digest, Sha256};

use crate::backends::smtlib_printer::{sort_to_smtlib, symbol, to_smtlib};
use crate::error::SmtError;
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;
use crate::translate::{range_term, translate};

const NEW_PREFIX: &str = "new_";

fn atom(relation: &StateExpr, args: &[String]) -> String {
    let name = symbol(&relation.relation_name());
    if args.is_empty() {
        name
    } else {
        format!("({name} {})", args.join(" "))
    }
}

/// Render a program. Each statement is on its own line; rules are preceded
/// by a comment naming their family.
pub fn render_datalog(program: &Program) -> Result<String, SmtError> {
    let layout = &program.layout;
    let transformed = program.transformed_fields();
    let mut out = String::new();

    for (field, width) in layout.fields() {
        let sort = sort_to_smtlib(&SmtSort::BitVec(width));
        let _ = writeln!(out, "(declare-var {} {sort})", symbol(&field.name()));
    }
    for (field, width) in layout.fields().filter(|(f, _)| transformed.contains(*f)) {
        let sort = sort_to_smtlib(&SmtSort::BitVec(width));
        let name = format!("{NEW_PREFIX}{}", field.name());
        let _ = writeln!(out, "(declare-var {} {sort})", symbol(&name));
    }

    let arg_sorts: Vec<String> = layout
        .fields()
        .map(|(_, width)| sort_to_smtlib(&SmtSort::BitVec(width)))
        .collect();
    for relation in program.relations() {
        let _ = writeln!(
            out,
            "(declare-rel {} ({}))",
            symbol(&relation.relation_name()),
            arg_sorts.join(" ")
        );
    }

    for rule in &program.rules {
        let _ = writeln!(out, "; {}", rule.family);
        let _ = writeln!(out, "{}", render_rule(program, rule)?);
    }

    for query in &program.queries {
        let _ = writeln!(out, "(query {})", symbol(&query.relation_name()));
    }
    Ok(out)
}

fn render_rule(program: &Program, rule: &Rule) -> Result<String, SmtError> {
    let layout = &program.layout;
    let args = |post: bool| -> Vec<String> {
        layout
            .fields()
            .map(|(field, _)| {
                let name = if post && rule.transforms_field(field) {
                    format!("{NEW_PREFIX}{}", field.name())
                } else {
                    field.name()
                };
                symbol(&name)
            })
            .collect()
    };
    let pre_args = args(false);
    let post_args = args(true);

    let mut body: Vec<String> = rule
        .preconditions
        .iter()
        .map(|p| atom(p, &pre_args))
        .collect();
    if !rule.guard.is_true() {
        let bound = |field: &HeaderField| -> Result<(SmtTerm, u32), SmtError> {
            Ok((SmtTerm::var(field.name()), layout.require_width(field)?))
        };
        body.push(to_smtlib(&translate(&rule.guard, &bound)?));
    }
    for transform in &rule.transforms {
        let width = layout.require_width(&transform.field)?;
        let new_var = SmtTerm::var(format!("{NEW_PREFIX}{}", transform.field.name()));
        body.push(to_smtlib(&range_term(&new_var, width, &transform.ranges)));
    }
    body.extend(
        rule.post_transform_preconditions
            .iter()
            .map(|p| atom(p, &post_args)),
    );

    let head = atom(&rule.postcondition, &post_args);
    Ok(match body.len() {
        0 => format!("(rule {head})"),
        1 => format!("(rule (=> {} {head}))", body[0]),
        _ => format!("(rule (=> (and {}) {head}))", body.join(" ")),
    })
}

/// The header variables declared by a rendering, in declaration order.
pub fn parse_var_order(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("(declare-var "))
        .filter_map(|rest| {
            let name = if let Some(quoted) = rest.strip_prefix('|') {
                &quoted[..quoted.find('|')?]
            } else {
                rest.split_whitespace().next()?
            };
            (!name.starts_with(NEW_PREFIX)).then(|| name.to_string())
        })
        .collect()
}

/// SHA-256 of the rendering, as lowercase hex. Identical programs have
/// identical fingerprints.
pub fn program_fingerprint(program: &Program) -> Result<String, SmtError> {
    let text = render_datalog(program)?;
    let digest = Sha256::digest(text.as_bytes());
    Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
}
