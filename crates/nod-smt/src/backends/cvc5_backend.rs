use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};

use thiserror::Error;

use crate::backends::smtlib_printer::{sort_to_smtlib, symbol, to_smtlib};
use crate::solver::{Model, ModelValue, SatResult, SmtSolver};
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

/// Ranks are integers and headers are bit-vectors.
const LOGIC: &str = "(set-logic QF_UFBVLIA)";

#[derive(Debug, Error)]
pub enum Cvc5Error {
    #[error("cvc5 I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cvc5 not found: {0}")]
    NotFound(String),
    #[error("cvc5 error: {0}")]
    SolverError(String),
    #[error("Failed to parse cvc5 output: {0}")]
    ParseError(String),
}

/// cvc5 driven as a subprocess over SMT-LIB 2.
pub struct Cvc5Solver {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    stderr: BufReader<ChildStderr>,
    vars: HashMap<String, SmtSort>,
}

impl Cvc5Solver {
    pub fn new() -> Result<Self, Cvc5Error> {
        Self::with_command_and_timeout("cvc5", None)
    }

    pub fn with_timeout_ms(timeout_ms: u64) -> Result<Self, Cvc5Error> {
        let timeout = (timeout_ms > 0).then_some(timeout_ms);
        Self::with_command_and_timeout("cvc5", timeout)
    }

    pub fn with_command_and_timeout(cmd: &str, timeout_ms: Option<u64>) -> Result<Self, Cvc5Error> {
        let mut args = vec![
            "--lang".to_string(),
            "smt2".to_string(),
            "--incremental".to_string(),
            "--produce-models".to_string(),
        ];
        if let Some(ms) = timeout_ms {
            args.push(format!("--tlimit-per={ms}"));
        }

        let mut child = Command::new(cmd)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Cvc5Error::NotFound(format!("{cmd}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Cvc5Error::SolverError("failed to capture cvc5 stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Cvc5Error::SolverError("failed to capture cvc5 stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Cvc5Error::SolverError("failed to capture cvc5 stderr".into()))?;

        let mut solver = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            stderr: BufReader::new(stderr),
            vars: HashMap::new(),
        };

        solver.send_command_no_response(LOGIC)?;
        Ok(solver)
    }

    fn send_command(&mut self, cmd: &str) -> Result<String, Cvc5Error> {
        writeln!(self.stdin, "{cmd}")?;
        self.stdin.flush()?;

        let mut response = String::new();
        self.stdout.read_line(&mut response)?;
        if response.is_empty() {
            let mut stderr = String::new();
            let _ = self.stderr.read_line(&mut stderr);
            return Err(Cvc5Error::SolverError(format!(
                "No response from cvc5 for command `{cmd}`. stderr: {}",
                stderr.trim()
            )));
        }
        Ok(response.trim_end().to_string())
    }

    fn send_command_no_response(&mut self, cmd: &str) -> Result<(), Cvc5Error> {
        writeln!(self.stdin, "{cmd}")?;
        self.stdin.flush()?;
        Ok(())
    }
}

impl Drop for Cvc5Solver {
    fn drop(&mut self) {
        let _ = writeln!(self.stdin, "(exit)");
        let _ = self.stdin.flush();
        let _ = self.child.wait();
    }
}

impl SmtSolver for Cvc5Solver {
    type Error = Cvc5Error;

    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), Cvc5Error> {
        let sort_str = sort_to_smtlib(sort);
        self.send_command_no_response(&format!("(declare-const {} {sort_str})", symbol(name)))?;
        self.vars.insert(name.to_string(), sort.clone());
        Ok(())
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), Cvc5Error> {
        let smt_str = to_smtlib(term);
        self.send_command_no_response(&format!("(assert {smt_str})"))?;
        Ok(())
    }

    fn push(&mut self) -> Result<(), Cvc5Error> {
        self.send_command_no_response("(push 1)")
    }

    fn pop(&mut self) -> Result<(), Cvc5Error> {
        self.send_command_no_response("(pop 1)")
    }

    fn check_sat(&mut self) -> Result<SatResult, Cvc5Error> {
        let response = self.send_command("(check-sat)")?;
        match response.as_str() {
            "sat" => Ok(SatResult::Sat),
            "unsat" => Ok(SatResult::Unsat),
            "unknown" => Ok(SatResult::Unknown("cvc5 returned unknown".into())),
            other => Err(Cvc5Error::SolverError(other.to_string())),
        }
    }

    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Cvc5Error> {
        let result = self.check_sat()?;
        if result != SatResult::Sat {
            return Ok((result, None));
        }

        let mut values = HashMap::new();
        for &(name, sort) in var_names {
            let response = self.send_command(&format!("(get-value ({}))", symbol(name)))?;
            let value = parse_cvc5_value(&response, sort)
                .ok_or_else(|| Cvc5Error::ParseError(response.clone()))?;
            values.insert(name.to_string(), value);
        }

        Ok((SatResult::Sat, Some(Model { values })))
    }

    fn reset(&mut self) -> Result<(), Cvc5Error> {
        self.send_command_no_response("(reset)")?;
        self.send_command_no_response(LOGIC)?;
        self.vars.clear();
        Ok(())
    }
}

/// Parse the value out of a `((name value))` response.
fn parse_cvc5_value(response: &str, sort: &SmtSort) -> Option<ModelValue> {
    let inner = response.trim().strip_prefix("((")?.strip_suffix("))")?;
    // Quoted names may contain spaces; the value follows the closing bar.
    let rest = if let Some(quoted) = inner.strip_prefix('|') {
        &quoted[quoted.find('|')? + 1..]
    } else {
        &inner[inner.find(' ')?..]
    };
    let val_str = rest.trim();

    match sort {
        SmtSort::Int => {
            if let Some(num_str) = val_str.strip_prefix("(- ").and_then(|s| s.strip_suffix(')')) {
                num_str.trim().parse::<i64>().ok().map(|n| ModelValue::Int(-n))
            } else {
                val_str.parse::<i64>().ok().map(ModelValue::Int)
            }
        }
        SmtSort::Bool => match val_str {
            "true" => Some(ModelValue::Bool(true)),
            "false" => Some(ModelValue::Bool(false)),
            _ => None,
        },
        SmtSort::BitVec(_) => parse_bv_literal(val_str).map(ModelValue::BitVec),
    }
}

fn parse_bv_literal(text: &str) -> Option<u64> {
    if let Some(bits) = text.strip_prefix("#b") {
        u64::from_str_radix(bits, 2).ok()
    } else if let Some(hex) = text.strip_prefix("#x") {
        u64::from_str_radix(hex, 16).ok()
    } else {
        // (_ bvN w)
        let body = text.strip_prefix("(_ bv")?.strip_suffix(')')?;
        body.split_whitespace().next()?.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cvc5_int_value() {
        assert_eq!(
            parse_cvc5_value("((x 42))", &SmtSort::Int),
            Some(ModelValue::Int(42))
        );
        assert_eq!(
            parse_cvc5_value("((x (- 7)))", &SmtSort::Int),
            Some(ModelValue::Int(-7))
        );
    }

    #[test]
    fn parse_cvc5_bool_value() {
        assert_eq!(
            parse_cvc5_value("((b true))", &SmtSort::Bool),
            Some(ModelValue::Bool(true))
        );
        assert_eq!(
            parse_cvc5_value("((|rel!PostIn:r1| false))", &SmtSort::Bool),
            Some(ModelValue::Bool(false))
        );
    }

    #[test]
    fn parse_cvc5_bit_vector_forms() {
        let sort = SmtSort::BitVec(16);
        assert_eq!(
            parse_cvc5_value("((DST_PORT_const #b0000000001010000))", &sort),
            Some(ModelValue::BitVec(80))
        );
        assert_eq!(
            parse_cvc5_value("((|copy!Query!SRC_IP| #x0a000001))", &SmtSort::BitVec(32)),
            Some(ModelValue::BitVec(0x0a00_0001))
        );
        assert_eq!(
            parse_cvc5_value("((p (_ bv443 16)))", &sort),
            Some(ModelValue::BitVec(443))
        );
        assert_eq!(parse_cvc5_value("((p garbage))", &sort), None);
    }
}
