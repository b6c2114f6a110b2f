//! Submitter expressions: a small boolean language over approver names.
//!
//! A bare comma list (`alice,bob`) means any of them. `and`, `or`, `not`
//! (or `&&`, `||`, `!`) and parentheses express other quorum rules. Only
//! names bound in the ledger may appear; there is nothing else to evaluate.

pub mod lexer;
pub mod parser;

use std::collections::{BTreeMap, BTreeSet};

use pausegate_core::errors::{CheckIssue, CheckReport, FormulaError, Severity};
use serde_json::Value;

use self::lexer::tokenize;
use self::parser::{Expr, Parser};

/// A parsed submitter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Formula {
    source: String,
    expr: Expr,
    variables: Vec<String>,
}

impl Formula {
    pub fn parse(source: &str) -> Result<Self, FormulaError> {
        let expr = Parser::new(tokenize(source)?).parse()?;
        let mut variables = Vec::new();
        collect_variables(&expr, &mut BTreeSet::new(), &mut variables);
        Ok(Self {
            source: source.to_string(),
            expr,
            variables,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Approver names in order of first appearance.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// True when the expression is one bare name (a principal or group).
    pub fn is_single_name(&self) -> bool {
        matches!(self.expr, Expr::Var(_))
    }

    /// Evaluate against the current votes.
    ///
    /// Every referenced name must be bound, whether or not evaluation would
    /// reach it, so a misconfigured expression fails the same way every time.
    pub fn evaluate(&self, votes: &BTreeMap<String, bool>) -> Result<bool, FormulaError> {
        if let Some(missing) = self.variables.iter().find(|v| !votes.contains_key(*v)) {
            return Err(FormulaError::UnknownVariable(missing.clone()));
        }
        Ok(eval(&self.expr, votes))
    }
}

fn collect_variables<'a>(expr: &'a Expr, seen: &mut BTreeSet<&'a str>, out: &mut Vec<String>) {
    match expr {
        Expr::Var(name) => {
            if seen.insert(name) {
                out.push(name.clone());
            }
        }
        Expr::Not(inner) => collect_variables(inner, seen, out),
        Expr::And(terms) | Expr::Or(terms) => {
            for term in terms {
                collect_variables(term, seen, out);
            }
        }
    }
}

fn eval(expr: &Expr, votes: &BTreeMap<String, bool>) -> bool {
    match expr {
        Expr::Var(name) => votes.get(name).copied().unwrap_or(false),
        Expr::Not(inner) => !eval(inner, votes),
        Expr::And(terms) => terms.iter().all(|t| eval(t, votes)),
        Expr::Or(terms) => terms.iter().any(|t| eval(t, votes)),
    }
}

/// Parse and evaluate in one step.
pub fn evaluate(source: &str, votes: &BTreeMap<String, bool>) -> Result<bool, FormulaError> {
    Formula::parse(source)?.evaluate(votes)
}

/// Add an `E010` issue when a request's submitter expression does not parse.
pub fn check_submitter(data: &Value, report: &mut CheckReport, strict: bool) {
    let Some(submitter) = data.get("submitter").and_then(Value::as_str) else {
        return;
    };
    if submitter.trim().is_empty() {
        return;
    }
    if let Err(e) = Formula::parse(submitter) {
        report.push(
            Severity::Error,
            CheckIssue {
                code: "E010".to_string(),
                check: "submitter".to_string(),
                message: e.to_string(),
                path: Some("$.submitter".to_string()),
            },
        );
        report.finish(strict);
    }
}
