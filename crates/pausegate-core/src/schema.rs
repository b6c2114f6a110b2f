use std::collections::HashSet;

use anyhow::{bail, Context, Result};
use jsonschema::Validator;
use serde_json::Value;

use crate::errors::{CheckIssue, CheckReport, Severity};
use crate::spec::GateRequest;

const SCHEMA: &str = include_str!("../schema/gate-request.schema.json");

/// Compile the embedded gate request schema.
pub fn validator() -> Result<Validator> {
    let schema: Value = serde_json::from_str(SCHEMA).context("embedded schema is invalid JSON")?;
    Validator::new(&schema).map_err(|e| anyhow::anyhow!("schema compilation failed: {e}"))
}

/// Validate a gate request document, collecting every schema violation.
pub fn validate(data: &Value) -> Result<()> {
    let v = validator()?;
    if v.is_valid(data) {
        return Ok(());
    }
    let mut msgs: Vec<String> = Vec::new();
    for error in v.iter_errors(data) {
        let path = error.instance_path.to_string();
        let loc = if path.is_empty() {
            "(root)".into()
        } else {
            path
        };
        msgs.push(format!("  {loc}: {error}"));
    }
    bail!("validation failed:\n{}", msgs.join("\n"));
}

/// Read, validate, and deserialize a gate request file.
pub fn load_request(path: &str) -> Result<GateRequest> {
    let content = std::fs::read_to_string(path).with_context(|| format!("cannot read {path}"))?;
    let data: Value =
        serde_json::from_str(&content).with_context(|| format!("{path}: invalid JSON"))?;
    validate(&data).with_context(|| format!("{path}: not a valid gate request"))?;
    serde_json::from_value(data).with_context(|| format!("{path}: cannot decode gate request"))
}

/// Schema and structural checks producing a structured report.
///
/// Submitter expression syntax is checked by the engine, which owns the
/// expression grammar; see `pausegate_engine::formula::check_submitter`.
pub fn check(data: &Value, file: &str, strict: bool) -> CheckReport {
    let mut report = CheckReport {
        file: file.to_string(),
        pass: false,
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    if let Ok(v) = validator() {
        for error in v.iter_errors(data) {
            let path = error.instance_path.to_string();
            report.push(
                Severity::Error,
                CheckIssue {
                    code: "E001".to_string(),
                    check: "schema".to_string(),
                    message: error.to_string(),
                    path: Some(if path.is_empty() {
                        "$(root)".to_string()
                    } else {
                        format!("${path}")
                    }),
                },
            );
        }
    }

    check_parameter_names(data, &mut report);
    lint_checks(data, &mut report);

    report.finish(strict);
    report
}

fn check_parameter_names(data: &Value, report: &mut CheckReport) {
    let slot = data
        .get("submitter_parameter")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let Some(params) = data.get("parameters").and_then(Value::as_array) else {
        return;
    };

    let mut seen = HashSet::new();
    for (i, param) in params.iter().enumerate() {
        let Some(name) = param.get("name").and_then(Value::as_str) else {
            continue;
        };
        if !seen.insert(name) {
            report.push(
                Severity::Error,
                CheckIssue {
                    code: "E002".to_string(),
                    check: "parameters".to_string(),
                    message: format!("duplicate parameter name '{name}'"),
                    path: Some(format!("$.parameters[{i}].name")),
                },
            );
        }
        if slot == Some(name) {
            report.push(
                Severity::Error,
                CheckIssue {
                    code: "E003".to_string(),
                    check: "parameters".to_string(),
                    message: format!(
                        "submitter_parameter '{name}' collides with a declared parameter"
                    ),
                    path: Some("$.submitter_parameter".to_string()),
                },
            );
        }
    }
}

fn lint_checks(data: &Value, report: &mut CheckReport) {
    // W001: message too long to display in full
    if let Some(message) = data.get("message").and_then(Value::as_str) {
        if message.chars().count() > 200 {
            report.push(
                Severity::Warning,
                CheckIssue {
                    code: "W001".to_string(),
                    check: "lint".to_string(),
                    message: "message is longer than 200 characters".to_string(),
                    path: Some("$.message".to_string()),
                },
            );
        }
    }

    // W002: open gate, anyone with access may approve
    let submitter = data
        .get("submitter")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("");
    if submitter.is_empty() {
        report.push(
            Severity::Warning,
            CheckIssue {
                code: "W002".to_string(),
                check: "lint".to_string(),
                message: "no submitter configured; any principal may approve".to_string(),
                path: Some("$.submitter".to_string()),
            },
        );
    }
}
