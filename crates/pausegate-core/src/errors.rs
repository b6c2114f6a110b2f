use std::fmt;

/// Failure of a vote, cancel, or submission against a gate.
///
/// None of these change gate state. They are rendered at the HTTP boundary
/// as a user-visible failure and never reach the execution engine.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("This input has been already given")]
    AlreadySettled { gate_id: String },
    #[error("{0}")]
    Unauthorized(String),
    #[error(transparent)]
    ParameterBinding(#[from] BindingError),
    #[error("submitter expression is misconfigured: {0}")]
    Formula(#[from] FormulaError),
    #[error("an input with id '{0}' is already pending")]
    DuplicateGate(String),
    #[error("execution record for gate '{0}' is no longer available")]
    Detached(String),
}

impl GateError {
    pub fn is_already_settled(&self) -> bool {
        matches!(self, GateError::AlreadySettled { .. })
    }
}

/// Submitter expression parse or evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormulaError {
    #[error("empty submitter expression")]
    Empty,
    #[error("unexpected {found} at offset {offset}")]
    Unexpected { found: String, offset: usize },
    #[error("unexpected end of expression, expected {expected}")]
    UnexpectedEnd { expected: String },
    #[error("unknown approver '{0}' in submitter expression")]
    UnknownVariable(String),
    #[error("submitter expression nests deeper than {limit}")]
    TooDeep { limit: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    #[error("No such parameter definition: {0}")]
    UnknownParameter(String),
    #[error("parameter '{name}': {reason}")]
    Malformed { name: String, reason: String },
    #[error("input '{0}' requires parameters; an empty submission is not accepted")]
    EmptySubmission(String),
    #[error("cannot store file parameter '{name}': {source}")]
    Storage {
        name: String,
        #[source]
        source: PersistError,
    },
}

/// Bookkeeping failure during settlement or run persistence.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for PersistError {
    fn from(e: anyhow::Error) -> Self {
        PersistError::Other(format!("{e:#}"))
    }
}

/// Severity of a [`CheckIssue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warn"),
        }
    }
}

/// Structured check result for `pgate check --json`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckReport {
    pub file: String,
    pub pass: bool,
    pub errors: Vec<CheckIssue>,
    pub warnings: Vec<CheckIssue>,
}

impl CheckReport {
    pub fn push(&mut self, severity: Severity, issue: CheckIssue) {
        match severity {
            Severity::Error => self.errors.push(issue),
            Severity::Warning => self.warnings.push(issue),
        }
    }

    /// Recompute `pass` after issues were added.
    pub fn finish(&mut self, strict: bool) {
        self.pass = self.errors.is_empty() && (!strict || self.warnings.is_empty());
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckIssue {
    pub code: String,
    pub check: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}
