pub mod parameters;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use self::parameters::ParameterSpec;

/// Label of the accept button when none is configured.
pub const DEFAULT_OK: &str = "Proceed";

/// An approval request, created when execution reaches a pause point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateRequest {
    /// Unique within the owning execution record.
    pub id: String,

    pub message: String,

    #[serde(default = "default_ok")]
    pub ok: String,

    /// A single principal or group, or a boolean expression over approver names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitter: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterSpec>,

    /// Parameter slot that receives the approving principal's name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitter_parameter: Option<String>,
}

fn default_ok() -> String {
    DEFAULT_OK.to_string()
}

impl GateRequest {
    /// New request whose id is derived from the message.
    pub fn new(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            id: derive_id(&message),
            message,
            ok: default_ok(),
            submitter: None,
            parameters: Vec::new(),
            submitter_parameter: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_submitter(mut self, submitter: impl Into<String>) -> Self {
        self.submitter = Some(submitter.into());
        self
    }

    pub fn with_parameter(mut self, parameter: ParameterSpec) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_submitter_parameter(mut self, slot: impl Into<String>) -> Self {
        self.submitter_parameter = Some(slot.into());
        self
    }

    /// Configured submitter with surrounding whitespace removed; blank is none.
    pub fn submitter(&self) -> Option<&str> {
        self.submitter
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    pub fn submitter_parameter(&self) -> Option<&str> {
        self.submitter_parameter
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// True when a bare "proceed" click is a complete submission.
    pub fn is_parameterless(&self) -> bool {
        self.parameters.is_empty() && self.submitter_parameter().is_none()
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name() == name)
    }
}

/// Capitalized hex digest of the message, used when no id is given.
pub fn derive_id(message: &str) -> String {
    let hex = format!("{:x}", Sha256::digest(message.as_bytes()));
    let mut id = hex[..32].to_string();
    if let Some(first) = id.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    id
}
