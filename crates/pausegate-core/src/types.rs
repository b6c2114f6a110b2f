use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name used when a request carries no authentication.
pub const ANONYMOUS_PRINCIPAL: &str = "anonymous";

/// An authenticated identity attempting to vote or cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS_PRINCIPAL)
    }

    /// Name first, then group memberships.
    pub fn authorities(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.groups.iter().map(String::as_str))
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Cancel,
}

/// One raw parameter entry from a submitted form: `{"name": ..., ...}`.
///
/// The remaining fields are interpreted by the matching parameter definition
/// (`value` for plain parameters). Uploaded content is attached by the host
/// after it has received the multipart body and never comes from the fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntry {
    pub name: String,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
    #[serde(skip)]
    pub upload: Option<Vec<u8>>,
}

impl RawEntry {
    pub fn value(name: impl Into<String>, value: serde_json::Value) -> Self {
        let mut fields = serde_json::Map::new();
        fields.insert("value".into(), value);
        Self {
            name: name.into(),
            fields,
            upload: None,
        }
    }

    /// An uploaded file part with its content.
    pub fn upload(name: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            fields: serde_json::Map::new(),
            upload: Some(content.into()),
        }
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.get(key)
    }
}

/// A submission routed to a gate vote.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// The "proceed" link of a parameterless gate: no payload at all.
    Empty,
    Entries(Vec<RawEntry>),
}

/// A value materialized by a parameter definition, before conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterValue {
    Plain(serde_json::Value),
    /// Uploaded content waiting to be written to the run's artifact storage.
    Upload(Vec<u8>),
}

/// The value handed to the resumed graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BoundValue {
    Single(serde_json::Value),
    Map(BTreeMap<String, serde_json::Value>),
}

impl BoundValue {
    pub fn as_single(&self) -> Option<&serde_json::Value> {
        match self {
            BoundValue::Single(v) => Some(v),
            BoundValue::Map(_) => None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        match self {
            BoundValue::Single(_) => None,
            BoundValue::Map(m) => m.get(name),
        }
    }
}

/// Who rejected the input. `by` is `None` for system-initiated aborts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub by: Option<String>,
    pub at: DateTime<Utc>,
}

impl Rejection {
    pub fn new(by: Option<String>) -> Self {
        Self { by, at: Utc::now() }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.by {
            Some(user) => write!(f, "Rejected by {user}"),
            None => write!(f, "Rejected"),
        }
    }
}

/// Cause handed to the engine's failure entry point on rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interruption {
    pub rejection: Rejection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl fmt::Display for Interruption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ABORTED: {}", self.rejection)?;
        if let Some(cause) = &self.cause {
            write!(f, " ({cause})")?;
        }
        Ok(())
    }
}

/// Terminal result of a gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Accepted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<BoundValue>,
    },
    Rejected { interruption: Interruption },
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Outcome::Accepted { .. })
    }

    pub fn value(&self) -> Option<&BoundValue> {
        match self {
            Outcome::Accepted { value } => value.as_ref(),
            Outcome::Rejected { .. } => None,
        }
    }

    pub fn rejected_by(&self) -> Option<&str> {
        match self {
            Outcome::Accepted { .. } => None,
            Outcome::Rejected { interruption } => interruption.rejection.by.as_deref(),
        }
    }
}

/// Result of a vote or cancel that did not fail.
#[derive(Debug, Clone, PartialEq)]
pub enum GateStatus {
    Pending,
    Settled(Outcome),
}

impl GateStatus {
    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            GateStatus::Pending => None,
            GateStatus::Settled(o) => Some(o),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorities_lists_name_then_groups() {
        let p = Principal::new("alice").with_groups(["ops", "release"]);
        let all: Vec<&str> = p.authorities().collect();
        assert_eq!(all, vec!["alice", "ops", "release"]);
    }

    #[test]
    fn raw_entry_flattens_fields() {
        let entry: RawEntry =
            serde_json::from_str(r#"{"name":"region","value":"eu-west"}"#).unwrap();
        assert_eq!(entry.name, "region");
        assert_eq!(entry.get("value"), Some(&serde_json::json!("eu-west")));
        assert_eq!(entry.upload, None);
    }

    #[test]
    fn upload_content_cannot_be_supplied_as_form_data() {
        let entry: RawEntry =
            serde_json::from_str(r#"{"name":"bundle","upload":[65,66]}"#).unwrap();
        assert_eq!(entry.upload, None);
        assert_eq!(entry.get("upload"), Some(&serde_json::json!([65, 66])));
    }

    #[test]
    fn outcome_serializes_with_result_tag() {
        let outcome = Outcome::Accepted {
            value: Some(BoundValue::Single(serde_json::json!("v1.2"))),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["result"], "accepted");
        assert_eq!(json["value"]["kind"], "single");
        assert_eq!(json["value"]["value"], "v1.2");
    }

    #[test]
    fn system_rejection_has_no_principal() {
        let interruption = Interruption {
            rejection: Rejection::new(None),
            cause: Some("run deleted".into()),
        };
        assert_eq!(interruption.to_string(), "ABORTED: Rejected (run deleted)");
    }
}
