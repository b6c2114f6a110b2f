use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::BindingError;
use crate::traits::ParameterDefinition;
use crate::types::{ParameterValue, RawEntry};

/// Built-in parameter definitions a gate request may declare.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterSpec {
    String {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default)]
        trim: bool,
    },
    Text {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default_value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Boolean {
        name: String,
        #[serde(default)]
        default_value: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Choice {
        name: String,
        choices: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Password {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    File {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl ParameterSpec {
    pub fn string(name: impl Into<String>) -> Self {
        ParameterSpec::String {
            name: name.into(),
            default_value: None,
            description: None,
            trim: false,
        }
    }

    pub fn boolean(name: impl Into<String>, default_value: bool) -> Self {
        ParameterSpec::Boolean {
            name: name.into(),
            default_value,
            description: None,
        }
    }

    pub fn choice<I, S>(name: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ParameterSpec::Choice {
            name: name.into(),
            choices: choices.into_iter().map(Into::into).collect(),
            description: None,
        }
    }

    pub fn file(name: impl Into<String>) -> Self {
        ParameterSpec::File {
            name: name.into(),
            description: None,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ParameterSpec::String { name, .. }
            | ParameterSpec::Text { name, .. }
            | ParameterSpec::Boolean { name, .. }
            | ParameterSpec::Choice { name, .. }
            | ParameterSpec::Password { name, .. }
            | ParameterSpec::File { name, .. } => name,
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> BindingError {
        BindingError::Malformed {
            name: self.name().to_string(),
            reason: reason.into(),
        }
    }

    fn text_field<'a>(&self, entry: &'a RawEntry) -> Result<Option<&'a str>, BindingError> {
        match entry.get("value") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(other) => Err(self.malformed(format!("expected text, got {other}"))),
        }
    }
}

impl ParameterDefinition for ParameterSpec {
    fn name(&self) -> &str {
        ParameterSpec::name(self)
    }

    fn create_value(&self, entry: &RawEntry) -> Result<Option<ParameterValue>, BindingError> {
        let value = match self {
            ParameterSpec::String {
                default_value,
                trim,
                ..
            } => match self.text_field(entry)? {
                Some(s) if *trim => Some(Value::String(s.trim().to_string())),
                Some(s) => Some(Value::String(s.to_string())),
                None => default_value.clone().map(Value::String),
            },
            ParameterSpec::Text { default_value, .. } => match self.text_field(entry)? {
                Some(s) => Some(Value::String(s.to_string())),
                None => default_value.clone().map(Value::String),
            },
            ParameterSpec::Password { .. } => self
                .text_field(entry)?
                .map(|s| Value::String(s.to_string())),
            ParameterSpec::Boolean { default_value, .. } => match entry.get("value") {
                None | Some(Value::Null) => Some(Value::Bool(*default_value)),
                Some(Value::Bool(b)) => Some(Value::Bool(*b)),
                Some(Value::String(s)) if s == "true" || s == "on" => Some(Value::Bool(true)),
                Some(Value::String(s)) if s == "false" || s == "off" => Some(Value::Bool(false)),
                Some(other) => {
                    return Err(self.malformed(format!("expected a boolean, got {other}")))
                }
            },
            ParameterSpec::Choice { choices, .. } => match self.text_field(entry)? {
                Some(s) if choices.iter().any(|c| c == s) => Some(Value::String(s.to_string())),
                Some(s) => {
                    return Err(self.malformed(format!(
                        "'{s}' is not one of: {}",
                        choices.join(", ")
                    )))
                }
                None => choices.first().cloned().map(Value::String),
            },
            ParameterSpec::File { .. } => {
                if let Some(content) = &entry.upload {
                    return Ok(Some(ParameterValue::Upload(content.clone())));
                }
                return match entry.get("value") {
                    None | Some(Value::Null) => Ok(None),
                    Some(_) => Err(self.malformed("expected an uploaded file")),
                };
            }
        };
        Ok(value.map(ParameterValue::Plain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_trims_when_configured() {
        let spec = ParameterSpec::String {
            name: "tag".into(),
            default_value: None,
            description: None,
            trim: true,
        };
        let v = spec
            .create_value(&RawEntry::value("tag", json!("  v1.4  ")))
            .unwrap();
        assert_eq!(v, Some(ParameterValue::Plain(json!("v1.4"))));
    }

    #[test]
    fn missing_string_falls_back_to_default_or_declines() {
        let entry = RawEntry::value("tag", Value::Null);
        assert_eq!(ParameterSpec::string("tag").create_value(&entry).unwrap(), None);

        let with_default = ParameterSpec::String {
            name: "tag".into(),
            default_value: Some("latest".into()),
            description: None,
            trim: false,
        };
        assert_eq!(
            with_default.create_value(&entry).unwrap(),
            Some(ParameterValue::Plain(json!("latest")))
        );
    }

    #[test]
    fn boolean_accepts_form_strings() {
        let spec = ParameterSpec::boolean("force", false);
        let v = spec.create_value(&RawEntry::value("force", json!("on"))).unwrap();
        assert_eq!(v, Some(ParameterValue::Plain(json!(true))));
        assert!(spec
            .create_value(&RawEntry::value("force", json!(3)))
            .is_err());
    }

    #[test]
    fn choice_rejects_values_outside_the_list() {
        let spec = ParameterSpec::choice("env", ["staging", "prod"]);
        assert!(spec
            .create_value(&RawEntry::value("env", json!("qa")))
            .is_err());
        let v = spec
            .create_value(&RawEntry::value("env", json!("prod")))
            .unwrap();
        assert_eq!(v, Some(ParameterValue::Plain(json!("prod"))));
    }

    #[test]
    fn file_takes_the_uploaded_content() {
        let spec = ParameterSpec::file("bundle");
        let v = spec
            .create_value(&RawEntry::upload("bundle", b"tarball".to_vec()))
            .unwrap();
        assert_eq!(v, Some(ParameterValue::Upload(b"tarball".to_vec())));
    }

    #[test]
    fn file_refuses_a_form_value_in_place_of_content() {
        let spec = ParameterSpec::file("bundle");
        let err = spec
            .create_value(&RawEntry::value("bundle", json!("/etc/passwd")))
            .unwrap_err();
        assert!(matches!(err, BindingError::Malformed { .. }));

        let mut entry = RawEntry::value("bundle", Value::Null);
        entry.fields.insert("file".into(), json!("/etc/passwd"));
        assert_eq!(spec.create_value(&entry).unwrap(), None);
    }

    #[test]
    fn deserializes_from_type_tag() {
        let spec: ParameterSpec =
            serde_json::from_value(json!({"type": "choice", "name": "env", "choices": ["a", "b"]}))
                .unwrap();
        assert_eq!(spec.name(), "env");
    }
}
