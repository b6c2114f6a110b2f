use std::fmt;

use serde::{Deserialize, Serialize};

/// Events a gate writes to the execution's console.
///
/// Rendering is plain text with embedded hyperlink markup. The wording is
/// not a contract; the events themselves form the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notice {
    /// Parameterless gate: message plus inline proceed/abort links.
    Prompt {
        gate_id: String,
        message: String,
        ok: String,
        proceed_url: String,
        abort_url: String,
    },
    /// Gate with parameters: link to the input form.
    InputRequested { gate_id: String, url: String },
    ApprovedBy { gate_id: String, principal: String },
    AlreadyApproved { gate_id: String, principal: String },
    WaitingForOthers { gate_id: String, submitter: String },
    AbortedBy {
        gate_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        principal: Option<String>,
    },
}

impl Notice {
    pub fn gate_id(&self) -> &str {
        match self {
            Notice::Prompt { gate_id, .. }
            | Notice::InputRequested { gate_id, .. }
            | Notice::ApprovedBy { gate_id, .. }
            | Notice::AlreadyApproved { gate_id, .. }
            | Notice::WaitingForOthers { gate_id, .. }
            | Notice::AbortedBy { gate_id, .. } => gate_id,
        }
    }
}

/// `<a href="..." data-method="post">label</a>`
pub fn post_link(url: &str, label: &str) -> String {
    format!("<a href=\"{url}\" data-method=\"post\">{label}</a>")
}

pub fn link(url: &str, label: &str) -> String {
    format!("<a href=\"{url}\">{label}</a>")
}

fn user_link(name: &str) -> String {
    link(&format!("/user/{name}/"), name)
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Prompt {
                message,
                ok,
                proceed_url,
                abort_url,
                ..
            } => write!(
                f,
                "{message}\n{} or {}",
                post_link(proceed_url, ok),
                post_link(abort_url, "Abort")
            ),
            Notice::InputRequested { url, .. } => f.write_str(&link(url, "Input requested")),
            Notice::ApprovedBy { principal, .. } => {
                write!(f, "Approved by {}", user_link(principal))
            }
            Notice::AlreadyApproved { principal, .. } => {
                write!(f, "{} has already approved", user_link(principal))
            }
            Notice::WaitingForOthers { submitter, .. } => write!(
                f,
                "Still waiting for others to approve. The configured submitters are {submitter}"
            ),
            Notice::AbortedBy { principal, .. } => match principal {
                Some(name) => write!(f, "Aborted by {}", user_link(name)),
                None => f.write_str("Aborted"),
            },
        }
    }
}
