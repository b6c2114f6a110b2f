//! Request handling for `/<run>/input/<gate>/...`.
//!
//! Every route is POST-only and needs a valid crumb. Gate failures become a
//! 400 carrying the gate's message and never reach the engine.

use tracing::debug;

use pausegate_core::errors::GateError;
use pausegate_core::traits::IdentityProvider;
use pausegate_core::types::{Principal, RawEntry, Submission};

use crate::registry::RunRecord;

/// Relative redirect from `<run>/input/<gate>/submit` back to the console.
pub const CONSOLE_REDIRECT: &str = "../../console";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone, Copy)]
pub struct HttpRequest<'a> {
    pub method: Method,
    pub crumb: Option<&'a str>,
}

/// Anti-CSRF token check supplied by the host.
pub trait CrumbIssuer {
    fn validate(&self, crumb: Option<&str>) -> bool;
}

/// Which button the input form was submitted with.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitAction {
    Proceed(Vec<RawEntry>),
    Abort,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Form post; redirects to the console on success.
    Submit(SubmitAction),
    Proceed(Vec<RawEntry>),
    ProceedEmpty,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Redirect(String),
    Ok,
    Failure { message: String },
    Forbidden,
    MethodNotAllowed,
    NotFound,
}

impl Response {
    pub fn status(&self) -> u16 {
        match self {
            Response::Redirect(_) => 302,
            Response::Ok => 200,
            Response::Failure { .. } => 400,
            Response::Forbidden => 403,
            Response::NotFound => 404,
            Response::MethodNotAllowed => 405,
        }
    }
}

impl From<GateError> for Response {
    fn from(e: GateError) -> Self {
        Response::Failure {
            message: e.to_string(),
        }
    }
}

/// Route one request to the gate `gate_id` of `run`.
///
/// The principal is resolved from `identity` on every call; an
/// unauthenticated request acts as the anonymous principal.
pub fn dispatch(
    run: &RunRecord,
    gate_id: &str,
    route: Route,
    request: HttpRequest<'_>,
    identity: &dyn IdentityProvider,
    crumbs: &dyn CrumbIssuer,
) -> Response {
    if request.method != Method::Post {
        return Response::MethodNotAllowed;
    }
    if !crumbs.validate(request.crumb) {
        debug!(run = %run.id(), gate_id, "rejected request without a valid crumb");
        return Response::Forbidden;
    }
    let Some(gate) = run.gate(gate_id) else {
        return Response::NotFound;
    };
    let principal = identity
        .current_principal()
        .unwrap_or_else(Principal::anonymous);

    let (result, success) = match route {
        Route::Submit(SubmitAction::Proceed(entries)) => (
            gate.cast_vote(&principal, Submission::Entries(entries)),
            Response::Redirect(CONSOLE_REDIRECT.to_string()),
        ),
        Route::Submit(SubmitAction::Abort) => (
            gate.cancel(&principal),
            Response::Redirect(CONSOLE_REDIRECT.to_string()),
        ),
        Route::Proceed(entries) => (
            gate.cast_vote(&principal, Submission::Entries(entries)),
            Response::Ok,
        ),
        Route::ProceedEmpty => (gate.cast_vote(&principal, Submission::Empty), Response::Ok),
        Route::Abort => (gate.cancel(&principal), Response::Ok),
    };
    match result {
        Ok(_) => success,
        Err(e) => e.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::fixtures::Harness;
    use pausegate_core::spec::parameters::ParameterSpec;
    use pausegate_core::spec::GateRequest;
    use serde_json::json;

    struct Crumb(&'static str);

    impl CrumbIssuer for Crumb {
        fn validate(&self, crumb: Option<&str>) -> bool {
            crumb == Some(self.0)
        }
    }

    const POST: HttpRequest<'static> = HttpRequest {
        method: Method::Post,
        crumb: Some("c0ffee"),
    };

    fn send(h: &Harness, gate: &str, route: Route, request: HttpRequest<'_>) -> Response {
        dispatch(&h.run, gate, route, request, h.identity.as_ref(), &Crumb("c0ffee"))
    }

    #[test]
    fn form_submit_redirects_to_console() {
        let h = Harness::new();
        h.identity.login(Principal::new("alice"));
        h.open(GateRequest::new("Tag?").with_id("tag").with_parameter(ParameterSpec::string("tag")));

        let response = send(
            &h,
            "tag",
            Route::Submit(SubmitAction::Proceed(vec![RawEntry::value("tag", json!("v1"))])),
            POST,
        );
        assert_eq!(response, Response::Redirect("../../console".into()));
        assert_eq!(h.engine.resumed(), 1);
    }

    #[test]
    fn rest_variants_answer_ok() {
        let h = Harness::new();
        h.identity.login(Principal::new("alice"));
        h.open(GateRequest::new("Go?").with_id("go"));
        assert_eq!(send(&h, "go", Route::ProceedEmpty, POST), Response::Ok);
    }

    #[test]
    fn abort_by_anonymous_on_open_gate() {
        let h = Harness::new();
        h.open(GateRequest::new("Go?").with_id("go"));
        let response = send(&h, "go", Route::Abort, POST);
        assert_eq!(response.status(), 200);
        assert_eq!(h.engine.failed(), 1);
        assert_eq!(h.engine.last_failure().unwrap().rejection.by.as_deref(), Some("anonymous"));
    }

    #[test]
    fn get_and_missing_crumb_are_refused_before_the_gate() {
        let h = Harness::new();
        h.open(GateRequest::new("Go?").with_id("go"));
        let get = HttpRequest {
            method: Method::Get,
            crumb: Some("c0ffee"),
        };
        let no_crumb = HttpRequest {
            method: Method::Post,
            crumb: None,
        };
        assert_eq!(send(&h, "go", Route::ProceedEmpty, get).status(), 405);
        assert_eq!(send(&h, "go", Route::ProceedEmpty, no_crumb).status(), 403);
        assert_eq!(h.engine.resumed(), 0);
    }

    #[test]
    fn unknown_gate_is_not_found() {
        let h = Harness::new();
        assert_eq!(send(&h, "nope", Route::Abort, POST), Response::NotFound);
    }

    #[test]
    fn gate_errors_become_failures_with_the_message() {
        let h = Harness::new();
        h.identity.login(Principal::new("eve"));
        h.open(GateRequest::new("Ship?").with_id("ship").with_submitter("ops"));
        assert_eq!(
            send(&h, "ship", Route::ProceedEmpty, POST),
            Response::Failure {
                message: "You need to be ops to submit this".into()
            }
        );

        h.identity.login(Principal::new("ops"));
        assert_eq!(send(&h, "ship", Route::ProceedEmpty, POST), Response::Ok);
        assert_eq!(
            send(&h, "ship", Route::ProceedEmpty, POST),
            Response::NotFound,
            "settled gates leave the registry"
        );
    }

    #[test]
    fn proceed_empty_on_parameterized_gate_fails() {
        let h = Harness::new();
        h.open(
            GateRequest::new("Tag?")
                .with_id("tag")
                .with_parameter(ParameterSpec::string("tag")),
        );
        let response = send(&h, "tag", Route::ProceedEmpty, POST);
        assert_eq!(response.status(), 400);
        assert_eq!(h.engine.resumed(), 0);
    }

    #[test]
    fn a_user_called_system_is_an_ordinary_user() {
        let h = Harness::new();
        h.identity.login(Principal::new("SYSTEM"));
        h.open(GateRequest::new("Ship?").with_id("ship").with_submitter("ops"));
        h.open(GateRequest::new("Tag?").with_id("tag").with_submitter("ops"));

        assert_eq!(send(&h, "ship", Route::Abort, POST).status(), 400);
        assert_eq!(send(&h, "tag", Route::ProceedEmpty, POST).status(), 400);
        assert_eq!(h.engine.failed(), 0);
        assert_eq!(h.engine.resumed(), 0);
        assert_eq!(h.run.pending().len(), 2);
    }

    #[test]
    fn a_server_path_in_the_form_is_never_read() {
        let h = Harness::new();
        let secret = h.dir.path().join("server-secret.txt");
        std::fs::write(&secret, "TOP SECRET").unwrap();
        h.identity.login(Principal::new("alice"));
        h.open(
            GateRequest::new("Bundle?")
                .with_id("bundle")
                .with_parameter(ParameterSpec::file("bundle")),
        );

        let entry: RawEntry = serde_json::from_value(json!({
            "name": "bundle",
            "file": secret.display().to_string(),
        }))
        .unwrap();
        let response = send(&h, "bundle", Route::Proceed(vec![entry]), POST);

        assert_eq!(response, Response::Ok);
        assert_eq!(h.engine.last_resume_value(), Some(None));
        assert!(!h.run.artifact_dir().join("bundle").exists());
    }
}
