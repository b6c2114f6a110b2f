use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use tracing::{debug, info, warn};

use pausegate_core::errors::{BindingError, GateError};
use pausegate_core::notice::Notice;
use pausegate_core::spec::GateRequest;
use pausegate_core::state::{PendingGate, SettledGate};
use pausegate_core::types::{GateStatus, Interruption, Outcome, Principal, Rejection, Submission};

use super::binder::{self, Prepared};
use super::ledger::{Approval, ApprovalLedger};
use super::policy::AuthorizationPolicy;
use super::Collaborators;
use crate::formula::Formula;
use crate::registry::{RunRecord, URL_NAME};

/// Path segment characters left unescaped in gate URLs.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

const DISPLAY_NAME_LIMIT: usize = 32;

/// Who is rejecting: a resolved user, or the engine tearing the run down.
#[derive(Clone, Copy)]
enum Actor<'a> {
    User(&'a Principal),
    System,
}

struct GateState {
    ledger: Option<ApprovalLedger>,
    outcome: Option<Outcome>,
    paused_at: DateTime<Utc>,
}

/// One pending approval request.
///
/// `Pending` until the first successful vote or cancel settles it; the
/// outcome is written once, under the state lock, and every later attempt
/// fails with [`GateError::AlreadySettled`]. Only the caller that settled
/// performs the registry removal, persist, pause-end, and engine dispatch.
pub struct PauseGate {
    request: GateRequest,
    formula: Option<Formula>,
    state: Mutex<GateState>,
    run: Weak<RunRecord>,
    collaborators: Collaborators,
}

impl PauseGate {
    /// Create a gate for `request` on `run`.
    ///
    /// Fails with [`GateError::Formula`] when the submitter expression does
    /// not parse.
    pub fn new(
        request: GateRequest,
        run: &Arc<RunRecord>,
        collaborators: Collaborators,
    ) -> Result<Arc<Self>, GateError> {
        let formula = request.submitter().map(Formula::parse).transpose()?;
        let ledger = formula.as_ref().and_then(ApprovalLedger::for_formula);
        Ok(Arc::new(Self {
            request,
            formula,
            state: Mutex::new(GateState {
                ledger,
                outcome: None,
                paused_at: Utc::now(),
            }),
            run: Arc::downgrade(run),
            collaborators,
        }))
    }

    /// Rebuild a pending gate from a persisted snapshot, votes included.
    pub fn restore(
        pending: PendingGate,
        run: &Arc<RunRecord>,
        collaborators: Collaborators,
    ) -> Result<Arc<Self>, GateError> {
        let formula = pending.request.submitter().map(Formula::parse).transpose()?;
        let ledger = formula.as_ref().and_then(|f| match &pending.ledger {
            Some(stored) => ApprovalLedger::restore(f, stored),
            None => ApprovalLedger::for_formula(f),
        });
        Ok(Arc::new(Self {
            request: pending.request,
            formula,
            state: Mutex::new(GateState {
                ledger,
                outcome: None,
                paused_at: pending.paused_at,
            }),
            run: Arc::downgrade(run),
            collaborators,
        }))
    }

    /// Register with the run, mark the pause, and announce the input.
    ///
    /// Does not block; the engine keeps the branch suspended until the gate
    /// calls back through `resume` or `fail`.
    pub fn start(self: &Arc<Self>) -> Result<(), GateError> {
        let run = self.run()?;
        run.add_gate(Arc::clone(self))?;

        if let Some(node) = &self.collaborators.node {
            if let Err(e) = node.begin_pause("Input") {
                warn!(gate_id = %self.id(), run = %run.id(), error = %e, "failed to mark pause start");
            }
        }

        let base_url = format!("/{}{}/", run.url(), URL_NAME);
        let notice = if self.request.is_parameterless() {
            let this_url = format!(
                "{base_url}{}/",
                utf8_percent_encode(self.id(), SEGMENT)
            );
            Notice::Prompt {
                gate_id: self.id().to_string(),
                message: self.request.message.clone(),
                ok: self.request.ok.clone(),
                proceed_url: format!("{this_url}proceedEmpty"),
                abort_url: format!("{this_url}abort"),
            }
        } else {
            Notice::InputRequested {
                gate_id: self.id().to_string(),
                url: base_url,
            }
        };
        self.collaborators.console.emit(&notice);
        info!(gate_id = %self.id(), run = %run.id(), "input requested");
        Ok(())
    }

    /// Record an approval from `principal`.
    ///
    /// Without a ledger the first authorized vote settles the gate. With a
    /// ledger the vote is recorded and the submitter expression decides;
    /// the settling vote's submission becomes the bound value. Every vote's
    /// parameters are checked, but uploads are stored only by the settling
    /// vote. Re-votes are a no-op returning [`GateStatus::Pending`].
    pub fn cast_vote(
        &self,
        principal: &Principal,
        submission: Submission,
    ) -> Result<GateStatus, GateError> {
        let run = self.run()?;
        let mut state = self.lock_state();
        if state.outcome.is_some() {
            return Err(self.already_settled());
        }
        let policy = self.policy(&state, run.id());
        if !policy.can_vote(principal) {
            info!(gate_id = %self.id(), principal = %principal, "vote denied");
            return Err(GateError::Unauthorized(policy.vote_denial()));
        }

        let prepared = self.prepare(submission, principal)?;

        let mut next = state.ledger.clone();
        let reached = match next.as_mut() {
            None => true,
            Some(ledger) => match ledger.approve(principal) {
                Approval::NotAVoter => {
                    return Err(GateError::Unauthorized(policy.vote_denial()));
                }
                Approval::AlreadyApproved => {
                    self.record_approver(&run, principal);
                    debug!(gate_id = %self.id(), principal = %principal, "repeat approval ignored");
                    self.collaborators.console.emit(&Notice::AlreadyApproved {
                        gate_id: self.id().to_string(),
                        principal: principal.name.clone(),
                    });
                    return Ok(GateStatus::Pending);
                }
                Approval::Recorded => match &self.formula {
                    Some(formula) => formula.evaluate(ledger.votes())?,
                    None => true,
                },
            },
        };

        if !reached {
            self.record_approver(&run, principal);
            state.ledger = next;
            self.collaborators.console.emit(&Notice::WaitingForOthers {
                gate_id: self.id().to_string(),
                submitter: self.request.submitter().unwrap_or_default().to_string(),
            });
            return Ok(GateStatus::Pending);
        }

        let value = prepared.store(&*run)?;
        self.record_approver(&run, principal);
        state.ledger = next;

        let outcome = Outcome::Accepted {
            value: value.clone(),
        };
        let record = self.settle(state, &outcome);
        info!(gate_id = %self.id(), run = %run.id(), principal = %principal, "input approved");
        self.post_settlement(&run, record);
        self.collaborators.engine.resume(self.id(), value);
        Ok(GateStatus::Settled(outcome))
    }

    /// Reject the input on behalf of `principal`.
    ///
    /// Allowed for holders of the run's CANCEL permission and for anyone who
    /// may vote on this gate.
    pub fn cancel(&self, principal: &Principal) -> Result<GateStatus, GateError> {
        self.reject(Actor::User(principal), None)
    }

    /// Abort from an engine teardown path.
    ///
    /// The abort runs on its own thread as the system so the calling thread
    /// never waits on the gate. No user identity can act as the system. A
    /// gate that settled in the meantime is left alone.
    pub fn stop(self: &Arc<Self>, cause: impl Into<String>) -> Option<JoinHandle<()>> {
        let gate = Arc::clone(self);
        let cause = cause.into();
        let spawned = thread::Builder::new()
            .name(format!("pausegate-abort-{}", self.id()))
            .spawn(move || match gate.reject(Actor::System, Some(cause)) {
                Ok(_) => info!(gate_id = %gate.id(), "input aborted by system"),
                Err(e) if e.is_already_settled() => {
                    debug!(gate_id = %gate.id(), "abort skipped, input already settled")
                }
                Err(e) => warn!(gate_id = %gate.id(), error = %e, "system abort failed"),
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(gate_id = %self.id(), error = %e, "cannot spawn abort worker");
                None
            }
        }
    }

    fn reject(&self, actor: Actor<'_>, cause: Option<String>) -> Result<GateStatus, GateError> {
        let run = self.run()?;
        let state = self.lock_state();
        if state.outcome.is_some() {
            return Err(self.already_settled());
        }
        let by = match actor {
            Actor::User(principal) => {
                let policy = self.policy(&state, run.id());
                if !policy.can_cancel(principal) && !policy.can_vote(principal) {
                    info!(gate_id = %self.id(), principal = %principal, "cancel denied");
                    return Err(GateError::Unauthorized(policy.cancel_denial()));
                }
                Some(principal.name.clone())
            }
            Actor::System => None,
        };
        let interruption = Interruption {
            rejection: Rejection::new(by.clone()),
            cause,
        };
        self.collaborators.console.emit(&Notice::AbortedBy {
            gate_id: self.id().to_string(),
            principal: by.clone(),
        });

        let outcome = Outcome::Rejected {
            interruption: interruption.clone(),
        };
        let record = self.settle(state, &outcome);
        info!(gate_id = %self.id(), run = %run.id(), by = ?by, "input rejected");
        self.post_settlement(&run, record);
        self.collaborators.engine.fail(self.id(), interruption);
        Ok(GateStatus::Settled(outcome))
    }

    pub fn id(&self) -> &str {
        &self.request.id
    }

    pub fn request(&self) -> &GateRequest {
        &self.request
    }

    /// The message, cut to 32 characters for list display.
    pub fn display_name(&self) -> String {
        let message = &self.request.message;
        if message.chars().count() < DISPLAY_NAME_LIMIT {
            return message.clone();
        }
        let cut: String = message.chars().take(DISPLAY_NAME_LIMIT).collect();
        format!("{cut}...")
    }

    pub fn is_settled(&self) -> bool {
        self.lock_state().outcome.is_some()
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.lock_state().outcome.clone()
    }

    /// Current votes, for gates that track approvers individually.
    pub fn votes(&self) -> Option<BTreeMap<String, bool>> {
        self.lock_state().ledger.as_ref().map(|l| l.votes().clone())
    }

    /// Persistable view while pending; `None` once settled.
    pub fn pending_snapshot(&self) -> Option<PendingGate> {
        let state = self.lock_state();
        if state.outcome.is_some() {
            return None;
        }
        Some(PendingGate {
            request: self.request.clone(),
            ledger: state.ledger.as_ref().map(|l| l.votes().clone()),
            paused_at: state.paused_at,
        })
    }

    fn run(&self) -> Result<Arc<RunRecord>, GateError> {
        self.run
            .upgrade()
            .ok_or_else(|| GateError::Detached(self.id().to_string()))
    }

    fn lock_state(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn policy<'a>(&'a self, state: &'a GateState, record_id: &'a str) -> AuthorizationPolicy<'a> {
        AuthorizationPolicy {
            submitter: self.request.submitter(),
            ledger: state.ledger.as_ref(),
            identity: self.collaborators.identity.as_ref(),
            record_id,
        }
    }

    fn already_settled(&self) -> GateError {
        GateError::AlreadySettled {
            gate_id: self.id().to_string(),
        }
    }

    /// Check the submission against the parameter definitions without
    /// storing anything.
    fn prepare(&self, submission: Submission, principal: &Principal) -> Result<Prepared, GateError> {
        match submission {
            Submission::Empty if self.request.is_parameterless() => Ok(Prepared::default()),
            Submission::Empty => {
                Err(BindingError::EmptySubmission(self.id().to_string()).into())
            }
            Submission::Entries(entries) => {
                let injected = self
                    .request
                    .submitter_parameter()
                    .map(|slot| (slot, principal.name.as_str()));
                Ok(binder::prepare(&self.request.parameters, &entries, injected)?)
            }
        }
    }

    fn record_approver(&self, run: &RunRecord, principal: &Principal) {
        run.add_approver(&principal.name);
        self.collaborators.console.emit(&Notice::ApprovedBy {
            gate_id: self.id().to_string(),
            principal: principal.name.clone(),
        });
    }

    /// Write the outcome and release the lock. From here on every other
    /// caller sees the gate as settled.
    fn settle(&self, mut state: MutexGuard<'_, GateState>, outcome: &Outcome) -> SettledGate {
        state.outcome = Some(outcome.clone());
        SettledGate {
            id: self.id().to_string(),
            message: self.request.message.clone(),
            outcome: outcome.clone(),
            paused_at: state.paused_at,
            settled_at: Utc::now(),
        }
    }

    /// Registry removal, persist, and pause end. Failures are logged and the
    /// settlement stands.
    fn post_settlement(&self, run: &RunRecord, record: SettledGate) {
        if run.remove_gate(self.id()).is_none() {
            warn!(gate_id = %self.id(), run = %run.id(), "settled input was not registered with its run");
        }
        run.record_settled(record);
        if let Err(e) = run.save() {
            warn!(gate_id = %self.id(), run = %run.id(), error = %e, "failed to persist run after settlement");
        }
        match &self.collaborators.node {
            Some(node) => {
                if let Err(e) = node.end_pause() {
                    warn!(gate_id = %self.id(), run = %run.id(), error = %e, "failed to end pause");
                }
            }
            None => warn!(gate_id = %self.id(), run = %run.id(), "cannot set pause end time"),
        }
    }
}
