use pausegate_core::traits::IdentityProvider;
use pausegate_core::types::{Permission, Principal};

use super::ledger::ApprovalLedger;

/// Who may vote on or cancel one gate.
///
/// Built per call while the gate's state lock is held, so the ledger it
/// consults is the one settlement will act on. Cancel permission is asked
/// of the identity provider every time.
pub struct AuthorizationPolicy<'a> {
    pub submitter: Option<&'a str>,
    pub ledger: Option<&'a ApprovalLedger>,
    pub identity: &'a dyn IdentityProvider,
    pub record_id: &'a str,
}

impl AuthorizationPolicy<'_> {
    pub fn can_vote(&self, principal: &Principal) -> bool {
        match (self.ledger, self.submitter) {
            (Some(ledger), _) => ledger.is_eligible(principal),
            (None, None) => true,
            (None, Some(submitter)) => principal.authorities().any(|a| a == submitter),
        }
    }

    pub fn can_cancel(&self, principal: &Principal) -> bool {
        self.identity
            .has_permission(principal, self.record_id, Permission::Cancel)
    }

    pub fn vote_denial(&self) -> String {
        format!(
            "You need to be {} to submit this",
            self.submitter.unwrap_or("an authorized submitter")
        )
    }

    pub fn cancel_denial(&self) -> String {
        format!(
            "You need to be '{}' (or have CANCEL permission) to cancel this.",
            self.submitter.unwrap_or("an authorized submitter")
        )
    }
}
