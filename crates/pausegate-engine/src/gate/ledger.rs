use std::collections::BTreeMap;

use pausegate_core::types::Principal;

use crate::formula::Formula;

/// What [`ApprovalLedger::approve`] did with a vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Approval {
    /// At least one entry moved to approved.
    Recorded,
    /// Every entry the principal answers for was already approved.
    AlreadyApproved,
    /// The principal answers for no entry.
    NotAVoter,
}

/// Named approvers of a multi-approver gate and whether each has approved.
///
/// The key set is fixed at creation and votes only move from false to true.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalLedger {
    votes: BTreeMap<String, bool>,
}

impl ApprovalLedger {
    /// Ledger for a submitter expression, or `None` when the expression is a
    /// single principal or group that needs no individual tracking.
    pub fn for_formula(formula: &Formula) -> Option<Self> {
        if formula.is_single_name() {
            return None;
        }
        let votes = formula
            .variables()
            .iter()
            .map(|name| (name.clone(), false))
            .collect();
        Some(Self { votes })
    }

    /// Rebuild from persisted votes. Keys come from the formula; stored
    /// `true` votes for those keys are carried over, anything else is dropped.
    pub fn restore(formula: &Formula, stored: &BTreeMap<String, bool>) -> Option<Self> {
        let mut ledger = Self::for_formula(formula)?;
        for (name, vote) in ledger.votes.iter_mut() {
            *vote = stored.get(name).copied().unwrap_or(false);
        }
        Some(ledger)
    }

    pub fn votes(&self) -> &BTreeMap<String, bool> {
        &self.votes
    }

    pub fn contains(&self, name: &str) -> bool {
        self.votes.contains_key(name)
    }

    /// True iff the principal's name or any of its groups is a ledger key.
    pub fn is_eligible(&self, principal: &Principal) -> bool {
        principal.authorities().any(|a| self.contains(a))
    }

    /// Mark every ledger entry the principal answers for (its name and its
    /// groups) as approved.
    pub fn approve(&mut self, principal: &Principal) -> Approval {
        let mut result = Approval::NotAVoter;
        for authority in principal.authorities() {
            if let Some(vote) = self.votes.get_mut(authority) {
                if !*vote {
                    *vote = true;
                    result = Approval::Recorded;
                } else if result == Approval::NotAVoter {
                    result = Approval::AlreadyApproved;
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(src: &str) -> ApprovalLedger {
        ApprovalLedger::for_formula(&Formula::parse(src).unwrap()).unwrap()
    }

    #[test]
    fn single_name_needs_no_ledger() {
        assert!(ApprovalLedger::for_formula(&Formula::parse("ops").unwrap()).is_none());
    }

    #[test]
    fn starts_with_every_vote_false() {
        let l = ledger("alice,bob");
        assert_eq!(l.votes().len(), 2);
        assert!(l.votes().values().all(|v| !v));
    }

    #[test]
    fn approve_is_monotonic_and_reports_changes() {
        let mut l = ledger("alice and bob");
        let alice = Principal::new("alice");
        assert_eq!(l.approve(&alice), Approval::Recorded);
        assert_eq!(l.approve(&alice), Approval::AlreadyApproved);
        assert_eq!(l.votes()["alice"], true);
        assert_eq!(l.votes()["bob"], false);
    }

    #[test]
    fn group_membership_counts_for_the_group_entry() {
        let mut l = ledger("alice and release");
        let carol = Principal::new("carol").with_groups(["release"]);
        assert!(l.is_eligible(&carol));
        assert_eq!(l.approve(&carol), Approval::Recorded);
        assert_eq!(l.votes()["release"], true);
    }

    #[test]
    fn outsiders_are_not_eligible() {
        let mut l = ledger("alice,bob");
        let carol = Principal::new("carol");
        assert!(!l.is_eligible(&carol));
        assert_eq!(l.approve(&carol), Approval::NotAVoter);
        assert!(l.votes().values().all(|v| !v));
    }

    #[test]
    fn restore_keeps_formula_keys_only() {
        let f = Formula::parse("alice and bob").unwrap();
        let stored: BTreeMap<String, bool> =
            [("alice".to_string(), true), ("mallory".to_string(), true)]
                .into_iter()
                .collect();
        let l = ApprovalLedger::restore(&f, &stored).unwrap();
        assert_eq!(l.votes()["alice"], true);
        assert_eq!(l.votes()["bob"], false);
        assert!(!l.contains("mallory"));
    }
}
