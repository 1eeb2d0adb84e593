//! Account records.
//!
//! An account is a thin record: its identity and its current plan
//! assignment. Plan assignment changes take effect when the next billing
//! period opens; the period's pinned plan version governs everything inside
//! the period.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, PlanId};

/// A metered tenant account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// The account identifier, supplied by the account-management
    /// collaborator.
    pub account_id: AccountId,

    /// Currently assigned plan version. Pinned onto periods as they open.
    pub plan_id: Option<PlanId>,

    /// When the account was registered.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Register a new account.
    #[must_use]
    pub fn new(account_id: AccountId, plan_id: Option<PlanId>) -> Self {
        let now = Utc::now();
        Self {
            account_id,
            plan_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// Change the plan assignment. Takes effect at the next period open.
    pub fn assign_plan(&mut self, plan_id: PlanId) {
        self.plan_id = Some(plan_id);
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_account_keeps_assignment() {
        let plan = PlanId::generate();
        let account = Account::new(AccountId::generate(), Some(plan));
        assert_eq!(account.plan_id, Some(plan));
    }

    #[test]
    fn assign_plan_updates_timestamp() {
        let mut account = Account::new(AccountId::generate(), None);
        let created = account.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));

        account.assign_plan(PlanId::generate());
        assert!(account.plan_id.is_some());
        assert!(account.updated_at > created);
    }
}
