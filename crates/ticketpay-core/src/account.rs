//! Company payout accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CompanyId;

/// Where a company's net ticket revenue is settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyAccount {
    /// The company.
    pub company_id: CompanyId,

    /// Account identifier on the payment network.
    pub payout_account: String,

    /// When the account was registered.
    pub created_at: DateTime<Utc>,
}

impl CompanyAccount {
    /// Register a payout account for a company.
    #[must_use]
    pub fn new(company_id: CompanyId, payout_account: impl Into<String>) -> Self {
        Self {
            company_id,
            payout_account: payout_account.into(),
            created_at: Utc::now(),
        }
    }
}
