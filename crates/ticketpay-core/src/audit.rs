//! Audit log entries.
//!
//! Entries are write-once. This crate never updates or deletes them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AuditLogId, CompanyId, UserId};

/// What an audit entry records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// A commission transfer settled.
    CommissionTransferSuccess,

    /// A commission transfer attempt failed.
    CommissionTransferFailed,

    /// Any other action name.
    Custom(String),
}

impl AuditAction {
    /// Get the action name as stored.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::CommissionTransferSuccess => "commission_transfer_success",
            Self::CommissionTransferFailed => "commission_transfer_failed",
            Self::Custom(name) => name,
        }
    }
}

/// An append-only audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    /// Entry id.
    pub id: AuditLogId,

    /// Company the action concerns, if any.
    pub company_id: Option<CompanyId>,

    /// Operator who triggered the action, if any.
    pub user_id: Option<UserId>,

    /// What happened.
    pub action: AuditAction,

    /// Structured context.
    pub details: serde_json::Value,

    /// When the entry was created.
    pub created_at: DateTime<Utc>,
}

impl AuditLogEntry {
    /// Create an entry for a system action.
    #[must_use]
    pub fn new(action: AuditAction, details: serde_json::Value) -> Self {
        Self {
            id: AuditLogId::generate(),
            company_id: None,
            user_id: None,
            action,
            details,
            created_at: Utc::now(),
        }
    }

    /// Attach the company the entry concerns.
    #[must_use]
    pub fn with_company(mut self, company_id: CompanyId) -> Self {
        self.company_id = Some(company_id);
        self
    }

    /// Attach the operator who triggered the action.
    #[must_use]
    pub fn with_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }
}
