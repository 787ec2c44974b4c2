//! Ticket types for ticketpay.
//!
//! A ticket is created once per confirmed payment. The payment transaction id
//! is the idempotency key: however often a confirmation is delivered, at most
//! one ticket exists for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TicketError};
use crate::{CompanyId, LedgerEntryId, RouteId, TicketId};

/// Upper bound for a commission rate, in percent.
pub const MAX_COMMISSION_RATE: f64 = 100.0;

/// A request to create a ticket for a confirmed payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketCreationRequest {
    /// Company operating the route.
    pub company_id: CompanyId,

    /// Route the ticket is valid on.
    pub route_id: RouteId,

    /// Passenger phone number the ticket is delivered to.
    pub passenger_phone: String,

    /// Payment provider transaction id. Globally unique per payment event.
    pub payment_transaction_id: String,

    /// One-time code the passenger presents when boarding.
    pub payment_otp: String,

    /// Amount paid, in cents.
    pub amount_cents: i64,

    /// Platform commission, in percent of `amount_cents`.
    pub commission_rate: f64,
}

impl TicketCreationRequest {
    /// Check the request for errors that no retry can fix.
    ///
    /// # Errors
    ///
    /// Returns `TicketError::Validation` describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.payment_transaction_id.trim().is_empty() {
            return Err(TicketError::Validation(
                "payment_transaction_id is required".into(),
            ));
        }
        if self.passenger_phone.trim().is_empty() {
            return Err(TicketError::Validation("passenger_phone is required".into()));
        }
        if self.amount_cents <= 0 {
            return Err(TicketError::Validation(format!(
                "amount must be positive, got {}",
                self.amount_cents
            )));
        }
        if !(0.0..=MAX_COMMISSION_RATE).contains(&self.commission_rate) {
            return Err(TicketError::Validation(format!(
                "commission rate must be within 0..=100, got {}",
                self.commission_rate
            )));
        }
        Ok(())
    }

    /// Split the paid amount into platform commission and company net.
    #[must_use]
    pub fn commission(&self) -> Commission {
        Commission::compute(self.amount_cents, self.commission_rate)
    }
}

/// Commission split of a ticket payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commission {
    /// Platform share, in cents.
    pub commission_cents: i64,
    /// Company share, in cents.
    pub net_cents: i64,
}

impl Commission {
    /// Compute the split, rounding the commission to the nearest cent.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    pub fn compute(amount_cents: i64, commission_rate: f64) -> Self {
        let commission_cents = (amount_cents as f64 * commission_rate / 100.0).round() as i64;
        let commission_cents = commission_cents.clamp(0, amount_cents.max(0));
        Self {
            commission_cents,
            net_cents: amount_cents - commission_cents,
        }
    }
}

/// Lifecycle of a ticket. Validation at boarding (outside this crate) moves it to `Used`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Issued, not yet presented.
    Pending,
    /// Presented and validated.
    Used,
}

/// A persisted ticket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketRecord {
    /// Ticket id.
    pub id: TicketId,
    /// Company operating the route.
    pub company_id: CompanyId,
    /// Route the ticket is valid on.
    pub route_id: RouteId,
    /// Passenger phone number.
    pub passenger_phone: String,
    /// Unique payment transaction id.
    pub payment_transaction_id: String,
    /// One-time boarding code.
    pub payment_otp: String,
    /// Amount paid, in cents.
    pub amount_cents: i64,
    /// Platform commission, in cents.
    pub commission_cents: i64,
    /// Company share, in cents.
    pub net_cents: i64,
    /// Current status.
    pub status: TicketStatus,
    /// When the ticket was created.
    pub created_at: DateTime<Utc>,
}

impl TicketRecord {
    /// Build a new pending ticket for a request.
    #[must_use]
    pub fn from_request(req: &TicketCreationRequest) -> Self {
        let commission = req.commission();
        Self {
            id: TicketId::generate(),
            company_id: req.company_id,
            route_id: req.route_id,
            passenger_phone: req.passenger_phone.clone(),
            payment_transaction_id: req.payment_transaction_id.clone(),
            payment_otp: req.payment_otp.clone(),
            amount_cents: req.amount_cents,
            commission_cents: commission.commission_cents,
            net_cents: commission.net_cents,
            status: TicketStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Reporting record written alongside a newly created ticket.
///
/// The ticket is the source of truth; a missing companion record never
/// invalidates the ticket it describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketTransaction {
    /// Entry id (ULID).
    pub id: LedgerEntryId,
    /// Ticket this entry describes.
    pub ticket_id: TicketId,
    /// Company credited with the net amount.
    pub company_id: CompanyId,
    /// Payment transaction id of the ticket.
    pub payment_transaction_id: String,
    /// Amount paid, in cents.
    pub amount_cents: i64,
    /// Platform commission, in cents.
    pub commission_cents: i64,
    /// Company share, in cents.
    pub net_cents: i64,
    /// When the entry was written.
    pub created_at: DateTime<Utc>,
}

impl TicketTransaction {
    /// Build the companion entry for a ticket.
    #[must_use]
    pub fn for_ticket(ticket: &TicketRecord) -> Self {
        Self {
            id: LedgerEntryId::generate(),
            ticket_id: ticket.id,
            company_id: ticket.company_id,
            payment_transaction_id: ticket.payment_transaction_id.clone(),
            amount_cents: ticket.amount_cents,
            commission_cents: ticket.commission_cents,
            net_cents: ticket.net_cents,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(amount_cents: i64, commission_rate: f64) -> TicketCreationRequest {
        TicketCreationRequest {
            company_id: CompanyId::generate(),
            route_id: RouteId::generate(),
            passenger_phone: "+255700000001".into(),
            payment_transaction_id: "pay_001".into(),
            payment_otp: "4821".into(),
            amount_cents,
            commission_rate,
        }
    }

    #[test]
    fn commission_rounds_to_nearest_cent() {
        let split = Commission::compute(1999, 5.0);
        assert_eq!(split.commission_cents, 100);
        assert_eq!(split.net_cents, 1899);
    }

    #[test]
    fn zero_rate_leaves_everything_to_company() {
        let split = Commission::compute(5000, 0.0);
        assert_eq!(split.commission_cents, 0);
        assert_eq!(split.net_cents, 5000);
    }

    #[test]
    fn validate_rejects_non_positive_amount() {
        assert!(matches!(
            request(0, 5.0).validate(),
            Err(TicketError::Validation(_))
        ));
    }

    #[test]
    fn validate_rejects_rate_out_of_range() {
        assert!(request(1000, 120.0).validate().is_err());
        assert!(request(1000, -1.0).validate().is_err());
        assert!(request(1000, 7.5).validate().is_ok());
    }

    #[test]
    fn validate_rejects_blank_transaction_id() {
        let mut req = request(1000, 5.0);
        req.payment_transaction_id = "  ".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn record_carries_commission_split() {
        let req = request(2000, 10.0);
        let ticket = TicketRecord::from_request(&req);
        assert_eq!(ticket.commission_cents, 200);
        assert_eq!(ticket.net_cents, 1800);
        assert_eq!(ticket.status, TicketStatus::Pending);

        let entry = TicketTransaction::for_ticket(&ticket);
        assert_eq!(entry.ticket_id, ticket.id);
        assert_eq!(entry.net_cents, 1800);
    }
}
