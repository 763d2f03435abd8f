//! Ticket state transitions.
//!
//! ```text
//! active ──verify──▶ used
//!   │  └──transfer──▶ transferred ──verify──▶ used
//!   └──refund───────▶ refunded
//! ```
//!
//! Functions here only check and apply a transition to an in-memory
//! ticket; authorization and persistence happen in the caller.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Ticket, TicketStatus, TransferRecord};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Ticket has already been used")]
    AlreadyUsed,

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Ticket is {0} and cannot be verified")]
    NotVerifiable(TicketStatus),

    #[error("Ticket is {0} and cannot be transferred")]
    NotTransferable(TicketStatus),

    #[error("Ticket is {0} and cannot be refunded")]
    NotRefundable(TicketStatus),

    #[error("Ticket is already owned by the recipient")]
    SelfTransfer,
}

/// Marks an admissible ticket as used if `code` matches exactly.
/// On any error the ticket is left untouched.
pub fn verify(ticket: &mut Ticket, code: &str, now: DateTime<Utc>) -> Result<(), LifecycleError> {
    match ticket.status {
        TicketStatus::Used => return Err(LifecycleError::AlreadyUsed),
        status if !status.is_admissible() => return Err(LifecycleError::NotVerifiable(status)),
        _ => {}
    }

    if ticket.verification_code != code {
        return Err(LifecycleError::InvalidCode);
    }

    ticket.status = TicketStatus::Used;
    ticket.used_at = Some(now);

    Ok(())
}

/// Only an active ticket can change hands; a transferred one cannot move again.
pub fn check_transferable(ticket: &Ticket) -> Result<(), LifecycleError> {
    if ticket.status != TicketStatus::Active {
        return Err(LifecycleError::NotTransferable(ticket.status));
    }
    Ok(())
}

/// Reassigns an active ticket to `recipient` and appends one ledger entry.
/// Returns the appended entry.
pub fn transfer(
    ticket: &mut Ticket,
    recipient: Uuid,
    external_tx_ref: Option<String>,
    now: DateTime<Utc>,
) -> Result<TransferRecord, LifecycleError> {
    check_transferable(ticket)?;
    if ticket.owner_id == recipient {
        return Err(LifecycleError::SelfTransfer);
    }

    let record = TransferRecord {
        from_owner: ticket.owner_id,
        to_owner: recipient,
        timestamp: now,
        external_tx_ref,
    };

    ticket.transfer_history.push(record.clone());
    ticket.owner_id = recipient;
    ticket.status = TicketStatus::Transferred;

    Ok(record)
}

pub fn refund(ticket: &mut Ticket) -> Result<(), LifecycleError> {
    if !ticket.status.is_admissible() {
        return Err(LifecycleError::NotRefundable(ticket.status));
    }

    ticket.status = TicketStatus::Refunded;

    Ok(())
}
