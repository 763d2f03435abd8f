//! Ticket purchase, verification, transfer, refund and removal.
//!
//! Every operation loads the ticket, asks the policy whether the actor may
//! act, applies the lifecycle transition in memory and writes it back with
//! a status precondition, so two requests racing on one ticket cannot both
//! succeed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::db::{PurchaseOutcome, TicketingStore};
use crate::error::{AppError, Result};
use crate::models::ticket::NewTicket;
use crate::models::{Event, Ticket, TicketStatus};
use crate::services::inventory::{self, InventoryError};
use crate::services::lifecycle::{self, LifecycleError};
use crate::services::policy::{self, Action, Actor};
use crate::services::{credentials, qr_generator};

/// Event fields embedded in ticket responses
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    pub id: Uuid,
    pub title: String,
    pub date: DateTime<Utc>,
    pub location: String,
    pub organizer_id: Uuid,
}

impl From<&Event> for EventSummary {
    fn from(event: &Event) -> Self {
        Self {
            id: event.id,
            title: event.title.clone(),
            date: event.date,
            location: event.location.clone(),
            organizer_id: event.organizer_id,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TicketWithEvent {
    #[serde(flatten)]
    pub ticket: Ticket,
    pub event: Option<EventSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferReceipt {
    pub ticket_id: Uuid,
    pub previous_owner: Uuid,
    pub new_owner: Uuid,
    pub transfer_date: DateTime<Utc>,
}

async fn load_ticket(store: &dyn TicketingStore, id: Uuid) -> Result<Ticket> {
    store
        .find_ticket(id)
        .await?
        .ok_or_else(|| AppError::not_found("Ticket"))
}

async fn load_event(store: &dyn TicketingStore, id: Uuid) -> Result<Event> {
    store
        .find_event(id)
        .await?
        .ok_or_else(|| AppError::not_found("Event"))
}

/// The error to report when a conditional write lost a race
async fn lost_race(store: &dyn TicketingStore, id: Uuid) -> AppError {
    match store.find_ticket(id).await {
        Ok(Some(current)) if current.status == TicketStatus::Used => LifecycleError::AlreadyUsed.into(),
        Ok(Some(current)) => AppError::InvalidState(format!(
            "Ticket was changed by another request and is now {}",
            current.status
        )),
        Ok(None) => AppError::not_found("Ticket"),
        Err(e) => e.into(),
    }
}

#[tracing::instrument(skip(store, signing_key, actor), fields(buyer = %actor.id))]
pub async fn purchase(
    store: &dyn TicketingStore,
    signing_key: &[u8],
    actor: &Actor,
    event_id: Uuid,
    ticket_type: &str,
) -> Result<Ticket> {
    let event = load_event(store, event_id).await?;
    inventory::check_available(&event.ticket_types, ticket_type)?;

    let mut new_ticket = NewTicket {
        id: Uuid::new_v4(),
        event_id,
        ticket_type: ticket_type.to_string(),
        owner_id: actor.id,
        verification_code: credentials::generate_verification_code()?,
        qr_payload: None,
        purchased_at: Utc::now(),
    };
    qr_generator::ensure_qr_payload(&mut new_ticket, signing_key)?;

    match store.purchase_ticket(new_ticket).await? {
        PurchaseOutcome::Issued(ticket) => {
            tracing::info!(ticket_id = %ticket.id, price = ticket.price, "Ticket purchased");
            Ok(ticket)
        }
        PurchaseOutcome::SoldOut => {
            tracing::warn!("Ticket type sold out between check and reservation");
            Err(InventoryError::SoldOut.into())
        }
        PurchaseOutcome::UnknownTicketType => Err(InventoryError::TicketTypeNotFound.into()),
    }
}

/// Tickets currently held by the actor, newest first
pub async fn my_tickets(store: &dyn TicketingStore, actor: &Actor) -> Result<Vec<TicketWithEvent>> {
    let tickets = store.list_tickets_by_owner(actor.id).await?;
    with_events(store, tickets).await
}

async fn with_events(store: &dyn TicketingStore, tickets: Vec<Ticket>) -> Result<Vec<TicketWithEvent>> {
    let mut views = Vec::with_capacity(tickets.len());
    for ticket in tickets {
        let event = store.find_event(ticket.event_id).await?;
        views.push(TicketWithEvent {
            event: event.as_ref().map(EventSummary::from),
            ticket,
        });
    }

    Ok(views)
}

/// Tickets held by a wallet address, visible to the holder and admins
pub async fn wallet_tickets(
    store: &dyn TicketingStore,
    actor: &Actor,
    address: &str,
) -> Result<Vec<TicketWithEvent>> {
    let address = address.trim();
    let holder = store
        .find_user_by_wallet_address(address)
        .await?
        .ok_or_else(|| AppError::not_found("User"))?;
    policy::authorize(actor, &[holder.id], Action::ViewTicket)?;

    let tickets = store.list_tickets_by_wallet(address).await?;
    with_events(store, tickets).await
}

/// Visible to the owner, the event's organizer and admins
pub async fn get_ticket(store: &dyn TicketingStore, actor: &Actor, id: Uuid) -> Result<TicketWithEvent> {
    let ticket = load_ticket(store, id).await?;
    let event = load_event(store, ticket.event_id).await?;

    policy::authorize(actor, &[ticket.owner_id, event.organizer_id], Action::ViewTicket)?;

    Ok(TicketWithEvent {
        event: Some(EventSummary::from(&event)),
        ticket,
    })
}

/// PNG bytes of the ticket's QR code, generating the payload if missing
pub async fn qr_image(
    store: &dyn TicketingStore,
    signing_key: &[u8],
    actor: &Actor,
    id: Uuid,
) -> Result<Vec<u8>> {
    let mut ticket = load_ticket(store, id).await?;
    let event = load_event(store, ticket.event_id).await?;
    policy::authorize(actor, &[ticket.owner_id, event.organizer_id], Action::ViewTicket)?;

    if qr_generator::ensure_qr_payload(&mut ticket, signing_key)?
        && !store.save_ticket(&ticket, ticket.status).await?
    {
        tracing::debug!(ticket_id = %id, "Ticket changed while storing its QR payload");
    }

    let data_url = ticket
        .qr_payload
        .as_deref()
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("QR payload missing after generation")))?;

    Ok(qr_generator::decode_data_url(data_url)?)
}

#[tracing::instrument(skip(store, signing_key, actor, code), fields(actor = %actor.id))]
pub async fn verify(
    store: &dyn TicketingStore,
    signing_key: &[u8],
    actor: &Actor,
    id: Uuid,
    code: &str,
) -> Result<Ticket> {
    let mut ticket = load_ticket(store, id).await?;
    let event = load_event(store, ticket.event_id).await?;
    policy::authorize(actor, &[event.organizer_id], Action::VerifyTicket)?;

    let expected = ticket.status;
    if let Err(e) = lifecycle::verify(&mut ticket, code, Utc::now()) {
        tracing::info!(ticket_id = %id, error = %e, "Verification rejected");
        return Err(e.into());
    }
    qr_generator::ensure_qr_payload(&mut ticket, signing_key)?;

    if !store.save_ticket(&ticket, expected).await? {
        return Err(lost_race(store, id).await);
    }

    tracing::info!(ticket_id = %id, "Ticket verified");

    Ok(ticket)
}

/// Hands the ticket to the registered user with `recipient_email`.
/// Only the current owner may do this.
#[tracing::instrument(skip(store, signing_key, actor, recipient_email), fields(actor = %actor.id))]
pub async fn transfer(
    store: &dyn TicketingStore,
    signing_key: &[u8],
    actor: &Actor,
    id: Uuid,
    recipient_email: &str,
    external_tx_ref: Option<String>,
) -> Result<TransferReceipt> {
    let mut ticket = load_ticket(store, id).await?;
    policy::authorize(actor, &[ticket.owner_id], Action::TransferTicket)?;
    lifecycle::check_transferable(&ticket)?;

    let recipient = store
        .find_user_by_email(recipient_email.trim())
        .await?
        .ok_or_else(|| {
            AppError::NotFound("Recipient not found. They must register first.".to_string())
        })?;

    let expected = ticket.status;
    let record = lifecycle::transfer(&mut ticket, recipient.id, external_tx_ref, Utc::now())?;
    qr_generator::ensure_qr_payload(&mut ticket, signing_key)?;

    if !store.record_transfer(&ticket, expected, &record).await? {
        return Err(lost_race(store, id).await);
    }

    tracing::info!(ticket_id = %id, from = %record.from_owner, to = %record.to_owner, "Ticket transferred");

    Ok(TransferReceipt {
        ticket_id: ticket.id,
        previous_owner: record.from_owner,
        new_owner: record.to_owner,
        transfer_date: record.timestamp,
    })
}

/// Marks the ticket refunded and returns its seat to inventory
#[tracing::instrument(skip(store, actor), fields(actor = %actor.id))]
pub async fn refund(store: &dyn TicketingStore, actor: &Actor, id: Uuid) -> Result<Ticket> {
    let mut ticket = load_ticket(store, id).await?;
    let event = load_event(store, ticket.event_id).await?;
    policy::authorize(actor, &[event.organizer_id], Action::RefundTicket)?;

    let expected = ticket.status;
    lifecycle::refund(&mut ticket)?;

    if !store.refund_ticket(&ticket, expected).await? {
        return Err(lost_race(store, id).await);
    }

    tracing::info!(ticket_id = %id, "Ticket refunded");

    Ok(ticket)
}

/// Removes the ticket. A still-admissible ticket gives its seat back.
#[tracing::instrument(skip(store, actor), fields(actor = %actor.id))]
pub async fn delete(store: &dyn TicketingStore, actor: &Actor, id: Uuid) -> Result<()> {
    let ticket = load_ticket(store, id).await?;
    let event = load_event(store, ticket.event_id).await?;
    policy::authorize(actor, &[event.organizer_id], Action::DeleteTicket)?;

    if !store.delete_ticket(&ticket, ticket.status).await? {
        return Err(lost_race(store, id).await);
    }

    tracing::info!(ticket_id = %id, "Ticket deleted");

    Ok(())
}
