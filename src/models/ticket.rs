use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgExecutor};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Active,
    Used,
    Transferred,
    Refunded,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Active => "active",
            TicketStatus::Used => "used",
            TicketStatus::Transferred => "transferred",
            TicketStatus::Refunded => "refunded",
        }
    }

    /// A transferred ticket stays valid for entry under its new owner.
    pub fn is_admissible(&self) -> bool {
        matches!(self, TicketStatus::Active | TicketStatus::Transferred)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a ticket's append-only ownership ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub from_owner: Uuid,
    pub to_owner: Uuid,
    #[sqlx(rename = "transferred_at")]
    pub timestamp: DateTime<Utc>,
    pub external_tx_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub event_id: Uuid,
    pub ticket_type: String,
    pub owner_id: Uuid,
    /// Price at purchase time, in minor currency units
    pub price: i64,
    pub status: TicketStatus,
    pub verification_code: String,
    /// `data:image/png;base64,...` QR code of the signed payload
    pub qr_payload: Option<String>,
    pub transfer_history: Vec<TransferRecord>,
    pub purchased_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
struct TicketRow {
    id: Uuid,
    event_id: Uuid,
    ticket_type: String,
    owner_id: Uuid,
    price: i64,
    status: TicketStatus,
    verification_code: String,
    qr_payload: Option<String>,
    purchased_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
}

impl TicketRow {
    fn into_ticket(self, transfer_history: Vec<TransferRecord>) -> Ticket {
        Ticket {
            id: self.id,
            event_id: self.event_id,
            ticket_type: self.ticket_type,
            owner_id: self.owner_id,
            price: self.price,
            status: self.status,
            verification_code: self.verification_code,
            qr_payload: self.qr_payload,
            transfer_history,
            purchased_at: self.purchased_at,
            used_at: self.used_at,
        }
    }
}

/// A ticket about to be issued. The price is taken from the ticket type
/// when inventory is reserved.
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub id: Uuid,
    pub event_id: Uuid,
    pub ticket_type: String,
    pub owner_id: Uuid,
    pub verification_code: String,
    pub qr_payload: Option<String>,
    pub purchased_at: DateTime<Utc>,
}

impl NewTicket {
    pub fn into_ticket(self, price: i64) -> Ticket {
        Ticket {
            id: self.id,
            event_id: self.event_id,
            ticket_type: self.ticket_type,
            owner_id: self.owner_id,
            price,
            status: TicketStatus::Active,
            verification_code: self.verification_code,
            qr_payload: self.qr_payload,
            transfer_history: Vec::new(),
            purchased_at: self.purchased_at,
            used_at: None,
        }
    }
}

impl Ticket {
    pub async fn insert(executor: impl PgExecutor<'_>, ticket: &Ticket) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO tickets (
                id, event_id, ticket_type, owner_id, price, status,
                verification_code, qr_payload, purchased_at, used_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(ticket.id)
        .bind(ticket.event_id)
        .bind(&ticket.ticket_type)
        .bind(ticket.owner_id)
        .bind(ticket.price)
        .bind(ticket.status)
        .bind(&ticket.verification_code)
        .bind(&ticket.qr_payload)
        .bind(ticket.purchased_at)
        .bind(ticket.used_at)
        .execute(executor)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let Some(row) = sqlx::query_as::<_, TicketRow>("SELECT * FROM tickets WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
        else {
            return Ok(None);
        };

        let history = Self::transfer_history(&mut *conn, id).await?;

        Ok(Some(row.into_ticket(history)))
    }

    /// Tickets currently held by a user, newest first
    pub async fn list_by_owner(conn: &mut PgConnection, owner_id: Uuid) -> Result<Vec<Self>, sqlx::Error> {
        let rows = sqlx::query_as::<_, TicketRow>(
            r#"
            SELECT * FROM tickets
            WHERE owner_id = $1
            ORDER BY purchased_at DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&mut *conn)
        .await?;

        Self::with_history(conn, rows).await
    }

    /// Tickets held by the user registered with this wallet address, newest first
    pub async fn list_by_wallet(conn: &mut PgConnection, address: &str) -> Result<Vec<Self>, sqlx::Error> {
        let rows = sqlx::query_as::<_, TicketRow>(
            r#"
            SELECT t.* FROM tickets t
            JOIN users u ON u.id = t.owner_id
            WHERE u.wallet_address = $1
            ORDER BY t.purchased_at DESC
            "#,
        )
        .bind(address)
        .fetch_all(&mut *conn)
        .await?;

        Self::with_history(conn, rows).await
    }

    async fn with_history(conn: &mut PgConnection, rows: Vec<TicketRow>) -> Result<Vec<Self>, sqlx::Error> {
        let mut tickets = Vec::with_capacity(rows.len());
        for row in rows {
            let history = Self::transfer_history(&mut *conn, row.id).await?;
            tickets.push(row.into_ticket(history));
        }

        Ok(tickets)
    }

    pub async fn transfer_history(
        executor: impl PgExecutor<'_>,
        ticket_id: Uuid,
    ) -> Result<Vec<TransferRecord>, sqlx::Error> {
        sqlx::query_as::<_, TransferRecord>(
            r#"
            SELECT from_owner, to_owner, transferred_at, external_tx_ref
            FROM ticket_transfers
            WHERE ticket_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(ticket_id)
        .fetch_all(executor)
        .await
    }

    /// Persists the mutable fields: owner, status, QR payload and use time.
    /// Price and verification code never change after issue.
    ///
    /// Only writes if the stored status still equals `expected`; returns
    /// `false` when another request changed the ticket first.
    pub async fn save(
        executor: impl PgExecutor<'_>,
        ticket: &Ticket,
        expected: TicketStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE tickets
            SET owner_id = $2, status = $3, qr_payload = $4, used_at = $5
            WHERE id = $1 AND status = $6
            "#,
        )
        .bind(ticket.id)
        .bind(ticket.owner_id)
        .bind(ticket.status)
        .bind(&ticket.qr_payload)
        .bind(ticket.used_at)
        .bind(expected)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn append_transfer(
        executor: impl PgExecutor<'_>,
        ticket_id: Uuid,
        record: &TransferRecord,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO ticket_transfers (ticket_id, from_owner, to_owner, transferred_at, external_tx_ref)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(ticket_id)
        .bind(record.from_owner)
        .bind(record.to_owner)
        .bind(record.timestamp)
        .bind(&record.external_tx_ref)
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Deletes the ticket only while its status is still `expected`
    pub async fn delete(
        executor: impl PgExecutor<'_>,
        id: Uuid,
        expected: TicketStatus,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tickets WHERE id = $1 AND status = $2")
            .bind(id)
            .bind(expected)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
