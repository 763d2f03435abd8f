use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use uuid::Uuid;

use crate::models::{
    event::{CreateEventData, Event, EventFilter, EventPage, UpdateEventData},
    ticket::{NewTicket, Ticket, TicketStatus, TransferRecord},
    user::{CreateUserData, Role, User},
};

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use postgres::PgStore;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(3))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A unique constraint rejected the write
    #[error("{0}")]
    Conflict(String),
}

/// Result of an atomic purchase attempt
#[derive(Debug, Clone)]
pub enum PurchaseOutcome {
    Issued(Ticket),
    UnknownTicketType,
    SoldOut,
}

/// Persistence for users, events and tickets.
///
/// Multi-row writes (purchase, transfer, refund, ticket deletion) are
/// atomic: either every row changes or none does.
#[async_trait]
pub trait TicketingStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn insert_user(&self, data: CreateUserData) -> Result<User, StoreError>;
    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_user_by_wallet_address(&self, address: &str)
        -> Result<Option<User>, StoreError>;
    /// Any user already holding the username, email or wallet address
    async fn find_conflicting_user(
        &self,
        username: &str,
        email: &str,
        wallet_address: Option<&str>,
    ) -> Result<Option<User>, StoreError>;
    async fn update_user_role(&self, id: Uuid, role: Role) -> Result<Option<User>, StoreError>;

    async fn insert_event(&self, data: CreateEventData) -> Result<Event, StoreError>;
    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, StoreError>;
    async fn list_events(&self, filter: &EventFilter) -> Result<EventPage, StoreError>;
    async fn update_event(
        &self,
        id: Uuid,
        data: UpdateEventData,
    ) -> Result<Option<Event>, StoreError>;
    async fn delete_event(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Takes one unit of the ticket type and inserts the ticket with the
    /// type's current price, in one step.
    async fn purchase_ticket(&self, ticket: NewTicket) -> Result<PurchaseOutcome, StoreError>;
    async fn find_ticket(&self, id: Uuid) -> Result<Option<Ticket>, StoreError>;
    async fn list_tickets_by_owner(&self, owner_id: Uuid) -> Result<Vec<Ticket>, StoreError>;
    /// Tickets held by the user registered with `address`, newest first
    async fn list_tickets_by_wallet(&self, address: &str) -> Result<Vec<Ticket>, StoreError>;
    /// Writes the ticket if its stored status is still `expected`.
    /// `false` means a concurrent request got there first.
    async fn save_ticket(&self, ticket: &Ticket, expected: TicketStatus)
        -> Result<bool, StoreError>;
    /// Saves the reassigned ticket and appends `record` to its ledger
    async fn record_transfer(
        &self,
        ticket: &Ticket,
        expected: TicketStatus,
        record: &TransferRecord,
    ) -> Result<bool, StoreError>;
    /// Saves the refunded ticket and returns its unit to inventory
    async fn refund_ticket(&self, ticket: &Ticket, expected: TicketStatus)
        -> Result<bool, StoreError>;
    /// Deletes the ticket if its stored status is still `expected`. The seat
    /// goes back to inventory when `expected` is admissible.
    async fn delete_ticket(&self, ticket: &Ticket, expected: TicketStatus)
        -> Result<bool, StoreError>;
}
