use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{PurchaseOutcome, StoreError, TicketingStore};
use crate::models::{
    event::{CreateEventData, Event, EventFilter, EventPage, TicketType, UpdateEventData},
    ticket::{NewTicket, Ticket, TicketStatus, TransferRecord},
    user::{CreateUserData, Role, User},
};

/// PostgreSQL-backed store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn conflict_or_database(err: sqlx::Error, message: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StoreError::Conflict(message.to_string())
        }
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl TicketingStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_user(&self, data: CreateUserData) -> Result<User, StoreError> {
        User::create(&self.pool, data).await.map_err(|e| {
            conflict_or_database(
                e,
                "User with this username, email or wallet address already exists",
            )
        })
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(User::find_by_id(&self.pool, id).await?)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        Ok(User::find_by_email(&self.pool, email).await?)
    }

    async fn find_user_by_wallet_address(
        &self,
        address: &str,
    ) -> Result<Option<User>, StoreError> {
        Ok(User::find_by_wallet_address(&self.pool, address).await?)
    }

    async fn find_conflicting_user(
        &self,
        username: &str,
        email: &str,
        wallet_address: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        Ok(User::find_conflicting(&self.pool, username, email, wallet_address).await?)
    }

    async fn update_user_role(&self, id: Uuid, role: Role) -> Result<Option<User>, StoreError> {
        Ok(User::update_role(&self.pool, id, role).await?)
    }

    async fn insert_event(&self, data: CreateEventData) -> Result<Event, StoreError> {
        let mut tx = self.pool.begin().await?;
        let event = Event::create(&mut tx, data)
            .await
            .map_err(|e| conflict_or_database(e, "Ticket type names must be unique"))?;
        tx.commit().await?;

        Ok(event)
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(Event::find_by_id(&mut conn, id).await?)
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<EventPage, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(Event::list(&mut conn, filter).await?)
    }

    async fn update_event(
        &self,
        id: Uuid,
        data: UpdateEventData,
    ) -> Result<Option<Event>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(Event::update(&mut conn, id, data).await?)
    }

    async fn delete_event(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(Event::delete(&self.pool, id).await?)
    }

    async fn purchase_ticket(&self, ticket: NewTicket) -> Result<PurchaseOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let Some(price) =
            TicketType::reserve_one(&mut *tx, ticket.event_id, &ticket.ticket_type).await?
        else {
            let exists = TicketType::exists(&mut *tx, ticket.event_id, &ticket.ticket_type).await?;
            tx.rollback().await?;

            return Ok(if exists {
                PurchaseOutcome::SoldOut
            } else {
                PurchaseOutcome::UnknownTicketType
            });
        };

        let ticket = ticket.into_ticket(price);
        Ticket::insert(&mut *tx, &ticket).await?;
        tx.commit().await?;

        Ok(PurchaseOutcome::Issued(ticket))
    }

    async fn find_ticket(&self, id: Uuid) -> Result<Option<Ticket>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(Ticket::find_by_id(&mut conn, id).await?)
    }

    async fn list_tickets_by_owner(&self, owner_id: Uuid) -> Result<Vec<Ticket>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(Ticket::list_by_owner(&mut conn, owner_id).await?)
    }

    async fn list_tickets_by_wallet(&self, address: &str) -> Result<Vec<Ticket>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(Ticket::list_by_wallet(&mut conn, address).await?)
    }

    async fn save_ticket(
        &self,
        ticket: &Ticket,
        expected: TicketStatus,
    ) -> Result<bool, StoreError> {
        Ok(Ticket::save(&self.pool, ticket, expected).await?)
    }

    async fn record_transfer(
        &self,
        ticket: &Ticket,
        expected: TicketStatus,
        record: &TransferRecord,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        if !Ticket::save(&mut *tx, ticket, expected).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        Ticket::append_transfer(&mut *tx, ticket.id, record).await?;
        tx.commit().await?;

        Ok(true)
    }

    async fn refund_ticket(
        &self,
        ticket: &Ticket,
        expected: TicketStatus,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        if !Ticket::save(&mut *tx, ticket, expected).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        TicketType::release_one(&mut *tx, ticket.event_id, &ticket.ticket_type).await?;
        tx.commit().await?;

        Ok(true)
    }

    async fn delete_ticket(
        &self,
        ticket: &Ticket,
        expected: TicketStatus,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;
        if !Ticket::delete(&mut *tx, ticket.id, expected).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        if expected.is_admissible() {
            TicketType::release_one(&mut *tx, ticket.event_id, &ticket.ticket_type).await?;
        }
        tx.commit().await?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::event::{EventStatus, NewTicketType};

    async fn organizer(store: &PgStore) -> User {
        store
            .insert_user(CreateUserData {
                username: "olga".to_string(),
                email: "olga@example.com".to_string(),
                wallet_address: Some("0x01ga".to_string()),
                role: Role::Organizer,
                password_hash: "unused".to_string(),
            })
            .await
            .unwrap()
    }

    async fn event(store: &PgStore, organizer_id: Uuid, title: &str, vip: i32) -> Event {
        store
            .insert_event(CreateEventData {
                title: title.to_string(),
                description: format!("{} description", title),
                date: Utc::now() + Duration::days(7),
                location: "Main Hall".to_string(),
                category: Some("music".to_string()),
                organizer_id,
                status: EventStatus::Published,
                ticket_types: vec![NewTicketType {
                    name: "VIP".to_string(),
                    price: 5000,
                    total_quantity: vip,
                }],
            })
            .await
            .unwrap()
    }

    fn new_ticket(event_id: Uuid, owner_id: Uuid, ticket_type: &str) -> NewTicket {
        NewTicket {
            id: Uuid::new_v4(),
            event_id,
            ticket_type: ticket_type.to_string(),
            owner_id,
            verification_code: "ABCDEF012345".to_string(),
            qr_payload: None,
            purchased_at: Utc::now(),
        }
    }

    async fn vip_available(store: &PgStore, event_id: Uuid) -> i32 {
        store.find_event(event_id).await.unwrap().unwrap().ticket_types[0].available_quantity
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a PostgreSQL DATABASE_URL"]
    async fn test_reserve_stops_at_zero(pool: PgPool) {
        let store = PgStore::new(pool);
        let owner = organizer(&store).await;
        let event = event(&store, owner.id, "Finale", 1).await;

        let first = store
            .purchase_ticket(new_ticket(event.id, owner.id, "VIP"))
            .await
            .unwrap();
        assert!(matches!(first, PurchaseOutcome::Issued(ref t) if t.price == 5000));

        let second = store
            .purchase_ticket(new_ticket(event.id, owner.id, "VIP"))
            .await
            .unwrap();
        assert!(matches!(second, PurchaseOutcome::SoldOut));

        let unknown = store
            .purchase_ticket(new_ticket(event.id, owner.id, "Backstage"))
            .await
            .unwrap();
        assert!(matches!(unknown, PurchaseOutcome::UnknownTicketType));

        assert_eq!(vip_available(&store, event.id).await, 0);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a PostgreSQL DATABASE_URL"]
    async fn test_release_is_capped_at_total(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        let owner = organizer(&store).await;
        let event = event(&store, owner.id, "Gig", 2).await;

        TicketType::release_one(&pool, event.id, "VIP").await.unwrap();
        assert_eq!(vip_available(&store, event.id).await, 2);

        assert_eq!(
            TicketType::reserve_one(&pool, event.id, "VIP").await.unwrap(),
            Some(5000)
        );
        TicketType::release_one(&pool, event.id, "VIP").await.unwrap();
        TicketType::release_one(&pool, event.id, "VIP").await.unwrap();
        assert_eq!(vip_available(&store, event.id).await, 2);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a PostgreSQL DATABASE_URL"]
    async fn test_stale_delete_after_refund(pool: PgPool) {
        let store = PgStore::new(pool);
        let owner = organizer(&store).await;
        let event = event(&store, owner.id, "Gig", 2).await;

        let PurchaseOutcome::Issued(stale) = store
            .purchase_ticket(new_ticket(event.id, owner.id, "VIP"))
            .await
            .unwrap()
        else {
            panic!("purchase should succeed");
        };
        store
            .purchase_ticket(new_ticket(event.id, owner.id, "VIP"))
            .await
            .unwrap();

        let mut refunded = stale.clone();
        refunded.status = TicketStatus::Refunded;
        assert!(store
            .refund_ticket(&refunded, TicketStatus::Active)
            .await
            .unwrap());

        assert!(!store
            .delete_ticket(&stale, TicketStatus::Active)
            .await
            .unwrap());
        assert_eq!(vip_available(&store, event.id).await, 1);

        assert!(store
            .delete_ticket(&refunded, TicketStatus::Refunded)
            .await
            .unwrap());
        assert_eq!(vip_available(&store, event.id).await, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a PostgreSQL DATABASE_URL"]
    async fn test_list_filters_and_wallet_lookup(pool: PgPool) {
        let store = PgStore::new(pool);
        let owner = organizer(&store).await;
        event(&store, owner.id, "Jazz Night", 5).await;
        let brunch = event(&store, owner.id, "Jazz_Brunch", 5).await;
        event(&store, owner.id, "Rock Night", 5).await;

        let page = store
            .list_events(&EventFilter {
                search: Some("jazz".to_string()),
                ..EventFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 2);

        // Underscore matches literally
        let page = store
            .list_events(&EventFilter {
                search: Some("z_b".to_string()),
                ..EventFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.events[0].id, brunch.id);

        let page = store
            .list_events(&EventFilter {
                search: Some("z_n".to_string()),
                ..EventFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(page.total, 0);

        let far = store
            .list_events(&EventFilter {
                page: i64::MAX,
                ..EventFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(far.total, 3);
        assert!(far.events.is_empty());

        let drafts = store
            .list_events(&EventFilter {
                status: EventStatus::Draft,
                ..EventFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(drafts.total, 0);

        store
            .purchase_ticket(new_ticket(brunch.id, owner.id, "VIP"))
            .await
            .unwrap();
        assert_eq!(store.list_tickets_by_wallet("0x01ga").await.unwrap().len(), 1);
        assert!(store.list_tickets_by_wallet("0xnone").await.unwrap().is_empty());
    }
}
