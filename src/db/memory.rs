//! In-process store used by unit and HTTP tests.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{PurchaseOutcome, StoreError, TicketingStore};
use crate::models::{
    event::{CreateEventData, Event, EventFilter, EventPage, TicketType, UpdateEventData},
    ticket::{NewTicket, Ticket, TicketStatus, TransferRecord},
    user::{CreateUserData, Role, User},
};
use crate::services::inventory::{self, InventoryError};

#[derive(Default)]
struct Tables {
    users: Vec<User>,
    events: Vec<Event>,
    tickets: Vec<Ticket>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_filter(event: &Event, filter: &EventFilter) -> bool {
    if event.status != filter.status {
        return false;
    }
    if let Some(category) = &filter.category {
        if event.category.as_ref() != Some(category) {
            return false;
        }
    }
    if let Some(after) = filter.upcoming_after {
        if event.date < after {
            return false;
        }
    }
    if let Some(organizer_id) = filter.organizer_id {
        if event.organizer_id != organizer_id {
            return false;
        }
    }
    if let Some(search) = &filter.search {
        let needle = search.to_lowercase();
        if !event.title.to_lowercase().contains(&needle)
            && !event.description.to_lowercase().contains(&needle)
        {
            return false;
        }
    }
    true
}

fn release_seat(events: &mut [Event], ticket: &Ticket) {
    if let Some(event) = events.iter_mut().find(|e| e.id == ticket.event_id) {
        let _ = inventory::release(&mut event.ticket_types, &ticket.ticket_type);
    }
}

/// Overwrites the stored ticket if its status is still `expected`
fn compare_and_save(tickets: &mut [Ticket], ticket: &Ticket, expected: TicketStatus) -> bool {
    match tickets.iter_mut().find(|t| t.id == ticket.id) {
        Some(stored) if stored.status == expected => {
            *stored = ticket.clone();
            true
        }
        _ => false,
    }
}

#[async_trait]
impl TicketingStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_user(&self, data: CreateUserData) -> Result<User, StoreError> {
        let mut tables = self.tables.lock().await;

        let taken = tables.users.iter().any(|u| {
            u.username == data.username
                || u.email.eq_ignore_ascii_case(&data.email)
                || (data.wallet_address.is_some() && u.wallet_address == data.wallet_address)
        });
        if taken {
            return Err(StoreError::Conflict(
                "User with this username, email or wallet address already exists".to_string(),
            ));
        }

        let user = User {
            id: Uuid::new_v4(),
            username: data.username,
            email: data.email,
            wallet_address: data.wallet_address,
            role: data.role,
            password_hash: data.password_hash,
            created_at: Utc::now(),
        };
        tables.users.push(user.clone());

        Ok(user)
    }

    async fn find_user(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user_by_wallet_address(
        &self,
        address: &str,
    ) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .iter()
            .find(|u| u.wallet_address.as_deref() == Some(address))
            .cloned())
    }

    async fn find_conflicting_user(
        &self,
        username: &str,
        email: &str,
        wallet_address: Option<&str>,
    ) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .iter()
            .find(|u| {
                u.username == username
                    || u.email.eq_ignore_ascii_case(email)
                    || (wallet_address.is_some() && u.wallet_address.as_deref() == wallet_address)
            })
            .cloned())
    }

    async fn update_user_role(&self, id: Uuid, role: Role) -> Result<Option<User>, StoreError> {
        let mut tables = self.tables.lock().await;
        Ok(tables.users.iter_mut().find(|u| u.id == id).map(|user| {
            user.role = role;
            user.clone()
        }))
    }

    async fn insert_event(&self, data: CreateEventData) -> Result<Event, StoreError> {
        let now = Utc::now();
        let event = Event {
            id: Uuid::new_v4(),
            title: data.title,
            description: data.description,
            date: data.date,
            location: data.location,
            category: data.category,
            organizer_id: data.organizer_id,
            status: data.status,
            ticket_types: data
                .ticket_types
                .into_iter()
                .map(|t| TicketType {
                    name: t.name,
                    price: t.price,
                    total_quantity: t.total_quantity,
                    available_quantity: t.total_quantity,
                })
                .collect(),
            created_at: now,
            updated_at: now,
        };

        self.tables.lock().await.events.push(event.clone());

        Ok(event)
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.events.iter().find(|e| e.id == id).cloned())
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<EventPage, StoreError> {
        let tables = self.tables.lock().await;

        let mut matching: Vec<&Event> = tables
            .events
            .iter()
            .filter(|e| matches_filter(e, filter))
            .collect();
        matching.sort_by_key(|e| (e.date, e.created_at));

        let total = matching.len() as i64;
        let events = matching
            .into_iter()
            .skip(usize::try_from(filter.offset()).unwrap_or(usize::MAX))
            .take(usize::try_from(filter.limit).unwrap_or(0))
            .cloned()
            .collect();

        Ok(EventPage { events, total })
    }

    async fn update_event(
        &self,
        id: Uuid,
        data: UpdateEventData,
    ) -> Result<Option<Event>, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(event) = tables.events.iter_mut().find(|e| e.id == id) else {
            return Ok(None);
        };

        if let Some(title) = data.title {
            event.title = title;
        }
        if let Some(description) = data.description {
            event.description = description;
        }
        if let Some(date) = data.date {
            event.date = date;
        }
        if let Some(location) = data.location {
            event.location = location;
        }
        if let Some(category) = data.category {
            event.category = Some(category);
        }
        if let Some(status) = data.status {
            event.status = status;
        }
        event.updated_at = Utc::now();

        Ok(Some(event.clone()))
    }

    async fn delete_event(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let before = tables.events.len();
        tables.events.retain(|e| e.id != id);
        if tables.events.len() == before {
            return Ok(false);
        }
        tables.tickets.retain(|t| t.event_id != id);

        Ok(true)
    }

    async fn purchase_ticket(&self, ticket: NewTicket) -> Result<PurchaseOutcome, StoreError> {
        let mut tables = self.tables.lock().await;
        let Some(event) = tables.events.iter_mut().find(|e| e.id == ticket.event_id) else {
            return Ok(PurchaseOutcome::UnknownTicketType);
        };

        let price = match inventory::reserve(&mut event.ticket_types, &ticket.ticket_type) {
            Ok(price) => price,
            Err(InventoryError::SoldOut) => return Ok(PurchaseOutcome::SoldOut),
            Err(_) => return Ok(PurchaseOutcome::UnknownTicketType),
        };

        let ticket = ticket.into_ticket(price);
        tables.tickets.push(ticket.clone());

        Ok(PurchaseOutcome::Issued(ticket))
    }

    async fn find_ticket(&self, id: Uuid) -> Result<Option<Ticket>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.tickets.iter().find(|t| t.id == id).cloned())
    }

    async fn list_tickets_by_owner(&self, owner_id: Uuid) -> Result<Vec<Ticket>, StoreError> {
        let tables = self.tables.lock().await;
        let mut tickets: Vec<Ticket> = tables
            .tickets
            .iter()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect();
        tickets.sort_by(|a, b| b.purchased_at.cmp(&a.purchased_at));

        Ok(tickets)
    }

    async fn list_tickets_by_wallet(&self, address: &str) -> Result<Vec<Ticket>, StoreError> {
        let owner_id = {
            let tables = self.tables.lock().await;
            tables
                .users
                .iter()
                .find(|u| u.wallet_address.as_deref() == Some(address))
                .map(|u| u.id)
        };
        match owner_id {
            Some(owner_id) => self.list_tickets_by_owner(owner_id).await,
            None => Ok(Vec::new()),
        }
    }

    async fn save_ticket(
        &self,
        ticket: &Ticket,
        expected: TicketStatus,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        Ok(compare_and_save(&mut tables.tickets, ticket, expected))
    }

    async fn record_transfer(
        &self,
        ticket: &Ticket,
        expected: TicketStatus,
        _record: &TransferRecord,
    ) -> Result<bool, StoreError> {
        // The ledger travels inside the ticket value here
        let mut tables = self.tables.lock().await;
        Ok(compare_and_save(&mut tables.tickets, ticket, expected))
    }

    async fn refund_ticket(
        &self,
        ticket: &Ticket,
        expected: TicketStatus,
    ) -> Result<bool, StoreError> {
        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;
        if !compare_and_save(&mut tables.tickets, ticket, expected) {
            return Ok(false);
        }
        release_seat(&mut tables.events, ticket);

        Ok(true)
    }

    async fn delete_ticket(
        &self,
        ticket: &Ticket,
        expected: TicketStatus,
    ) -> Result<bool, StoreError> {
        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;
        let Some(index) = tables
            .tickets
            .iter()
            .position(|t| t.id == ticket.id && t.status == expected)
        else {
            return Ok(false);
        };
        tables.tickets.remove(index);
        if expected.is_admissible() {
            release_seat(&mut tables.events, ticket);
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::models::event::{EventStatus, NewTicketType};

    fn event_data(organizer_id: Uuid, title: &str, days_ahead: i64, vip: i32) -> CreateEventData {
        CreateEventData {
            title: title.to_string(),
            description: format!("{} description", title),
            date: Utc::now() + Duration::days(days_ahead),
            location: "Main Hall".to_string(),
            category: Some("music".to_string()),
            organizer_id,
            status: EventStatus::Published,
            ticket_types: vec![NewTicketType {
                name: "VIP".to_string(),
                price: 5000,
                total_quantity: vip,
            }],
        }
    }

    fn new_ticket(event_id: Uuid, ticket_type: &str) -> NewTicket {
        NewTicket {
            id: Uuid::new_v4(),
            event_id,
            ticket_type: ticket_type.to_string(),
            owner_id: Uuid::new_v4(),
            verification_code: "ABCDEF012345".to_string(),
            qr_payload: None,
            purchased_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_last_seat_goes_to_exactly_one_buyer() {
        let store = Arc::new(MemoryStore::new());
        let event = store
            .insert_event(event_data(Uuid::new_v4(), "Finale", 3, 1))
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let ticket = new_ticket(event.id, "VIP");
                tokio::spawn(async move { store.purchase_ticket(ticket).await.unwrap() })
            })
            .collect();

        let mut issued = 0;
        let mut sold_out = 0;
        for handle in handles {
            match handle.await.unwrap() {
                PurchaseOutcome::Issued(_) => issued += 1,
                PurchaseOutcome::SoldOut => sold_out += 1,
                PurchaseOutcome::UnknownTicketType => panic!("ticket type should exist"),
            }
        }

        assert_eq!(issued, 1);
        assert_eq!(sold_out, 7);

        let event = store.find_event(event.id).await.unwrap().unwrap();
        assert_eq!(event.ticket_types[0].available_quantity, 0);
    }

    #[tokio::test]
    async fn test_unknown_ticket_type() {
        let store = MemoryStore::new();
        let event = store
            .insert_event(event_data(Uuid::new_v4(), "Gig", 1, 5))
            .await
            .unwrap();

        let outcome = store
            .purchase_ticket(new_ticket(event.id, "Backstage"))
            .await
            .unwrap();

        assert!(matches!(outcome, PurchaseOutcome::UnknownTicketType));
    }

    #[tokio::test]
    async fn test_stale_save_is_rejected() {
        let store = MemoryStore::new();
        let event = store
            .insert_event(event_data(Uuid::new_v4(), "Gig", 1, 5))
            .await
            .unwrap();
        let PurchaseOutcome::Issued(mut ticket) = store
            .purchase_ticket(new_ticket(event.id, "VIP"))
            .await
            .unwrap()
        else {
            panic!("purchase should succeed");
        };

        ticket.status = TicketStatus::Used;
        assert!(store.save_ticket(&ticket, TicketStatus::Active).await.unwrap());
        assert!(!store.save_ticket(&ticket, TicketStatus::Active).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_filters_and_paginates() {
        let store = MemoryStore::new();
        let organizer = Uuid::new_v4();
        for (title, days) in [("Jazz Night", 5), ("Rock Night", 1), ("Jazz Brunch", 3)] {
            store
                .insert_event(event_data(organizer, title, days, 10))
                .await
                .unwrap();
        }

        let filter = EventFilter {
            search: Some("jazz".to_string()),
            limit: 1,
            ..Default::default()
        };
        let page = store.list_events(&filter).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].title, "Jazz Brunch");

        let second = store
            .list_events(&EventFilter { page: 2, ..filter })
            .await
            .unwrap();
        assert_eq!(second.events[0].title, "Jazz Night");

        let drafts = store
            .list_events(&EventFilter {
                status: EventStatus::Draft,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(drafts.total, 0);
    }

    #[tokio::test]
    async fn test_delete_event_removes_its_tickets() {
        let store = MemoryStore::new();
        let event = store
            .insert_event(event_data(Uuid::new_v4(), "Gig", 1, 5))
            .await
            .unwrap();
        let PurchaseOutcome::Issued(ticket) = store
            .purchase_ticket(new_ticket(event.id, "VIP"))
            .await
            .unwrap()
        else {
            panic!("purchase should succeed");
        };

        assert!(store.delete_event(event.id).await.unwrap());
        assert!(store.find_ticket(ticket.id).await.unwrap().is_none());
        assert!(!store.delete_event(event.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_after_refund_releases_seat_once() {
        let store = MemoryStore::new();
        let event = store
            .insert_event(event_data(Uuid::new_v4(), "Gig", 1, 2))
            .await
            .unwrap();
        let mut sold = Vec::new();
        for _ in 0..2 {
            let PurchaseOutcome::Issued(ticket) = store
                .purchase_ticket(new_ticket(event.id, "VIP"))
                .await
                .unwrap()
            else {
                panic!("purchase should succeed");
            };
            sold.push(ticket);
        }

        // A refund lands after the delete request has read the ticket
        let stale = sold[0].clone();
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

        let event = store.find_event(event.id).await.unwrap().unwrap();
        assert_eq!(event.ticket_types[0].available_quantity, 1);
        assert!(store.find_ticket(stale.id).await.unwrap().is_some());

        // Deleting with the current status works and releases nothing more
        assert!(store
            .delete_ticket(&refunded, TicketStatus::Refunded)
            .await
            .unwrap());
        let event = store.find_event(event.id).await.unwrap().unwrap();
        assert_eq!(event.ticket_types[0].available_quantity, 1);
    }
}
