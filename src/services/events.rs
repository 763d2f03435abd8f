use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::TicketingStore;
use crate::error::{AppError, Result};
use crate::models::event::{
    CreateEventData, Event, EventFilter, EventPage, EventStatus, NewTicketType, UpdateEventData,
};
use crate::models::Role;
use crate::services::inventory;
use crate::services::policy::{self, Action, Actor};

/// Largest page a client may request
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub title: String,
    pub description: Option<String>,
    pub date: DateTime<Utc>,
    pub location: String,
    pub category: Option<String>,
    pub status: Option<EventStatus>,
    pub ticket_types: Vec<NewTicketType>,
}

fn required(value: &str, field: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(value.to_string())
}

/// Creates an event owned by the actor
pub async fn create_event(store: &dyn TicketingStore, actor: &Actor, input: NewEvent) -> Result<Event> {
    policy::require_role(actor, &[Role::Organizer, Role::Admin], Action::CreateEvent)?;

    let title = required(&input.title, "Title")?;
    let location = required(&input.location, "Location")?;

    inventory::validate_new(&input.ticket_types)?;
    let ticket_types = input
        .ticket_types
        .into_iter()
        .map(|t| NewTicketType {
            name: t.name.trim().to_string(),
            ..t
        })
        .collect();

    let event = store
        .insert_event(CreateEventData {
            title,
            description: input.description.unwrap_or_default(),
            date: input.date,
            location,
            category: input.category.filter(|c| !c.trim().is_empty()),
            organizer_id: actor.id,
            status: input.status.unwrap_or_default(),
            ticket_types,
        })
        .await?;

    tracing::info!(event_id = %event.id, organizer_id = %actor.id, "Event created");

    Ok(event)
}

/// Clamps paging values into a usable range
pub fn normalize_filter(mut filter: EventFilter) -> EventFilter {
    filter.page = filter.page.max(1);
    filter.limit = filter.limit.clamp(1, MAX_PAGE_SIZE);
    filter
}

pub async fn list_events(store: &dyn TicketingStore, filter: EventFilter) -> Result<(EventPage, EventFilter)> {
    let filter = normalize_filter(filter);
    let page = store.list_events(&filter).await?;
    Ok((page, filter))
}

pub async fn get_event(store: &dyn TicketingStore, id: Uuid) -> Result<Event> {
    store
        .find_event(id)
        .await?
        .ok_or_else(|| AppError::not_found("Event"))
}

/// Applies the provided fields. Ticket types are fixed once the event exists.
pub async fn update_event(
    store: &dyn TicketingStore,
    actor: &Actor,
    id: Uuid,
    mut changes: UpdateEventData,
) -> Result<Event> {
    let event = get_event(store, id).await?;
    policy::authorize(actor, &[event.organizer_id], Action::UpdateEvent)?;

    if let Some(title) = changes.title.take() {
        changes.title = Some(required(&title, "Title")?);
    }
    if let Some(location) = changes.location.take() {
        changes.location = Some(required(&location, "Location")?);
    }

    let updated = store
        .update_event(id, changes)
        .await?
        .ok_or_else(|| AppError::not_found("Event"))?;

    tracing::info!(event_id = %id, updated_by = %actor.id, "Event updated");

    Ok(updated)
}

/// Removes the event together with its ticket types and tickets
pub async fn delete_event(store: &dyn TicketingStore, actor: &Actor, id: Uuid) -> Result<()> {
    let event = get_event(store, id).await?;
    policy::authorize(actor, &[event.organizer_id], Action::DeleteEvent)?;

    if !store.delete_event(id).await? {
        return Err(AppError::not_found("Event"));
    }

    tracing::info!(event_id = %id, deleted_by = %actor.id, "Event deleted");

    Ok(())
}
