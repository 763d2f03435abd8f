use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::extract::{ApiJson, ApiPath, ApiQuery};
use crate::api::middleware::auth::CurrentUser;
use crate::api::middleware::session::AppState;
use crate::api::response::{self, Envelope, Pagination};
use crate::error::{AppError, Result};
use crate::models::event::{EventFilter, EventStatus, NewTicketType, UpdateEventData};
use crate::services::events::{self, NewEvent};

// Request/Response types
#[derive(Debug, Default, Deserialize)]
pub struct ListEventsQuery {
    pub status: Option<String>,
    pub category: Option<String>,
    pub upcoming: Option<String>,
    pub organizer: Option<String>,
    pub search: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    pub title: String,
    pub description: Option<String>,
    pub date: DateTime<Utc>,
    pub location: String,
    pub category: Option<String>,
    pub status: Option<EventStatus>,
    pub ticket_types: Vec<NewTicketType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEventRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub status: Option<EventStatus>,
}

fn parse_status(value: &str) -> Result<EventStatus> {
    match value {
        "draft" => Ok(EventStatus::Draft),
        "published" => Ok(EventStatus::Published),
        other => Err(AppError::Validation(format!("Unknown event status: {}", other))),
    }
}

/// Positive integer, or the default for anything unparseable
fn parse_positive(value: Option<&str>, default: i64) -> i64 {
    value
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ListEventsQuery {
    pub fn into_filter(self, now: DateTime<Utc>) -> Result<EventFilter> {
        let defaults = EventFilter::default();

        let status = match self.status.as_deref() {
            Some(value) => parse_status(value)?,
            None => defaults.status,
        };
        let organizer_id = match non_blank(self.organizer) {
            Some(value) => Some(Uuid::parse_str(&value).map_err(|_| {
                AppError::Validation("organizer must be a user id".to_string())
            })?),
            None => None,
        };

        Ok(EventFilter {
            status,
            category: non_blank(self.category),
            upcoming_after: (self.upcoming.as_deref() == Some("true")).then_some(now),
            organizer_id,
            search: non_blank(self.search),
            page: parse_positive(self.page.as_deref(), defaults.page),
            limit: parse_positive(self.limit.as_deref(), defaults.limit),
        })
    }
}

// Handlers

async fn list_events(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ListEventsQuery>,
) -> Result<impl IntoResponse> {
    let filter = query.into_filter(Utc::now())?;
    let (page, filter) = events::list_events(state.store.as_ref(), filter).await?;

    let pagination = Pagination::new(filter.page, filter.limit, page.total);

    Ok(Json(Envelope::page(page.events, page.total, pagination)))
}

async fn get_event(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<impl IntoResponse> {
    let event = events::get_event(state.store.as_ref(), id).await?;
    Ok(response::ok(event))
}

async fn create_event(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiJson(payload): ApiJson<CreateEventRequest>,
) -> Result<impl IntoResponse> {
    let event = events::create_event(
        state.store.as_ref(),
        &actor,
        NewEvent {
            title: payload.title,
            description: payload.description,
            date: payload.date,
            location: payload.location,
            category: payload.category,
            status: payload.status,
            ticket_types: payload.ticket_types,
        },
    )
    .await?;

    Ok(response::created(event))
}

async fn update_event(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<UpdateEventRequest>,
) -> Result<impl IntoResponse> {
    let changes = UpdateEventData {
        title: payload.title,
        description: payload.description,
        date: payload.date,
        location: payload.location,
        category: payload.category,
        status: payload.status,
    };

    let event = events::update_event(state.store.as_ref(), &actor, id, changes).await?;

    Ok(response::ok(event))
}

async fn delete_event(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<impl IntoResponse> {
    events::delete_event(state.store.as_ref(), &actor, id).await?;

    Ok(Json(Envelope::new(()).with_message("Event deleted")))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/events", get(list_events).post(create_event))
        .route(
            "/events/:id",
            get(get_event).put(update_event).delete(delete_event),
        )
}
