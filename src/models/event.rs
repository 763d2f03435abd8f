use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgExecutor, Postgres, QueryBuilder};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "event_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Draft,
    Published,
}

/// A named price/quantity tier within an event.
///
/// `available_quantity` stays within `0..=total_quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketType {
    pub name: String,
    /// Minor currency units
    pub price: i64,
    pub total_quantity: i32,
    pub available_quantity: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub date: DateTime<Utc>,
    pub location: String,
    pub category: Option<String>,
    pub organizer_id: Uuid,
    pub status: EventStatus,
    pub ticket_types: Vec<TicketType>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
struct EventRow {
    id: Uuid,
    title: String,
    description: String,
    date: DateTime<Utc>,
    location: String,
    category: Option<String>,
    organizer_id: Uuid,
    status: EventStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl EventRow {
    fn into_event(self, ticket_types: Vec<TicketType>) -> Event {
        Event {
            id: self.id,
            title: self.title,
            description: self.description,
            date: self.date,
            location: self.location,
            category: self.category,
            organizer_id: self.organizer_id,
            status: self.status,
            ticket_types,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
struct TicketTypeRow {
    event_id: Uuid,
    name: String,
    price: i64,
    total_quantity: i32,
    available_quantity: i32,
}

impl From<TicketTypeRow> for TicketType {
    fn from(row: TicketTypeRow) -> Self {
        Self {
            name: row.name,
            price: row.price,
            total_quantity: row.total_quantity,
            available_quantity: row.available_quantity,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTicketType {
    pub name: String,
    pub price: i64,
    pub total_quantity: i32,
}

#[derive(Debug, Clone)]
pub struct CreateEventData {
    pub title: String,
    pub description: String,
    pub date: DateTime<Utc>,
    pub location: String,
    pub category: Option<String>,
    pub organizer_id: Uuid,
    pub status: EventStatus,
    pub ticket_types: Vec<NewTicketType>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateEventData {
    pub title: Option<String>,
    pub description: Option<String>,
    pub date: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub category: Option<String>,
    pub status: Option<EventStatus>,
}

/// Listing filter for the public event catalogue
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub status: EventStatus,
    pub category: Option<String>,
    /// Only events on or after this instant
    pub upcoming_after: Option<DateTime<Utc>>,
    pub organizer_id: Option<Uuid>,
    /// Case-insensitive match on title or description
    pub search: Option<String>,
    pub page: i64,
    pub limit: i64,
}

impl EventFilter {
    pub fn offset(&self) -> i64 {
        (self.page - 1).max(0).saturating_mul(self.limit)
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            status: EventStatus::Published,
            category: None,
            upcoming_after: None,
            organizer_id: None,
            search: None,
            page: 1,
            limit: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventPage {
    pub events: Vec<Event>,
    pub total: i64,
}

/// Escapes `%`, `_` and `\` so user input matches literally inside ILIKE
fn like_pattern(search: &str) -> String {
    let escaped = search
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, filter: &EventFilter) {
    builder.push(" WHERE status = ").push_bind(filter.status);

    if let Some(category) = &filter.category {
        builder.push(" AND category = ").push_bind(category.clone());
    }
    if let Some(after) = filter.upcoming_after {
        builder.push(" AND date >= ").push_bind(after);
    }
    if let Some(organizer_id) = filter.organizer_id {
        builder.push(" AND organizer_id = ").push_bind(organizer_id);
    }
    if let Some(search) = &filter.search {
        let pattern = like_pattern(search);
        builder
            .push(" AND (title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

impl Event {
    /// Inserts the event and its ticket types. Run inside a transaction.
    pub async fn create(conn: &mut PgConnection, data: CreateEventData) -> Result<Self, sqlx::Error> {
        let row = sqlx::query_as::<_, EventRow>(
            r#"
            INSERT INTO events (title, description, date, location, category, organizer_id, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(data.title)
        .bind(data.description)
        .bind(data.date)
        .bind(data.location)
        .bind(data.category)
        .bind(data.organizer_id)
        .bind(data.status)
        .fetch_one(&mut *conn)
        .await?;

        let mut ticket_types = Vec::with_capacity(data.ticket_types.len());
        for (position, ticket_type) in data.ticket_types.into_iter().enumerate() {
            let inserted = sqlx::query_as::<_, TicketTypeRow>(
                r#"
                INSERT INTO ticket_types (event_id, position, name, price, total_quantity, available_quantity)
                VALUES ($1, $2, $3, $4, $5, $5)
                RETURNING event_id, name, price, total_quantity, available_quantity
                "#,
            )
            .bind(row.id)
            .bind(position as i32)
            .bind(ticket_type.name)
            .bind(ticket_type.price)
            .bind(ticket_type.total_quantity)
            .fetch_one(&mut *conn)
            .await?;

            ticket_types.push(TicketType::from(inserted));
        }

        Ok(row.into_event(ticket_types))
    }

    /// Find event by ID
    pub async fn find_by_id(conn: &mut PgConnection, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let Some(row) = sqlx::query_as::<_, EventRow>("SELECT * FROM events WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
        else {
            return Ok(None);
        };

        let ticket_types = TicketType::list_for_event(&mut *conn, id).await?;

        Ok(Some(row.into_event(ticket_types)))
    }

    /// One page of events matching the filter, sorted by date ascending
    pub async fn list(conn: &mut PgConnection, filter: &EventFilter) -> Result<EventPage, sqlx::Error> {
        let mut count_query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM events");
        push_filters(&mut count_query, filter);
        let total = count_query
            .build_query_scalar::<i64>()
            .fetch_one(&mut *conn)
            .await?;

        let mut page_query = QueryBuilder::<Postgres>::new("SELECT * FROM events");
        push_filters(&mut page_query, filter);
        page_query
            .push(" ORDER BY date ASC, created_at ASC LIMIT ")
            .push_bind(filter.limit)
            .push(" OFFSET ")
            .push_bind(filter.offset());

        let rows = page_query
            .build_query_as::<EventRow>()
            .fetch_all(&mut *conn)
            .await?;

        let ids: Vec<Uuid> = rows.iter().map(|row| row.id).collect();
        let type_rows = sqlx::query_as::<_, TicketTypeRow>(
            r#"
            SELECT event_id, name, price, total_quantity, available_quantity
            FROM ticket_types
            WHERE event_id = ANY($1)
            ORDER BY event_id, position
            "#,
        )
        .bind(&ids[..])
        .fetch_all(&mut *conn)
        .await?;

        let events = rows
            .into_iter()
            .map(|row| {
                let ticket_types = type_rows
                    .iter()
                    .filter(|t| t.event_id == row.id)
                    .cloned()
                    .map(TicketType::from)
                    .collect();
                row.into_event(ticket_types)
            })
            .collect();

        Ok(EventPage { events, total })
    }

    /// Applies the provided fields, leaving the rest untouched
    pub async fn update(
        conn: &mut PgConnection,
        id: Uuid,
        data: UpdateEventData,
    ) -> Result<Option<Self>, sqlx::Error> {
        let updated = sqlx::query(
            r#"
            UPDATE events
            SET
                title = COALESCE($2, title),
                description = COALESCE($3, description),
                date = COALESCE($4, date),
                location = COALESCE($5, location),
                category = COALESCE($6, category),
                status = COALESCE($7, status),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(data.title)
        .bind(data.description)
        .bind(data.date)
        .bind(data.location)
        .bind(data.category)
        .bind(data.status)
        .execute(&mut *conn)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(None);
        }

        Self::find_by_id(conn, id).await
    }

    /// Deletes the event; ticket types and tickets go with it
    pub async fn delete(executor: impl PgExecutor<'_>, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

impl TicketType {
    pub async fn list_for_event(
        executor: impl PgExecutor<'_>,
        event_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let rows = sqlx::query_as::<_, TicketTypeRow>(
            r#"
            SELECT event_id, name, price, total_quantity, available_quantity
            FROM ticket_types
            WHERE event_id = $1
            ORDER BY position
            "#,
        )
        .bind(event_id)
        .fetch_all(executor)
        .await?;

        Ok(rows.into_iter().map(Self::from).collect())
    }

    /// Takes one unit of availability, returning the current price.
    ///
    /// `None` when the type is missing or sold out; the row-level update
    /// guarantees two purchasers cannot both take the last unit.
    pub async fn reserve_one(
        executor: impl PgExecutor<'_>,
        event_id: Uuid,
        name: &str,
    ) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE ticket_types
            SET available_quantity = available_quantity - 1
            WHERE event_id = $1 AND name = $2 AND available_quantity > 0
            RETURNING price
            "#,
        )
        .bind(event_id)
        .bind(name)
        .fetch_optional(executor)
        .await
    }

    /// Returns one unit of availability, never above the total
    pub async fn release_one(
        executor: impl PgExecutor<'_>,
        event_id: Uuid,
        name: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE ticket_types
            SET available_quantity = LEAST(available_quantity + 1, total_quantity)
            WHERE event_id = $1 AND name = $2
            "#,
        )
        .bind(event_id)
        .bind(name)
        .execute(executor)
        .await?;

        Ok(())
    }

    pub async fn exists(
        executor: impl PgExecutor<'_>,
        event_id: Uuid,
        name: &str,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM ticket_types WHERE event_id = $1 AND name = $2)",
        )
        .bind(event_id)
        .bind(name)
        .fetch_one(executor)
        .await
    }
}
