use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::extract::{ApiJson, ApiPath};
use crate::api::middleware::auth::CurrentUser;
use crate::api::middleware::session::AppState;
use crate::api::response::{self, Envelope};
use crate::error::Result;
use crate::services::ticketing;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub event_id: Uuid,
    pub ticket_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub verification_code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub recipient_email: String,
    /// Reference to an external (e.g. on-chain) transfer, recorded as-is
    pub transaction_hash: Option<String>,
}

async fn purchase(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiJson(payload): ApiJson<PurchaseRequest>,
) -> Result<impl IntoResponse> {
    let ticket = ticketing::purchase(
        state.store.as_ref(),
        state.signing_key(),
        &actor,
        payload.event_id,
        &payload.ticket_type,
    )
    .await?;

    Ok(response::created(ticket))
}

async fn my_tickets(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
) -> Result<impl IntoResponse> {
    let tickets = ticketing::my_tickets(state.store.as_ref(), &actor).await?;
    Ok(Json(Envelope::list(tickets)))
}

async fn wallet_tickets(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(address): ApiPath<String>,
) -> Result<impl IntoResponse> {
    let tickets = ticketing::wallet_tickets(state.store.as_ref(), &actor, &address).await?;
    Ok(Json(Envelope::list(tickets)))
}

async fn get_ticket(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<impl IntoResponse> {
    let ticket = ticketing::get_ticket(state.store.as_ref(), &actor, id).await?;
    Ok(response::ok(ticket))
}

async fn qr_code(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<impl IntoResponse> {
    let png = ticketing::qr_image(state.store.as_ref(), state.signing_key(), &actor, id).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png))
}

async fn verify(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<VerifyRequest>,
) -> Result<impl IntoResponse> {
    let ticket = ticketing::verify(
        state.store.as_ref(),
        state.signing_key(),
        &actor,
        id,
        &payload.verification_code,
    )
    .await?;

    Ok(Json(Envelope::new(ticket).with_message("Ticket verified successfully")))
}

async fn transfer(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<TransferRequest>,
) -> Result<impl IntoResponse> {
    let receipt = ticketing::transfer(
        state.store.as_ref(),
        state.signing_key(),
        &actor,
        id,
        &payload.recipient_email,
        payload.transaction_hash,
    )
    .await?;

    Ok(Json(Envelope::new(receipt).with_message("Ticket transferred successfully")))
}

async fn refund(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<impl IntoResponse> {
    let ticket = ticketing::refund(state.store.as_ref(), &actor, id).await?;
    Ok(Json(Envelope::new(ticket).with_message("Ticket refunded")))
}

async fn remove(
    State(state): State<AppState>,
    CurrentUser(actor): CurrentUser,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<impl IntoResponse> {
    ticketing::delete(state.store.as_ref(), &actor, id).await?;
    Ok(Json(Envelope::new(()).with_message("Ticket deleted")))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tickets/purchase", post(purchase))
        .route("/tickets/my-tickets", get(my_tickets))
        .route("/tickets/wallet/:address", get(wallet_tickets))
        .route("/tickets/:id", get(get_ticket).delete(remove))
        .route("/tickets/:id/qr", get(qr_code))
        .route("/tickets/:id/verify", put(verify))
        .route("/tickets/:id/transfer", put(transfer))
        .route("/tickets/:id/refund", put(refund))
}
