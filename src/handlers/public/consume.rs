use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{Extensions, HeaderMap},
    response::Response,
};

use crate::db::AppState;
use crate::error::Result;
use crate::protocol::CardRequest;
use crate::util::client_ip;

use super::body_fields;
use super::verify::{CardAction, card_call};

/// One-shot redeem: the card becomes USED and cannot be redeemed again.
pub async fn consume_card(
    State(state): State<AppState>,
    headers: HeaderMap,
    extensions: Extensions,
    Query(query): Query<CardRequest>,
    body: Bytes,
) -> Result<Response> {
    let request = body_fields(&body)?.or_query(query);
    let ip = client_ip(&headers, &extensions);
    card_call(&state, &headers, request, ip.as_deref(), CardAction::Consume)
}
