use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{Extensions, HeaderMap},
    response::Response,
};
use chrono::Utc;
use rusqlite::Connection;

use crate::db::AppState;
use crate::error::Result;
use crate::ledger::{self, Outcome};
use crate::models::Tenant;
use crate::protocol::{self, CardRequest, Reply, SignedHeaders};
use crate::util::client_ip;

use super::body_fields;

/// Which ledger operation a card call dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CardAction {
    Verify,
    Consume,
}

/// Repeatable verification: activates on first use and binds the device.
pub async fn verify_card(
    State(state): State<AppState>,
    headers: HeaderMap,
    extensions: Extensions,
    Query(query): Query<CardRequest>,
    body: Bytes,
) -> Result<Response> {
    let request = body_fields(&body)?.or_query(query);
    let ip = client_ip(&headers, &extensions);
    card_call(&state, &headers, request, ip.as_deref(), CardAction::Verify)
}

/// Shared pipeline for card calls. Errors before the tenant is known are
/// returned plain; everything after goes through the tenant's envelope.
pub(super) fn card_call(
    state: &AppState,
    headers: &HeaderMap,
    request: CardRequest,
    ip: Option<&str>,
    action: CardAction,
) -> Result<Response> {
    let signed = SignedHeaders::from_headers(headers);
    let mut conn = state.db.get()?;
    let tenant = protocol::resolve_tenant(&conn, &signed)?;

    let now = Utc::now();
    let reply = match dispatch(&mut conn, &tenant, &signed, &request, ip, action, now.timestamp()) {
        Ok(reply) => reply,
        Err(err) => Reply::from_error(&err),
    };
    Ok(protocol::finish(&tenant, reply, now))
}

fn dispatch(
    conn: &mut Connection,
    tenant: &Tenant,
    signed: &SignedHeaders,
    request: &CardRequest,
    ip: Option<&str>,
    action: CardAction,
    now: i64,
) -> Result<Reply> {
    protocol::authenticate(tenant, signed, request.signable(), now, protocol::REDEEM_WINDOW_SECS)?;
    let call = protocol::open_request(tenant, request)?;

    let outcome = match action {
        CardAction::Verify => ledger::verify(conn, &call.code, &tenant.id, call.machine.as_deref(), now)?,
        CardAction::Consume => ledger::redeem(conn, &call.code, &tenant.id, ip, now)?,
    };

    let message = match (&outcome, action) {
        (Outcome::Accepted(_), CardAction::Verify) => "Verification successful",
        (Outcome::Accepted(_), CardAction::Consume) => "Card redeemed",
        (Outcome::Rejected { .. }, _) => "",
    };
    Ok(Reply::from_outcome(&outcome, message))
}
