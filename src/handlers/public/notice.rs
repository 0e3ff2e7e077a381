use axum::{extract::State, http::HeaderMap, response::Response};
use chrono::Utc;
use serde_json::Map;

use crate::db::AppState;
use crate::error::Result;
use crate::protocol::{self, Reply, SignedHeaders};

/// Tenant announcement, version and changelog. Signed over the timestamp
/// alone with the read window.
pub async fn get_notice(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let signed = SignedHeaders::from_headers(&headers);
    let conn = state.db.get()?;
    let tenant = protocol::resolve_tenant(&conn, &signed)?;
    let now = Utc::now().timestamp();

    let reply = match protocol::authenticate(&tenant, &signed, "", now, protocol::READ_WINDOW_SECS) {
        Ok(()) => {
            let mut body = Map::new();
            body.insert("success".into(), true.into());
            body.insert("announcement".into(), tenant.announcement.clone().into());
            body.insert("version".into(), tenant.version.clone().into());
            body.insert("changelog".into(), tenant.changelog.clone().into());
            Reply::ok(body)
        }
        Err(err) => Reply::from_error(&err),
    };
    Ok(protocol::respond(&tenant, reply, now))
}
