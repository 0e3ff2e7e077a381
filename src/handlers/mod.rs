pub mod dev;
pub mod public;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::db::AppState;

/// Full application router. The `/api` routes sit behind the per-client
/// rate limit; `/dev` routes exist only in dev mode.
pub fn router(state: AppState) -> Router {
    let api = public::api_router().layer(middleware::from_fn_with_state(
        state.clone(),
        crate::middleware::rate_limit,
    ));

    let mut app = Router::new()
        .route("/health", get(public::health))
        .nest("/api", api);

    if state.dev_mode {
        app = app
            .route("/dev/tenants", post(dev::create_dev_tenant))
            .route("/dev/cards", post(dev::create_dev_cards));
    }

    app.with_state(state)
}
