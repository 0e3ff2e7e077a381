use axum::{Json, extract::State};
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::{CreateTenant, GenerateCards};

const MAX_CARDS_PER_BATCH: usize = 1000;

#[derive(Debug, Serialize)]
pub struct DevTenantCreated {
    pub tenant_id: String,
    pub api_key: String,
    /// Key actually used for signing: the secret, or the API key when unset
    pub signing_key: String,
    pub secure: bool,
    pub encryption_alg: String,
}

pub async fn create_dev_tenant(
    State(state): State<AppState>,
    Json(mut input): Json<CreateTenant>,
) -> Result<Json<DevTenantCreated>> {
    if input.name.trim().is_empty() {
        return Err(AppError::BadRequest("name must not be empty".into()));
    }
    if input.secret_key.is_none() {
        input.secret_key = Some(queries::generate_secret_key());
    }

    let conn = state.db.get()?;
    let tenant = queries::create_tenant(&conn, &input)?;

    tracing::info!("DEV: Created tenant {} ({})", tenant.name, tenant.id);

    Ok(Json(DevTenantCreated {
        signing_key: tenant.signing_key().to_string(),
        tenant_id: tenant.id,
        api_key: tenant.api_key,
        secure: tenant.secure,
        encryption_alg: tenant.encryption_alg.as_ref().to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct DevGenerateCards {
    pub tenant_id: String,
    #[serde(flatten)]
    pub cards: GenerateCards,
}

#[derive(Debug, Serialize)]
pub struct DevCardsCreated {
    pub tenant_id: String,
    pub requested: usize,
    pub codes: Vec<String>,
}

pub async fn create_dev_cards(
    State(state): State<AppState>,
    Json(input): Json<DevGenerateCards>,
) -> Result<Json<DevCardsCreated>> {
    if input.cards.count == 0 || input.cards.count > MAX_CARDS_PER_BATCH {
        return Err(AppError::BadRequest(format!(
            "count must be between 1 and {}",
            MAX_CARDS_PER_BATCH
        )));
    }

    let mut conn = state.db.get()?;
    queries::get_tenant_by_id(&conn, &input.tenant_id)?
        .ok_or_else(|| AppError::NotFound("Tenant not found".into()))?;

    let cards = queries::generate_cards(&mut conn, &input.tenant_id, &input.cards)?;

    tracing::info!(
        "DEV: Generated {}/{} cards for tenant {}",
        cards.len(),
        input.cards.count,
        input.tenant_id
    );

    Ok(Json(DevCardsCreated {
        tenant_id: input.tenant_id,
        requested: input.cards.count,
        codes: cards.into_iter().map(|c| c.code).collect(),
    }))
}
