use chrono::Utc;
use rand::Rng;
use rusqlite::{Connection, params};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::*;

use super::from_row::{BINDING_COLS, CARD_COLS, TENANT_COLS, USE_LOG_COLS, query_all, query_one};

/// Alphabet for generated card codes (no 0/O, 1/I/L ambiguity)
const CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const DEFAULT_CODE_LEN: usize = 16;

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

fn random_token(prefix: &str, len: usize) -> String {
    use rand::distributions::Alphanumeric;
    let body: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, body)
}

// ============ Tenants ============

pub fn generate_api_key() -> String {
    random_token("ak_", 24)
}

pub fn generate_secret_key() -> String {
    random_token("", 32)
}

pub fn create_tenant(conn: &Connection, input: &CreateTenant) -> Result<Tenant> {
    let id = gen_id();
    let now = now();
    let api_key = generate_api_key();
    let redeem_extra = input.redeem_extra.as_ref().map(|v| v.to_string());

    conn.execute(
        "INSERT INTO tenants (id, owner, name, api_key, secret_key, secure, encryption_alg, redeem_extra, redeem_extra_mode, announcement, version, changelog, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            &id,
            &input.owner,
            &input.name,
            &api_key,
            &input.secret_key,
            input.secure as i32,
            input.encryption_alg.as_ref(),
            &redeem_extra,
            input.redeem_extra_mode.map(|m| m.as_ref().to_string()),
            &input.announcement,
            &input.version,
            &input.changelog,
            now
        ],
    )?;

    Ok(Tenant {
        id,
        owner: input.owner.clone(),
        name: input.name.clone(),
        api_key,
        secret_key: input.secret_key.clone(),
        secure: input.secure,
        encryption_alg: input.encryption_alg,
        redeem_extra,
        redeem_extra_mode: input.redeem_extra_mode,
        announcement: input.announcement.clone(),
        version: input.version.clone(),
        changelog: input.changelog.clone(),
        created_at: now,
    })
}

pub fn get_tenant_by_id(conn: &Connection, id: &str) -> Result<Option<Tenant>> {
    query_one(
        conn,
        &format!("SELECT {} FROM tenants WHERE id = ?1", TENANT_COLS),
        params![id],
    )
}

pub fn get_tenant_by_api_key(conn: &Connection, api_key: &str) -> Result<Option<Tenant>> {
    query_one(
        conn,
        &format!("SELECT {} FROM tenants WHERE api_key = ?1", TENANT_COLS),
        params![api_key],
    )
}

// ============ Cards ============

/// Build a card code from an optional pattern (`X`/`x` become random
/// characters), joined with hyphens to a trimmed prefix and suffix.
pub fn generate_card_code(prefix: Option<&str>, pattern: Option<&str>, suffix: Option<&str>) -> String {
    let mut rng = rand::thread_rng();
    let mut random_char = || CODE_CHARS[rng.gen_range(0..CODE_CHARS.len())] as char;

    let core: String = match pattern.filter(|p| !p.trim().is_empty()) {
        Some(p) => p
            .chars()
            .map(|c| if c == 'x' || c == 'X' { random_char() } else { c })
            .collect(),
        None => (0..DEFAULT_CODE_LEN).map(|_| random_char()).collect(),
    };

    let mut parts: Vec<&str> = Vec::with_capacity(3);
    if let Some(p) = prefix.map(str::trim).filter(|p| !p.is_empty()) {
        parts.push(p);
    }
    parts.push(&core);
    if let Some(s) = suffix.map(str::trim).filter(|s| !s.is_empty()) {
        parts.push(s);
    }
    parts.join("-")
}

#[derive(Debug, Default)]
pub struct NewCard<'a> {
    pub tenant_id: Option<&'a str>,
    pub code: &'a str,
    pub metadata: CardMetadata,
    pub max_machines: i32,
    pub extra: Option<String>,
    pub return_extra: bool,
}

/// Insert a single card in status NEW with no expiry.
pub fn create_card(conn: &Connection, input: &NewCard) -> Result<Card> {
    let id = gen_id();
    let now = now();
    let metadata = serde_json::to_string(&input.metadata)
        .map_err(|e| AppError::Internal(format!("metadata serialization: {}", e)))?;

    conn.execute(
        "INSERT INTO cards (id, tenant_id, code, status, disabled, max_machines, activated_at, expire_at, metadata, extra, return_extra, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, NULL, NULL, ?6, ?7, ?8, ?9, ?9)",
        params![
            &id,
            input.tenant_id,
            input.code,
            CardStatus::New.as_ref(),
            input.max_machines.max(0),
            &metadata,
            &input.extra,
            input.return_extra as i32,
            now
        ],
    )?;

    Ok(Card {
        id,
        tenant_id: input.tenant_id.map(String::from),
        code: input.code.to_string(),
        status: CardStatus::New,
        disabled: false,
        max_machines: input.max_machines.max(0),
        activated_at: None,
        expire_at: None,
        metadata: input.metadata.clone(),
        extra: input.extra.clone(),
        return_extra: input.return_extra,
        created_at: now,
        updated_at: now,
    })
}

/// Bulk-create cards for a tenant in one transaction. Codes that collide
/// with existing ones are skipped, so fewer than `count` may be returned.
pub fn generate_cards(conn: &mut Connection, tenant_id: &str, input: &GenerateCards) -> Result<Vec<Card>> {
    let metadata = CardMetadata::new(input.expire_value, input.expire_unit);
    let extra = input.extra.as_ref().map(|v| v.to_string());

    let tx = conn.transaction()?;
    let mut created = Vec::with_capacity(input.count);
    for _ in 0..input.count {
        let code = generate_card_code(
            input.prefix.as_deref(),
            input.pattern.as_deref(),
            input.suffix.as_deref(),
        );
        if card_code_exists(&tx, &code)? {
            continue;
        }
        let card = create_card(
            &tx,
            &NewCard {
                tenant_id: Some(tenant_id),
                code: &code,
                metadata: metadata.clone(),
                max_machines: input.max_machines,
                extra: extra.clone(),
                return_extra: input.return_extra,
            },
        )?;
        created.push(card);
    }
    tx.commit()?;
    Ok(created)
}

fn card_code_exists(conn: &Connection, code: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM cards WHERE code = ?1",
        params![code],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn get_card_by_code(conn: &Connection, code: &str) -> Result<Option<Card>> {
    query_one(
        conn,
        &format!("SELECT {} FROM cards WHERE code = ?1", CARD_COLS),
        params![code],
    )
}

pub fn get_card_by_id(conn: &Connection, id: &str) -> Result<Option<Card>> {
    query_one(
        conn,
        &format!("SELECT {} FROM cards WHERE id = ?1", CARD_COLS),
        params![id],
    )
}

pub fn set_card_disabled(conn: &Connection, id: &str, disabled: bool) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE cards SET disabled = ?1, updated_at = ?2 WHERE id = ?3",
        params![disabled as i32, now(), id],
    )?;
    Ok(affected > 0)
}

/// First-activation compare-and-swap: only a card still in NEW is moved to
/// ACTIVATED, so `activated_at`/`expire_at` are written at most once.
///
/// Returns `Ok(true)` if this call performed the activation.
pub fn try_activate_card(
    conn: &Connection,
    id: &str,
    activated_at: i64,
    expire_at: Option<i64>,
) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE cards
         SET status = 'ACTIVATED',
             activated_at = COALESCE(activated_at, ?1),
             expire_at = COALESCE(expire_at, ?2),
             updated_at = ?1
         WHERE id = ?3 AND status = 'NEW'",
        params![activated_at, expire_at, id],
    )?;
    Ok(affected > 0)
}

/// One-shot consume. USED is terminal, so a second caller always loses.
pub fn try_consume_card(conn: &Connection, id: &str, now: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE cards
         SET status = 'USED',
             activated_at = COALESCE(activated_at, ?1),
             updated_at = ?1
         WHERE id = ?2 AND status IN ('NEW', 'ACTIVATED')",
        params![now, id],
    )?;
    Ok(affected > 0)
}

/// Record the lazily observed EXPIRED status. Consumed cards keep USED.
pub fn mark_card_expired(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE cards SET status = 'EXPIRED', updated_at = ?1
         WHERE id = ?2 AND status IN ('NEW', 'ACTIVATED')",
        params![now(), id],
    )?;
    Ok(())
}

// ============ Machine Bindings ============

pub fn binding_exists(conn: &Connection, card_id: &str, device_id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM machine_bindings WHERE card_id = ?1 AND device_id = ?2",
        params![card_id, device_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn count_bindings_for_card(conn: &Connection, card_id: &str) -> Result<i32> {
    conn.query_row(
        "SELECT COUNT(*) FROM machine_bindings WHERE card_id = ?1",
        params![card_id],
        |row| row.get(0),
    )
    .map_err(Into::into)
}

/// Insert a binding if absent. Returns true when a new row was created.
pub fn insert_binding(conn: &Connection, card_id: &str, device_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "INSERT OR IGNORE INTO machine_bindings (id, card_id, device_id, bound_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![gen_id(), card_id, device_id, now()],
    )?;
    Ok(affected > 0)
}

pub fn list_bindings_for_card(conn: &Connection, card_id: &str) -> Result<Vec<MachineBinding>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM machine_bindings WHERE card_id = ?1 ORDER BY bound_at ASC",
            BINDING_COLS
        ),
        params![card_id],
    )
}

// ============ Use Logs ============

pub fn create_use_log(
    conn: &Connection,
    card: &Card,
    action: UseAction,
    request_ip: Option<&str>,
    request_user: Option<&str>,
    remark: Option<&str>,
) -> Result<CardUseLog> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO card_use_logs (id, card_id, card_code, action, request_ip, request_user, remark, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![&id, &card.id, &card.code, action.as_ref(), request_ip, request_user, remark, now],
    )?;

    Ok(CardUseLog {
        id,
        card_id: card.id.clone(),
        card_code: card.code.clone(),
        action,
        request_ip: request_ip.map(String::from),
        request_user: request_user.map(String::from),
        remark: remark.map(String::from),
        created_at: now,
    })
}

pub fn list_use_logs_for_card(conn: &Connection, card_id: &str) -> Result<Vec<CardUseLog>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM card_use_logs WHERE card_id = ?1 ORDER BY created_at ASC",
            USE_LOG_COLS
        ),
        params![card_id],
    )
}
