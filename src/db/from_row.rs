use std::str::FromStr;

use rusqlite::{Connection, OptionalExtension, Params, Row, types::Type};

use crate::error::Result;
use crate::models::*;

pub const TENANT_COLS: &str = "id, owner, name, api_key, secret_key, secure, encryption_alg, redeem_extra, redeem_extra_mode, announcement, version, changelog, created_at";

pub const CARD_COLS: &str = "id, tenant_id, code, status, disabled, max_machines, activated_at, expire_at, metadata, extra, return_extra, created_at, updated_at";

pub const BINDING_COLS: &str = "id, card_id, device_id, bound_at";

pub const USE_LOG_COLS: &str = "id, card_id, card_code, action, request_ip, request_user, remark, created_at";

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

pub fn query_one<T: FromRow, P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Option<T>> {
    Ok(conn.query_row(sql, params, |row| T::from_row(row)).optional()?)
}

pub fn query_all<T: FromRow, P: Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| T::from_row(row))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Parse a TEXT column into a strum enum, surfacing bad values as a
/// conversion error on that column.
fn parse_enum<E>(row: &Row, idx: usize) -> rusqlite::Result<E>
where
    E: FromStr,
    E::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

impl FromRow for Tenant {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let mode: Option<String> = row.get(8)?;
        Ok(Tenant {
            id: row.get(0)?,
            owner: row.get(1)?,
            name: row.get(2)?,
            api_key: row.get(3)?,
            secret_key: row.get(4)?,
            secure: row.get::<_, i32>(5)? != 0,
            encryption_alg: parse_enum(row, 6)?,
            redeem_extra: row.get(7)?,
            redeem_extra_mode: mode.map(|m| MergePolicy::parse_lenient(Some(&m))),
            announcement: row.get(9)?,
            version: row.get(10)?,
            changelog: row.get(11)?,
            created_at: row.get(12)?,
        })
    }
}

impl FromRow for Card {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        // Malformed metadata is treated as "no pending validity"
        let metadata: Option<String> = row.get(8)?;
        let metadata = metadata
            .and_then(|m| serde_json::from_str::<CardMetadata>(&m).ok())
            .unwrap_or_default();

        Ok(Card {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            code: row.get(2)?,
            status: parse_enum(row, 3)?,
            disabled: row.get::<_, i32>(4)? != 0,
            max_machines: row.get(5)?,
            activated_at: row.get(6)?,
            expire_at: row.get(7)?,
            metadata,
            extra: row.get(9)?,
            return_extra: row.get::<_, i32>(10)? != 0,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }
}

impl FromRow for MachineBinding {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(MachineBinding {
            id: row.get(0)?,
            card_id: row.get(1)?,
            device_id: row.get(2)?,
            bound_at: row.get(3)?,
        })
    }
}

impl FromRow for CardUseLog {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(CardUseLog {
            id: row.get(0)?,
            card_id: row.get(1)?,
            card_code: row.get(2)?,
            action: parse_enum(row, 3)?,
            request_ip: row.get(4)?,
            request_user: row.get(5)?,
            remark: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}
