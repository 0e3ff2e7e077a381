//! Card state machine: repeatable verification with device bindings, and
//! the terminal one-shot redeem.
//!
//! Both operations run inside an IMMEDIATE transaction, so precondition reads
//! and the writes that follow see one snapshot. The writes are conditional
//! (`WHERE status = 'NEW'`, `INSERT OR IGNORE`): activation happens at most
//! once per card and a binding is never counted twice.

use chrono::{TimeZone, Utc};
use rusqlite::{Connection, TransactionBehavior};

use crate::db::queries;
use crate::error::Result;
use crate::models::{Card, CardStatus, UseAction};

/// Why a card was refused. Each variant maps to a stable client-facing code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotFound,
    Disabled,
    WrongTenant,
    Expired { expired_at: Option<i64> },
    MissingDevice,
    QuotaExceeded,
    /// Card already consumed by a one-shot redeem
    Consumed,
}

impl Rejection {
    pub fn code(&self) -> i32 {
        match self {
            Self::NotFound => 1001,
            Self::Disabled => 1002,
            Self::WrongTenant => 1003,
            Self::Expired { .. } => 1004,
            Self::QuotaExceeded | Self::Consumed => 1005,
            Self::MissingDevice => 1006,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::NotFound => "Card does not exist",
            Self::Disabled => "Card is disabled",
            Self::WrongTenant => "Card does not belong to this application",
            Self::Expired { .. } => "Card has expired",
            Self::MissingDevice => "Machine code is required",
            Self::QuotaExceeded => "Machine limit reached for this card",
            Self::Consumed => "Card has already been used",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Outcome {
    /// The card as stored after this call's side effects
    Accepted(Card),
    Rejected {
        reason: Rejection,
        /// Reported expiry of the card, when it was found
        expire_ts: Option<i64>,
    },
}

impl Outcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }

    fn refused(reason: Rejection, card: &Card) -> Self {
        Self::Rejected {
            reason,
            expire_ts: Some(card.reported_expire_ts()),
        }
    }
}

/// Checks shared by verify and redeem, in order. Returns the card when all
/// pass. An expired card is marked EXPIRED in the caller's transaction.
fn check_card(
    conn: &Connection,
    code: &str,
    tenant_id: &str,
    now: i64,
) -> Result<std::result::Result<Card, Outcome>> {
    let Some(card) = queries::get_card_by_code(conn, code)? else {
        return Ok(Err(Outcome::Rejected {
            reason: Rejection::NotFound,
            expire_ts: None,
        }));
    };
    if card.disabled {
        return Ok(Err(Outcome::refused(Rejection::Disabled, &card)));
    }
    if !card.belongs_to(tenant_id) {
        return Ok(Err(Outcome::refused(Rejection::WrongTenant, &card)));
    }
    if card.is_expired_at(now) {
        queries::mark_card_expired(conn, &card.id)?;
        let reason = Rejection::Expired {
            expired_at: card.expire_at,
        };
        return Ok(Err(Outcome::refused(reason, &card)));
    }
    Ok(Ok(card))
}

/// Verify `code` for `device_id` under `tenant_id`.
///
/// The first success moves a NEW card to ACTIVATED and fixes its expiry from
/// the pending metadata. Every success binds the device if it is not already
/// bound; with `max_machines > 0` a new device is only accepted while the
/// card is under quota. A redeemed (USED) card keeps verifying until it
/// expires. The device id is bound exactly as sent.
pub fn verify(
    conn: &mut Connection,
    code: &str,
    tenant_id: &str,
    device_id: Option<&str>,
    now: i64,
) -> Result<Outcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let card = match check_card(&tx, code, tenant_id, now)? {
        Ok(card) => card,
        Err(rejected) => {
            // Keep the lazy EXPIRED write
            tx.commit()?;
            return Ok(rejected);
        }
    };

    let Some(device_id) = device_id.filter(|d| !d.trim().is_empty()) else {
        return Ok(Outcome::refused(Rejection::MissingDevice, &card));
    };

    if card.has_machine_limit() && !queries::binding_exists(&tx, &card.id, device_id)? {
        let bound = queries::count_bindings_for_card(&tx, &card.id)?;
        if bound >= card.max_machines {
            tracing::info!(
                "Card {} refused device {} ({}/{} bound)",
                card.code,
                device_id,
                bound,
                card.max_machines
            );
            return Ok(Outcome::refused(Rejection::QuotaExceeded, &card));
        }
    }

    if card.status == CardStatus::New {
        let expire_at = Utc
            .timestamp_opt(now, 0)
            .single()
            .and_then(|activated| card.metadata.expire_at_from(activated))
            .map(|dt| dt.timestamp());
        if queries::try_activate_card(&tx, &card.id, now, expire_at)? {
            tracing::info!("Card {} activated for tenant {}", card.code, tenant_id);
        }
    }

    if queries::insert_binding(&tx, &card.id, device_id)? {
        tracing::debug!("Card {} bound to device {}", card.code, device_id);
    }

    let card = queries::get_card_by_id(&tx, &card.id)?.unwrap_or(card);
    tx.commit()?;
    Ok(Outcome::Accepted(card))
}

/// One-shot redeem: moves the card straight to USED and records a use log.
/// A second redeem of the same card is always rejected.
pub fn redeem(
    conn: &mut Connection,
    code: &str,
    tenant_id: &str,
    request_ip: Option<&str>,
    now: i64,
) -> Result<Outcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let card = match check_card(&tx, code, tenant_id, now)? {
        Ok(card) => card,
        Err(rejected) => {
            tx.commit()?;
            return Ok(rejected);
        }
    };

    // USED cards fail the status condition
    if !queries::try_consume_card(&tx, &card.id, now)? {
        return Ok(Outcome::refused(Rejection::Consumed, &card));
    }
    queries::create_use_log(
        &tx,
        &card,
        UseAction::Redeem,
        request_ip,
        None,
        Some("redeemed via public API"),
    )?;

    let card = queries::get_card_by_id(&tx, &card.id)?.unwrap_or(card);
    tx.commit()?;
    tracing::info!("Card {} redeemed for tenant {}", card.code, tenant_id);
    Ok(Outcome::Accepted(card))
}
