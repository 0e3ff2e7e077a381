use chrono::{DateTime, Duration, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Expiry reported for cards that never expire: 2099-12-12 00:00:00 UTC.
pub const PERMANENT_EXPIRE_TS: i64 = 4_100_716_800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CardStatus {
    New,
    Activated,
    Used,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum ExpireUnit {
    Minutes,
    Hours,
    Days,
    Months,
    Quarters,
    Years,
    Forever,
}

/// Validity granted on first activation, stored with the card until then.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_value: Option<i64>,
    /// Kept as free text: unrecognised units are treated as days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expire_unit: Option<String>,
}

impl CardMetadata {
    pub fn new(expire_value: Option<i64>, expire_unit: Option<ExpireUnit>) -> Self {
        Self {
            expire_value,
            expire_unit: expire_unit.map(|u| u.as_ref().to_string()),
        }
    }

    /// Expiry for a card activated at `activated_at`, or `None` when the card
    /// never expires (no positive duration, no unit, or `FOREVER`).
    pub fn expire_at_from(&self, activated_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let value = self.expire_value.filter(|v| *v > 0)?;
        let unit = self
            .expire_unit
            .as_deref()?
            .parse::<ExpireUnit>()
            .unwrap_or(ExpireUnit::Days);

        let add_months = |months: i64| {
            u32::try_from(months)
                .ok()
                .and_then(|m| activated_at.checked_add_months(Months::new(m)))
        };

        match unit {
            ExpireUnit::Minutes => activated_at.checked_add_signed(Duration::try_minutes(value)?),
            ExpireUnit::Hours => activated_at.checked_add_signed(Duration::try_hours(value)?),
            ExpireUnit::Days => activated_at.checked_add_signed(Duration::try_days(value)?),
            ExpireUnit::Months => add_months(value),
            ExpireUnit::Quarters => add_months(value.checked_mul(3)?),
            ExpireUnit::Years => add_months(value.checked_mul(12)?),
            ExpireUnit::Forever => None,
        }
    }
}

/// One redeemable code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: String,
    /// Owning tenant; `None` means the card is accepted under any tenant
    pub tenant_id: Option<String>,
    pub code: String,
    pub status: CardStatus,
    pub disabled: bool,
    /// 0 = unlimited devices
    pub max_machines: i32,
    pub activated_at: Option<i64>,
    pub expire_at: Option<i64>,
    pub metadata: CardMetadata,
    /// JSON object returned on successful verification when `return_extra`
    pub extra: Option<String>,
    pub return_extra: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Card {
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.status == CardStatus::Expired || self.expire_at.is_some_and(|exp| exp < now)
    }

    pub fn belongs_to(&self, tenant_id: &str) -> bool {
        self.tenant_id.as_deref().is_none_or(|owner| owner == tenant_id)
    }

    pub fn has_machine_limit(&self) -> bool {
        self.max_machines > 0
    }

    /// Expiry as reported to clients: the permanent sentinel when unset.
    pub fn reported_expire_ts(&self) -> i64 {
        self.expire_at.unwrap_or(PERMANENT_EXPIRE_TS)
    }

    /// `%Y-%m-%d %H:%M:%S` in UTC, or `"Permanent"`.
    pub fn expire_at_readable(&self) -> String {
        self.expire_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "Permanent".to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct GenerateCards {
    #[serde(default)]
    pub prefix: Option<String>,
    pub count: usize,
    /// `X`/`x` are replaced with random characters; other characters are kept
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub suffix: Option<String>,
    #[serde(default)]
    pub expire_value: Option<i64>,
    #[serde(default)]
    pub expire_unit: Option<ExpireUnit>,
    #[serde(default)]
    pub max_machines: i32,
    #[serde(default)]
    pub extra: Option<serde_json::Value>,
    #[serde(default)]
    pub return_extra: bool,
}
