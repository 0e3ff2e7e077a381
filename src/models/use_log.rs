use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum UseAction {
    Redeem,
}

/// Audit row written when a card is consumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardUseLog {
    pub id: String,
    pub card_id: String,
    pub card_code: String,
    pub action: UseAction,
    pub request_ip: Option<String>,
    pub request_user: Option<String>,
    pub remark: Option<String>,
    pub created_at: i64,
}
