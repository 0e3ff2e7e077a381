use serde::{Deserialize, Serialize};

/// A device that has passed verification for a card. Unique per
/// `(card_id, device_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineBinding {
    pub id: String,
    pub card_id: String,
    pub device_id: String,
    pub bound_at: i64,
}
