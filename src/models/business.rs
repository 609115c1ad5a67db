use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    pub owner_phone: Option<String>,
    /// UPI payee address used for UPI payment intents.
    pub upi_id: Option<String>,
    pub suspended: bool,
}
