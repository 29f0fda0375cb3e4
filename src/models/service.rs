use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceItem {
    pub id: String,
    pub business_id: String,
    pub name: String,
    pub aliases: Vec<String>,
    pub duration_minutes: i64,
    pub deposit_required: bool,
    pub active: bool,
}
