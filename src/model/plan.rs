use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(example = json!({
    "id": 2,
    "code": "starter",
    "name": "Starter",
    "price_cents": 99900,
    "currency": "PHP",
    "max_employees": 50,
    "is_active": true
}))]
pub struct Plan {
    pub id: u64,
    pub code: String,
    pub name: String,
    /// Monthly price in the smallest currency unit
    pub price_cents: i64,
    pub currency: String,
    pub max_employees: u32,
    pub is_active: bool,
}

impl Plan {
    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }
}
