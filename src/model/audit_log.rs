use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct AuditLog {
    pub id: u64,
    pub org_id: Option<u64>,
    pub user_id: Option<u64>,
    #[schema(example = "department.create")]
    pub action: String,
    #[schema(example = "department")]
    pub entity: String,
    pub entity_id: Option<u64>,
    /// JSON encoded
    pub details: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}
