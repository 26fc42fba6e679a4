use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: u64,
    pub org_id: Option<u64>,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub role_id: u8,
    pub employee_id: Option<u64>,
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub totp_secret: Option<String>,
    pub totp_enabled: bool,
    pub google_subject: Option<String>,
    pub last_login_at: Option<DateTime<Utc>>,
}

pub const USER_COLUMNS: &str = "id, org_id, email, password_hash, role_id, employee_id, is_active, \
     totp_secret, totp_enabled, google_subject, last_login_at";
