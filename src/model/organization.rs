use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString, ToSchema)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum OrgStatus {
    PendingPayment,
    Active,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(example = json!({
    "id": 1,
    "code": "acme",
    "name": "Acme Corporation",
    "email": "admin@acme.test",
    "address": "Makati City",
    "status": "active",
    "created_at": "2026-01-01T00:00:00Z"
}))]
pub struct Organization {
    pub id: u64,
    pub code: String,
    pub name: String,
    pub email: String,
    pub address: Option<String>,
    pub status: String,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

impl Organization {
    pub fn status(&self) -> Option<OrgStatus> {
        self.status.parse().ok()
    }
}

/// Lowercases and trims an org code; returns `None` when the code is not
/// 3-32 characters of `[a-z0-9-]` or starts/ends with a dash.
pub fn normalize_org_code(raw: &str) -> Option<String> {
    let code = raw.trim().to_lowercase();
    let valid_len = (3..=32).contains(&code.len());
    let valid_chars = code
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if valid_len && valid_chars && !code.starts_with('-') && !code.ends_with('-') {
        Some(code)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn org_codes_are_lowercased() {
        assert_eq!(normalize_org_code("  Acme-HR "), Some("acme-hr".to_string()));
    }

    #[test]
    fn org_codes_reject_bad_shapes() {
        assert_eq!(normalize_org_code("ab"), None);
        assert_eq!(normalize_org_code("-acme"), None);
        assert_eq!(normalize_org_code("acme corp"), None);
        assert_eq!(normalize_org_code(&"a".repeat(33)), None);
    }

    #[test]
    fn status_round_trips_through_strings() {
        assert_eq!(OrgStatus::PendingPayment.as_ref(), "pending_payment");
        assert_eq!("suspended".parse::<OrgStatus>().unwrap(), OrgStatus::Suspended);
    }
}
