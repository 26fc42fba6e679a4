use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(example = json!({
    "id": 4,
    "name": "Engineering",
    "description": "Product and platform teams",
    "employee_count": 12,
    "created_at": "2026-01-01T00:00:00Z"
}))]
pub struct Department {
    pub id: u64,
    pub name: String,
    pub description: Option<String>,
    pub employee_count: i64,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

/// Trims and collapses inner whitespace. Returns the display name and the
/// lowercase key used for per-organization uniqueness.
pub fn normalize_department_name(raw: &str) -> Option<(String, String)> {
    let name = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if name.is_empty() || name.chars().count() > 100 {
        return None;
    }
    let key = name.to_lowercase();
    Some((name, key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_differing_in_case_and_spacing_share_a_key() {
        let (_, a) = normalize_department_name("Human  Resources").unwrap();
        let (_, b) = normalize_department_name(" human resources ").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn display_name_keeps_case() {
        let (name, key) = normalize_department_name("  Finance ").unwrap();
        assert_eq!(name, "Finance");
        assert_eq!(key, "finance");
    }

    #[test]
    fn blank_names_are_rejected() {
        assert!(normalize_department_name("   ").is_none());
        assert!(normalize_department_name(&"x".repeat(101)).is_none());
    }
}
