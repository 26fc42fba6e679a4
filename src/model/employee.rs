use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum EmployeeStatus {
    Active,
    Inactive,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(
    example = json!({
        "id": 1,
        "department_id": 10,
        "employee_code": "EMP-001",
        "first_name": "Juan",
        "last_name": "Dela Cruz",
        "email": "juan@acme.test",
        "phone": "+639171234567",
        "position": "Payroll Officer",
        "hire_date": "2024-01-01",
        "status": "active",
        "photo_url": null,
        "created_at": "2024-01-01T00:00:00Z"
    })
)]
pub struct Employee {
    #[schema(example = 1)]
    pub id: u64,

    #[schema(example = 10, nullable = true)]
    pub department_id: Option<u64>,

    #[schema(example = "EMP-001")]
    pub employee_code: String,

    #[schema(example = "Juan")]
    pub first_name: String,

    #[schema(example = "Dela Cruz")]
    pub last_name: String,

    #[schema(example = "juan@acme.test")]
    pub email: String,

    #[schema(example = "+639171234567", nullable = true)]
    pub phone: Option<String>,

    #[schema(example = "Payroll Officer", nullable = true)]
    pub position: Option<String>,

    #[schema(example = "2024-01-01", value_type = String, format = "date")]
    pub hire_date: NaiveDate,

    #[schema(example = "active")]
    pub status: String,

    #[schema(nullable = true)]
    pub photo_url: Option<String>,

    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

pub const EMPLOYEE_COLUMNS: &str = "id, department_id, employee_code, first_name, last_name, email, \
     phone, position, hire_date, status, photo_url, created_at";

impl Employee {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}
