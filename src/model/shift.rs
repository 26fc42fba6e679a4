use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct ShiftSchedule {
    pub id: u64,
    #[schema(example = "Morning")]
    pub name: String,
    #[schema(example = "06:00:00", value_type = String)]
    pub start_time: NaiveTime,
    #[schema(example = "14:00:00", value_type = String)]
    pub end_time: NaiveTime,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct ShiftAssignment {
    pub id: u64,
    pub employee_id: u64,
    pub schedule_id: u64,
    #[schema(example = "Morning")]
    pub schedule_name: String,
    #[schema(example = "06:00:00", value_type = String)]
    pub start_time: NaiveTime,
    #[schema(example = "14:00:00", value_type = String)]
    pub end_time: NaiveTime,
    #[schema(example = "2026-02-02", value_type = String, format = "date")]
    pub work_date: NaiveDate,
}
