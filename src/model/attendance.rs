use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct Attendance {
    pub id: u64,
    pub employee_id: u64,
    #[schema(example = "2026-02-02", value_type = String, format = "date")]
    pub work_date: NaiveDate,
    #[schema(example = "2026-02-02T08:01:00", value_type = String)]
    pub check_in: NaiveDateTime,
    #[schema(example = "2026-02-02T17:03:00", value_type = Option<String>)]
    pub check_out: Option<NaiveDateTime>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub address: Option<String>,
}

impl Attendance {
    /// Worked minutes, `None` while still checked in.
    pub fn worked_minutes(&self) -> Option<i64> {
        self.check_out.map(|out| (out - self.check_in).num_minutes())
    }
}
