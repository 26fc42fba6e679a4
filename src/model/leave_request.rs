use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LeaveType {
    Annual,
    Sick,
    Unpaid,
    Emergency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, Display, EnumString, ToSchema)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LeaveStatus {
    Pending,
    Approved,
    Declined,
    Cancelled,
}

/// A decision applied to a leave request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveAction {
    Approve,
    Decline,
    Cancel,
}

impl LeaveAction {
    pub fn target(self) -> LeaveStatus {
        match self {
            LeaveAction::Approve => LeaveStatus::Approved,
            LeaveAction::Decline => LeaveStatus::Declined,
            LeaveAction::Cancel => LeaveStatus::Cancelled,
        }
    }
}

impl LeaveStatus {
    /// Only pending requests move; every other state is final.
    pub fn apply(self, action: LeaveAction) -> Result<LeaveStatus, LeaveStatus> {
        match self {
            LeaveStatus::Pending => Ok(action.target()),
            done => Err(done),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct LeaveRequest {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = 1000)]
    pub employee_id: u64,
    #[schema(example = "sick")]
    pub leave_type: String,
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub start_date: NaiveDate,
    #[schema(example = "2026-01-03", format = "date", value_type = String)]
    pub end_date: NaiveDate,
    pub reason: Option<String>,
    #[schema(example = "pending")]
    pub status: String,
    pub reviewed_by: Option<u64>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

pub const LEAVE_COLUMNS: &str =
    "id, employee_id, leave_type, start_date, end_date, reason, status, reviewed_by, reviewed_at, created_at";

/// Inclusive number of calendar days covered.
pub fn leave_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_requests_can_be_decided() {
        assert_eq!(LeaveStatus::Pending.apply(LeaveAction::Approve), Ok(LeaveStatus::Approved));
        assert_eq!(LeaveStatus::Pending.apply(LeaveAction::Decline), Ok(LeaveStatus::Declined));
        assert_eq!(LeaveStatus::Pending.apply(LeaveAction::Cancel), Ok(LeaveStatus::Cancelled));
    }

    #[test]
    fn a_request_is_approved_only_once() {
        let approved = LeaveStatus::Pending.apply(LeaveAction::Approve).unwrap();
        assert_eq!(approved.apply(LeaveAction::Approve), Err(LeaveStatus::Approved));
        assert_eq!(approved.apply(LeaveAction::Decline), Err(LeaveStatus::Approved));
    }

    #[test]
    fn declined_and_cancelled_are_final() {
        assert!(LeaveStatus::Declined.apply(LeaveAction::Approve).is_err());
        assert!(LeaveStatus::Cancelled.apply(LeaveAction::Approve).is_err());
    }

    #[test]
    fn leave_days_are_inclusive() {
        let d = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
        assert_eq!(leave_days(d("2026-03-02"), d("2026-03-02")), 1);
        assert_eq!(leave_days(d("2026-03-02"), d("2026-03-06")), 5);
    }
}
