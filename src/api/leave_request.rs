use crate::{
    api::{
        audit_log::{self, AuditEntry},
        employee::fetch_employee,
    },
    auth::{auth::AuthUser, rbac::Module},
    db::{PlatformDb, TenantDb},
    error::{ApiError, ApiResult},
    integrations::{Integrations, mailer},
    model::leave_request::{LEAVE_COLUMNS, LeaveAction, LeaveRequest, LeaveStatus, LeaveType, leave_days},
    utils::{
        db_utils::{Filters, SqlValue, bind_query_as, bind_query_scalar},
        pagination::{Page, Paginated},
    },
};
use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use std::str::FromStr;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

/// Longest single request accepted, in days.
const MAX_LEAVE_DAYS: i64 = 90;

#[derive(Deserialize, ToSchema)]
pub struct CreateLeaveRequest {
    pub leave_type: LeaveType,
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub start_date: NaiveDate,
    #[schema(example = "2026-01-03", format = "date", value_type = String)]
    pub end_date: NaiveDate,
    #[schema(example = "Family trip")]
    pub reason: Option<String>,
}

#[derive(Deserialize, IntoParams)]
pub struct LeaveQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// Ignored for employees, who only see their own requests
    pub employee_id: Option<u64>,
    pub status: Option<String>,
    /// Requests ending on or after this date
    #[param(value_type = Option<String>)]
    pub from: Option<NaiveDate>,
    /// Requests starting on or before this date
    #[param(value_type = Option<String>)]
    pub to: Option<NaiveDate>,
}

fn validate_range(start: NaiveDate, end: NaiveDate) -> ApiResult<()> {
    if end < start {
        return Err(ApiError::bad_request("end_date must not be before start_date"));
    }
    if leave_days(start, end) > MAX_LEAVE_DAYS {
        return Err(ApiError::bad_request(format!(
            "A single request may cover at most {MAX_LEAVE_DAYS} days"
        )));
    }
    Ok(())
}

async fn fetch_leave(pool: &MySqlPool, org_id: u64, id: u64) -> ApiResult<LeaveRequest> {
    let sql = format!("SELECT {LEAVE_COLUMNS} FROM leave_requests WHERE id = ? AND org_id = ?");
    sqlx::query_as::<_, LeaveRequest>(&sql)
        .bind(id)
        .bind(org_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Leave request not found"))
}

/// File a leave request for the caller's own employee record
#[utoipa::path(
    post,
    path = "/api/leave",
    request_body = CreateLeaveRequest,
    responses(
        (status = 201, description = "Leave request created", body = LeaveRequest),
        (status = 400, description = "Invalid date range"),
        (status = 403, description = "Caller has no employee profile"),
        (status = 409, description = "Overlaps an existing pending or approved request")
    ),
    tag = "Leave",
    security(("bearer_auth" = []))
)]
pub async fn create_leave_request(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    platform: web::Data<PlatformDb>,
    payload: web::Json<CreateLeaveRequest>,
) -> ApiResult<HttpResponse> {
    auth.require_view(Module::LeaveRequests)?;
    let org_id = auth.org_id()?;
    let employee_id = auth.own_employee_id()?;
    let pool: &MySqlPool = &tenant;

    validate_range(payload.start_date, payload.end_date)?;

    let overlapping = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*) FROM leave_requests
        WHERE org_id = ? AND employee_id = ?
          AND status IN ('pending', 'approved')
          AND start_date <= ? AND end_date >= ?
        "#,
    )
    .bind(org_id)
    .bind(employee_id)
    .bind(payload.end_date)
    .bind(payload.start_date)
    .fetch_one(pool)
    .await?;
    if overlapping > 0 {
        return Err(ApiError::conflict("Overlaps an existing leave request"));
    }

    let reason = payload
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());

    let result = sqlx::query(
        r#"
        INSERT INTO leave_requests (org_id, employee_id, leave_type, start_date, end_date, reason)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(org_id)
    .bind(employee_id)
    .bind(payload.leave_type.as_ref())
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(reason)
    .execute(pool)
    .await?;

    let id = result.last_insert_id();
    info!(org_id, employee_id, leave_id = id, "Leave request filed");
    audit_log::record(
        &platform,
        AuditEntry::by(&auth, "leave.create", "leave_request", Some(id)).details(json!({
            "leave_type": payload.leave_type.as_ref(),
            "start_date": payload.start_date,
            "end_date": payload.end_date,
        })),
    )
    .await;

    let leave = fetch_leave(pool, org_id, id).await?;
    Ok(HttpResponse::Created().json(leave))
}

#[utoipa::path(
    get,
    path = "/api/leave",
    params(LeaveQuery),
    responses((status = 200, description = "Paginated leave requests", body = LeavePage)),
    tag = "Leave",
    security(("bearer_auth" = []))
)]
pub async fn list_leave_requests(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    query: web::Query<LeaveQuery>,
) -> ApiResult<HttpResponse> {
    let own = auth.self_scope(Module::LeaveRequests)?;
    let pool: &MySqlPool = &tenant;
    let page = Page::new(query.page, query.per_page);

    let mut filters = Filters::for_org(auth.org_id()?);
    filters
        .eq_opt("employee_id", own.or(query.employee_id))
        .eq_opt("status", query.status.as_deref());
    if let Some(from) = query.from {
        filters.push("end_date >= ?", [SqlValue::Date(from)]);
    }
    if let Some(to) = query.to {
        filters.push("start_date <= ?", [SqlValue::Date(to)]);
    }
    let where_sql = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM leave_requests{where_sql}");
    let total = bind_query_scalar(sqlx::query_scalar::<_, i64>(&count_sql), filters.values())
        .fetch_one(pool)
        .await?;

    let data_sql = format!(
        "SELECT {LEAVE_COLUMNS} FROM leave_requests{where_sql} ORDER BY start_date DESC, id DESC LIMIT ? OFFSET ?"
    );
    let requests = bind_query_as(sqlx::query_as::<_, LeaveRequest>(&data_sql), filters.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    Ok(HttpResponse::Ok().json(Paginated::new(requests, page, total)))
}

#[utoipa::path(
    get,
    path = "/api/leave/{id}",
    params(("id" = u64, Path, description = "Leave request id")),
    responses(
        (status = 200, body = LeaveRequest),
        (status = 404, description = "Not found")
    ),
    tag = "Leave",
    security(("bearer_auth" = []))
)]
pub async fn get_leave_request(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let own = auth.self_scope(Module::LeaveRequests)?;
    let leave = fetch_leave(&tenant, auth.org_id()?, path.into_inner()).await?;

    // other employees' requests look missing
    if own.is_some_and(|employee_id| employee_id != leave.employee_id) {
        return Err(ApiError::not_found("Leave request not found"));
    }
    Ok(HttpResponse::Ok().json(leave))
}

const REVIEW_SQL: &str = r#"
    UPDATE leave_requests
    SET status = ?, reviewed_by = ?, reviewed_at = NOW()
    WHERE id = ? AND org_id = ? AND status = 'pending'
"#;

/// Withdrawal by the requester leaves the review columns empty.
const CANCEL_SQL: &str = "UPDATE leave_requests SET status = ? WHERE id = ? AND org_id = ? AND status = 'pending'";

/// Only the requester cancels; nobody decides their own request.
fn check_actor(action: LeaveAction, actor: Option<u64>, owner: u64) -> ApiResult<()> {
    let is_owner = actor == Some(owner);
    match action {
        LeaveAction::Cancel if !is_owner => {
            Err(ApiError::forbidden("Only the requester can cancel a leave request"))
        }
        LeaveAction::Approve | LeaveAction::Decline if is_owner => {
            Err(ApiError::forbidden("You cannot review your own leave request"))
        }
        _ => Ok(()),
    }
}

/// Shared body of approve / decline / cancel.
async fn transition(
    auth: &AuthUser,
    tenant: &TenantDb,
    platform: &PlatformDb,
    integrations: &Integrations,
    id: u64,
    action: LeaveAction,
) -> ApiResult<LeaveRequest> {
    let org_id = auth.org_id()?;
    let pool: &MySqlPool = tenant;

    match action {
        LeaveAction::Approve | LeaveAction::Decline => auth.require_manage(Module::LeaveRequests)?,
        LeaveAction::Cancel => auth.require_view(Module::LeaveRequests)?,
    }

    let leave = fetch_leave(pool, org_id, id).await?;

    check_actor(action, auth.employee_id, leave.employee_id)?;

    let current = LeaveStatus::from_str(&leave.status)
        .map_err(|_| ApiError::internal(format!("unknown leave status '{}'", leave.status)))?;
    let next = current
        .apply(action)
        .map_err(|done| ApiError::conflict(format!("Leave request is already {done}")))?;

    // the status guard makes concurrent decisions lose cleanly
    let query = match action {
        LeaveAction::Cancel => sqlx::query(CANCEL_SQL).bind(next.as_ref()),
        LeaveAction::Approve | LeaveAction::Decline => {
            sqlx::query(REVIEW_SQL).bind(next.as_ref()).bind(auth.user_id)
        }
    };
    let result = query.bind(id).bind(org_id).execute(pool).await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::conflict("Leave request was already decided"));
    }

    info!(org_id, leave_id = id, status = %next, "Leave request updated");
    let verb = match action {
        LeaveAction::Approve => "leave.approve",
        LeaveAction::Decline => "leave.decline",
        LeaveAction::Cancel => "leave.cancel",
    };
    audit_log::record(platform, AuditEntry::by(auth, verb, "leave_request", Some(id))).await;

    if action != LeaveAction::Cancel {
        if let Ok(employee) = fetch_employee(pool, org_id, leave.employee_id).await {
            let body = mailer::leave_decision_body(
                &employee.full_name(),
                next.as_ref(),
                &leave.start_date.to_string(),
                &leave.end_date.to_string(),
            );
            integrations
                .mailer
                .send(&employee.email, "Your leave request was reviewed", body);
        }
    }

    fetch_leave(pool, org_id, id).await
}

#[utoipa::path(
    put,
    path = "/api/leave/{id}/approve",
    params(("id" = u64, Path, description = "Leave request id")),
    responses(
        (status = 200, body = LeaveRequest),
        (status = 404, description = "Not found"),
        (status = 409, description = "Already decided")
    ),
    tag = "Leave",
    security(("bearer_auth" = []))
)]
pub async fn approve_leave_request(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    platform: web::Data<PlatformDb>,
    integrations: web::Data<Integrations>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let leave = transition(&auth, &tenant, &platform, &integrations, path.into_inner(), LeaveAction::Approve).await?;
    Ok(HttpResponse::Ok().json(leave))
}

#[utoipa::path(
    put,
    path = "/api/leave/{id}/decline",
    params(("id" = u64, Path, description = "Leave request id")),
    responses(
        (status = 200, body = LeaveRequest),
        (status = 404, description = "Not found"),
        (status = 409, description = "Already decided")
    ),
    tag = "Leave",
    security(("bearer_auth" = []))
)]
pub async fn decline_leave_request(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    platform: web::Data<PlatformDb>,
    integrations: web::Data<Integrations>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let leave = transition(&auth, &tenant, &platform, &integrations, path.into_inner(), LeaveAction::Decline).await?;
    Ok(HttpResponse::Ok().json(leave))
}

/// Withdraw one's own pending request
#[utoipa::path(
    put,
    path = "/api/leave/{id}/cancel",
    params(("id" = u64, Path, description = "Leave request id")),
    responses(
        (status = 200, body = LeaveRequest),
        (status = 403, description = "Not the requester"),
        (status = 409, description = "No longer pending")
    ),
    tag = "Leave",
    security(("bearer_auth" = []))
)]
pub async fn cancel_leave_request(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    platform: web::Data<PlatformDb>,
    integrations: web::Data<Integrations>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let leave = transition(&auth, &tenant, &platform, &integrations, path.into_inner(), LeaveAction::Cancel).await?;
    Ok(HttpResponse::Ok().json(leave))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn reviewers_cannot_decide_their_own_request() {
        for action in [LeaveAction::Approve, LeaveAction::Decline] {
            let err = check_actor(action, Some(7), 7).unwrap_err();
            assert!(matches!(err, ApiError::Forbidden(_)));
            assert!(check_actor(action, Some(8), 7).is_ok());
            assert!(check_actor(action, None, 7).is_ok());
        }
    }

    #[test]
    fn only_the_requester_cancels() {
        assert!(check_actor(LeaveAction::Cancel, Some(7), 7).is_ok());
        assert!(check_actor(LeaveAction::Cancel, Some(8), 7).is_err());
        assert!(check_actor(LeaveAction::Cancel, None, 7).is_err());
    }

    #[test]
    fn cancel_leaves_review_columns_alone() {
        assert!(!CANCEL_SQL.contains("reviewed_"));
        assert!(REVIEW_SQL.contains("reviewed_by = ?"));
        assert!(CANCEL_SQL.ends_with("AND status = 'pending'"));
    }

    #[test]
    fn single_day_leave_is_valid() {
        assert!(validate_range(d("2026-05-04"), d("2026-05-04")).is_ok());
    }

    #[test]
    fn reversed_range_is_rejected() {
        assert!(matches!(
            validate_range(d("2026-05-04"), d("2026-05-01")),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn overly_long_leave_is_rejected() {
        assert!(validate_range(d("2026-01-01"), d("2026-03-31")).is_ok());
        assert!(validate_range(d("2026-01-01"), d("2026-04-01")).is_err());
    }
}
