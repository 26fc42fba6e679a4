use crate::{
    api::audit_log::{self, AuditEntry},
    auth::{auth::AuthUser, rbac::Module},
    db::{PlatformDb, TenantDb},
    error::{ApiError, ApiResult, is_unique_violation},
    model::shift::{ShiftAssignment, ShiftSchedule},
    utils::{
        db_utils::{Filters, SqlValue, bind_query_as, bind_query_scalar},
        pagination::{Page, Paginated},
    },
};
use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

const ASSIGNMENT_SELECT: &str = r#"
    SELECT a.id, a.employee_id, a.schedule_id, s.name AS schedule_name,
           s.start_time, s.end_time, a.work_date
    FROM shift_assignments a
    JOIN shift_schedules s ON s.id = a.schedule_id
"#;

#[derive(Deserialize, ToSchema)]
pub struct CreateSchedule {
    #[schema(example = "Morning")]
    pub name: String,
    #[schema(example = "06:00:00", value_type = String)]
    pub start_time: NaiveTime,
    #[schema(example = "14:00:00", value_type = String)]
    pub end_time: NaiveTime,
}

#[derive(Deserialize, ToSchema)]
pub struct CreateAssignment {
    pub employee_id: u64,
    pub schedule_id: u64,
    #[schema(example = "2026-02-02", value_type = String, format = "date")]
    pub work_date: NaiveDate,
}

#[derive(Deserialize, IntoParams)]
pub struct AssignmentQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// Ignored for employees, who only see their own shifts
    pub employee_id: Option<u64>,
    #[param(value_type = Option<String>)]
    pub from: Option<NaiveDate>,
    #[param(value_type = Option<String>)]
    pub to: Option<NaiveDate>,
}

fn validate_schedule(payload: &CreateSchedule) -> ApiResult<String> {
    let name = payload.name.trim();
    if name.is_empty() || name.chars().count() > 100 {
        return Err(ApiError::bad_request("Schedule name is required (max 100 characters)"));
    }
    // overnight shifts are fine, zero-length ones are not
    if payload.start_time == payload.end_time {
        return Err(ApiError::bad_request("start_time and end_time must differ"));
    }
    Ok(name.to_string())
}

#[utoipa::path(
    post,
    path = "/api/shifts/schedules",
    request_body = CreateSchedule,
    responses(
        (status = 201, body = ShiftSchedule),
        (status = 409, description = "Schedule name already exists")
    ),
    tag = "Shift",
    security(("bearer_auth" = []))
)]
pub async fn create_schedule(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    platform: web::Data<PlatformDb>,
    payload: web::Json<CreateSchedule>,
) -> ApiResult<HttpResponse> {
    auth.require_manage(Module::Shifts)?;
    let org_id = auth.org_id()?;
    let name = validate_schedule(&payload)?;

    let result = sqlx::query(
        "INSERT INTO shift_schedules (org_id, name, start_time, end_time) VALUES (?, ?, ?, ?)",
    )
    .bind(org_id)
    .bind(&name)
    .bind(payload.start_time)
    .bind(payload.end_time)
    .execute(&tenant.0)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::conflict("Schedule name already exists")
        } else {
            e.into()
        }
    })?;

    let id = result.last_insert_id();
    info!(org_id, schedule_id = id, "Shift schedule created");
    audit_log::record(
        &platform,
        AuditEntry::by(&auth, "shift_schedule.create", "shift_schedule", Some(id))
            .details(json!({ "name": name })),
    )
    .await;

    let schedule = sqlx::query_as::<_, ShiftSchedule>(
        "SELECT id, name, start_time, end_time, created_at FROM shift_schedules WHERE id = ?",
    )
    .bind(id)
    .fetch_one(&tenant.0)
    .await?;

    Ok(HttpResponse::Created().json(schedule))
}

#[utoipa::path(
    get,
    path = "/api/shifts/schedules",
    responses((status = 200, body = [ShiftSchedule])),
    tag = "Shift",
    security(("bearer_auth" = []))
)]
pub async fn list_schedules(auth: AuthUser, tenant: web::Data<TenantDb>) -> ApiResult<HttpResponse> {
    auth.require_view(Module::Shifts)?;

    let schedules = sqlx::query_as::<_, ShiftSchedule>(
        "SELECT id, name, start_time, end_time, created_at FROM shift_schedules WHERE org_id = ? ORDER BY start_time, name",
    )
    .bind(auth.org_id()?)
    .fetch_all(&tenant.0)
    .await?;

    Ok(HttpResponse::Ok().json(schedules))
}

#[utoipa::path(
    delete,
    path = "/api/shifts/schedules/{id}",
    params(("id" = u64, Path, description = "Schedule id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Schedule still has assignments")
    ),
    tag = "Shift",
    security(("bearer_auth" = []))
)]
pub async fn delete_schedule(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    platform: web::Data<PlatformDb>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require_manage(Module::Shifts)?;
    let org_id = auth.org_id()?;
    let id = path.into_inner();
    let pool: &MySqlPool = &tenant;

    let assigned = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM shift_assignments WHERE org_id = ? AND schedule_id = ?",
    )
    .bind(org_id)
    .bind(id)
    .fetch_one(pool)
    .await?;
    if assigned > 0 {
        return Err(ApiError::conflict("Schedule still has assignments"));
    }

    let result = sqlx::query("DELETE FROM shift_schedules WHERE id = ? AND org_id = ?")
        .bind(id)
        .bind(org_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Schedule not found"));
    }

    audit_log::record(
        &platform,
        AuditEntry::by(&auth, "shift_schedule.delete", "shift_schedule", Some(id)),
    )
    .await;
    Ok(HttpResponse::NoContent().finish())
}

#[utoipa::path(
    post,
    path = "/api/shifts/assignments",
    request_body = CreateAssignment,
    responses(
        (status = 201, body = ShiftAssignment),
        (status = 400, description = "Employee or schedule not in this organization"),
        (status = 409, description = "Employee already has a shift that day")
    ),
    tag = "Shift",
    security(("bearer_auth" = []))
)]
pub async fn create_assignment(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    platform: web::Data<PlatformDb>,
    payload: web::Json<CreateAssignment>,
) -> ApiResult<HttpResponse> {
    auth.require_manage(Module::Shifts)?;
    let org_id = auth.org_id()?;
    let pool: &MySqlPool = &tenant;

    let schedule_ok = sqlx::query_scalar::<_, u64>("SELECT id FROM shift_schedules WHERE id = ? AND org_id = ?")
        .bind(payload.schedule_id)
        .bind(org_id)
        .fetch_optional(pool)
        .await?
        .is_some();
    let employee_ok = sqlx::query_scalar::<_, u64>("SELECT id FROM employees WHERE id = ? AND org_id = ?")
        .bind(payload.employee_id)
        .bind(org_id)
        .fetch_optional(pool)
        .await?
        .is_some();
    if !schedule_ok || !employee_ok {
        return Err(ApiError::bad_request("Employee or schedule not found in this organization"));
    }

    let result = sqlx::query(
        "INSERT INTO shift_assignments (org_id, employee_id, schedule_id, work_date) VALUES (?, ?, ?, ?)",
    )
    .bind(org_id)
    .bind(payload.employee_id)
    .bind(payload.schedule_id)
    .bind(payload.work_date)
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::conflict("Employee already has a shift on that date")
        } else {
            e.into()
        }
    })?;

    let id = result.last_insert_id();
    info!(org_id, assignment_id = id, "Shift assigned");
    audit_log::record(
        &platform,
        AuditEntry::by(&auth, "shift_assignment.create", "shift_assignment", Some(id)).details(json!({
            "employee_id": payload.employee_id,
            "schedule_id": payload.schedule_id,
            "work_date": payload.work_date,
        })),
    )
    .await;

    let sql = format!("{ASSIGNMENT_SELECT} WHERE a.id = ?");
    let assignment = sqlx::query_as::<_, ShiftAssignment>(&sql)
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(HttpResponse::Created().json(assignment))
}

#[utoipa::path(
    get,
    path = "/api/shifts/assignments",
    params(AssignmentQuery),
    responses((status = 200, body = AssignmentPage)),
    tag = "Shift",
    security(("bearer_auth" = []))
)]
pub async fn list_assignments(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    query: web::Query<AssignmentQuery>,
) -> ApiResult<HttpResponse> {
    let own = auth.self_scope(Module::Shifts)?;
    let pool: &MySqlPool = &tenant;
    let page = Page::new(query.page, query.per_page);

    let mut filters = Filters::for_org(auth.org_id()?);
    filters.eq_opt("employee_id", own.or(query.employee_id));
    if let Some(from) = query.from {
        filters.push("work_date >= ?", [SqlValue::Date(from)]);
    }
    if let Some(to) = query.to {
        filters.push("work_date <= ?", [SqlValue::Date(to)]);
    }
    let where_sql = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM shift_assignments{where_sql}");
    let total = bind_query_scalar(sqlx::query_scalar::<_, i64>(&count_sql), filters.values())
        .fetch_one(pool)
        .await?;

    let data_sql = format!(
        "{ASSIGNMENT_SELECT} WHERE a.id IN (SELECT id FROM shift_assignments{where_sql}) \
         ORDER BY a.work_date, s.start_time LIMIT ? OFFSET ?"
    );
    let assignments = bind_query_as(sqlx::query_as::<_, ShiftAssignment>(&data_sql), filters.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    Ok(HttpResponse::Ok().json(Paginated::new(assignments, page, total)))
}

#[utoipa::path(
    delete,
    path = "/api/shifts/assignments/{id}",
    params(("id" = u64, Path, description = "Assignment id")),
    responses((status = 204, description = "Deleted"), (status = 404, description = "Not found")),
    tag = "Shift",
    security(("bearer_auth" = []))
)]
pub async fn delete_assignment(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    platform: web::Data<PlatformDb>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require_manage(Module::Shifts)?;
    let org_id = auth.org_id()?;
    let id = path.into_inner();

    let result = sqlx::query("DELETE FROM shift_assignments WHERE id = ? AND org_id = ?")
        .bind(id)
        .bind(org_id)
        .execute(&tenant.0)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Assignment not found"));
    }

    audit_log::record(
        &platform,
        AuditEntry::by(&auth, "shift_assignment.delete", "shift_assignment", Some(id)),
    )
    .await;
    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(name: &str, start: &str, end: &str) -> CreateSchedule {
        CreateSchedule {
            name: name.into(),
            start_time: NaiveTime::parse_from_str(start, "%H:%M").unwrap(),
            end_time: NaiveTime::parse_from_str(end, "%H:%M").unwrap(),
        }
    }

    #[test]
    fn overnight_schedules_are_allowed() {
        assert_eq!(validate_schedule(&schedule(" Night ", "22:00", "06:00")).unwrap(), "Night");
    }

    #[test]
    fn zero_length_schedules_are_rejected() {
        assert!(validate_schedule(&schedule("Broken", "08:00", "08:00")).is_err());
    }

    #[test]
    fn blank_schedule_name_is_rejected() {
        assert!(validate_schedule(&schedule("  ", "08:00", "17:00")).is_err());
    }
}
