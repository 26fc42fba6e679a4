use crate::{
    api::audit_log::{self, AuditEntry},
    auth::{auth::AuthUser, rbac::Module},
    db::{PlatformDb, TenantDb},
    error::{ApiError, ApiResult, is_unique_violation},
    integrations::{Integrations, geocoding::valid_coordinates},
    model::attendance::Attendance,
    utils::{
        db_utils::{Filters, SqlValue, bind_query_as, bind_query_scalar},
        pagination::{Page, Paginated},
    },
};
use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::MySqlPool;
use tracing::{error, info};
use utoipa::{IntoParams, ToSchema};

const ATTENDANCE_COLUMNS: &str = "id, employee_id, work_date, check_in, check_out, latitude, longitude, address";

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CheckInRequest {
    #[schema(example = 14.5995)]
    pub latitude: Option<f64>,
    #[schema(example = 120.9842)]
    pub longitude: Option<f64>,
}

#[derive(Deserialize, IntoParams)]
pub struct AttendanceQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// Ignored for employees, who only see their own logs
    pub employee_id: Option<u64>,
    #[param(value_type = Option<String>)]
    pub from: Option<NaiveDate>,
    #[param(value_type = Option<String>)]
    pub to: Option<NaiveDate>,
}

/// Both coordinates or neither.
fn coordinates(req: &CheckInRequest) -> ApiResult<Option<(f64, f64)>> {
    match (req.latitude, req.longitude) {
        (None, None) => Ok(None),
        (Some(lat), Some(lon)) if valid_coordinates(lat, lon) => Ok(Some((lat, lon))),
        (Some(_), Some(_)) => Err(ApiError::bad_request("Coordinates are out of range")),
        _ => Err(ApiError::bad_request("latitude and longitude must be sent together")),
    }
}

async fn todays_log(pool: &MySqlPool, org_id: u64, employee_id: u64) -> ApiResult<Attendance> {
    let sql = format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendance WHERE org_id = ? AND employee_id = ? AND work_date = CURDATE()"
    );
    sqlx::query_as::<_, Attendance>(&sql)
        .bind(org_id)
        .bind(employee_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("No attendance log for today"))
}

/// Check-in endpoint
#[utoipa::path(
    post,
    path = "/api/attendance/check-in",
    request_body(content = CheckInRequest, description = "Optional location", content_type = "application/json"),
    responses(
        (status = 201, description = "Checked in successfully", body = Attendance),
        (status = 400, description = "Already checked in today", body = Object, example = json!({
            "message": "Already checked in today"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn check_in(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    platform: web::Data<PlatformDb>,
    integrations: web::Data<Integrations>,
    payload: Option<web::Json<CheckInRequest>>,
) -> ApiResult<HttpResponse> {
    auth.require_view(Module::Attendance)?;
    let org_id = auth.org_id()?;
    let employee_id = auth.own_employee_id()?;
    let pool: &MySqlPool = &tenant;

    let payload = payload.map(web::Json::into_inner).unwrap_or_default();
    let location = coordinates(&payload)?;

    let address = match location {
        Some((lat, lon)) => integrations.geocoder.reverse(lat, lon).await,
        None => None,
    };

    let result = sqlx::query(
        r#"
        INSERT INTO attendance (org_id, employee_id, work_date, check_in, latitude, longitude, address)
        VALUES (?, ?, CURDATE(), NOW(), ?, ?, ?)
        "#,
    )
    .bind(org_id)
    .bind(employee_id)
    .bind(location.map(|(lat, _)| lat))
    .bind(location.map(|(_, lon)| lon))
    .bind(&address)
    .execute(pool)
    .await;

    match result {
        Ok(_) => {}
        // Duplicate check-in for same day
        Err(e) if is_unique_violation(&e) => {
            return Err(ApiError::bad_request("Already checked in today"));
        }
        Err(e) => {
            error!(error = %e, employee_id, "Check-in failed");
            return Err(e.into());
        }
    }

    info!(org_id, employee_id, located = location.is_some(), "Checked in");
    let log = todays_log(pool, org_id, employee_id).await?;
    audit_log::record(
        &platform,
        AuditEntry::by(&auth, "attendance.check_in", "attendance", Some(log.id)),
    )
    .await;

    Ok(HttpResponse::Created().json(log))
}

/// Check-out endpoint
#[utoipa::path(
    post,
    path = "/api/attendance/check-out",
    responses(
        (status = 200, description = "Checked out successfully", body = Attendance),
        (status = 400, description = "No active check-in found for today", body = Object, example = json!({
            "message": "No active check-in found for today"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn check_out(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    platform: web::Data<PlatformDb>,
) -> ApiResult<HttpResponse> {
    auth.require_view(Module::Attendance)?;
    let org_id = auth.org_id()?;
    let employee_id = auth.own_employee_id()?;
    let pool: &MySqlPool = &tenant;

    let result = sqlx::query(
        r#"
        UPDATE attendance
        SET check_out = NOW()
        WHERE org_id = ? AND employee_id = ? AND work_date = CURDATE() AND check_out IS NULL
        "#,
    )
    .bind(org_id)
    .bind(employee_id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::bad_request("No active check-in found for today"));
    }

    let log = todays_log(pool, org_id, employee_id).await?;
    info!(org_id, employee_id, worked_minutes = log.worked_minutes(), "Checked out");
    audit_log::record(
        &platform,
        AuditEntry::by(&auth, "attendance.check_out", "attendance", Some(log.id)),
    )
    .await;

    Ok(HttpResponse::Ok().json(log))
}

/// Attendance logs, newest first
#[utoipa::path(
    get,
    path = "/api/attendance",
    params(AttendanceQuery),
    responses(
        (status = 200, description = "Paginated attendance logs", body = AttendancePage),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn list_attendance(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    query: web::Query<AttendanceQuery>,
) -> ApiResult<HttpResponse> {
    let own = auth.self_scope(Module::Attendance)?;
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

    let count_sql = format!("SELECT COUNT(*) FROM attendance{where_sql}");
    let total = bind_query_scalar(sqlx::query_scalar::<_, i64>(&count_sql), filters.values())
        .fetch_one(pool)
        .await?;

    let data_sql = format!(
        "SELECT {ATTENDANCE_COLUMNS} FROM attendance{where_sql} ORDER BY work_date DESC, id DESC LIMIT ? OFFSET ?"
    );
    let logs = bind_query_as(sqlx::query_as::<_, Attendance>(&data_sql), filters.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    Ok(HttpResponse::Ok().json(Paginated::new(logs, page, total)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(latitude: Option<f64>, longitude: Option<f64>) -> CheckInRequest {
        CheckInRequest { latitude, longitude }
    }

    #[test]
    fn location_is_optional() {
        assert_eq!(coordinates(&req(None, None)).unwrap(), None);
    }

    #[test]
    fn both_coordinates_are_required_together() {
        assert!(coordinates(&req(Some(14.6), None)).is_err());
        assert!(coordinates(&req(None, Some(120.9))).is_err());
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        assert!(coordinates(&req(Some(91.0), Some(0.0))).is_err());
        assert_eq!(coordinates(&req(Some(14.6), Some(120.9))).unwrap(), Some((14.6, 120.9)));
    }
}
