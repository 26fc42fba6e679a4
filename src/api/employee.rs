use crate::{
    api::{
        audit_log::{self, AuditEntry},
        billing,
    },
    auth::{
        auth::AuthUser,
        handlers::normalize_email,
        password::{hash_password, validate_password},
        rbac::{Module, Role},
    },
    db::{PlatformDb, TenantDb},
    error::{ApiError, ApiResult, is_unique_violation},
    integrations::Integrations,
    model::employee::{EMPLOYEE_COLUMNS, Employee, EmployeeStatus},
    utils::{
        db_utils::{Filters, build_update_sql, bind_query_as, bind_query_scalar, execute_update},
        pagination::{Page, Paginated},
    },
};
use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::MySqlPool;
use std::str::FromStr;
use tracing::{debug, info};
use utoipa::{IntoParams, ToSchema};

/// Columns a partial update may touch.
const UPDATABLE_FIELDS: &[&str] = &[
    "employee_code",
    "first_name",
    "last_name",
    "email",
    "phone",
    "position",
    "department_id",
    "hire_date",
    "status",
];

#[derive(Deserialize, Serialize, ToSchema)]
pub struct CreateEmployee {
    #[schema(example = "EMP-001")]
    pub employee_code: String,
    #[schema(example = "Juan")]
    pub first_name: String,
    #[schema(example = "Dela Cruz")]
    pub last_name: String,
    #[schema(example = "juan@acme.test", format = "email")]
    pub email: String,
    pub phone: Option<String>,
    pub position: Option<String>,
    #[schema(example = 1)]
    pub department_id: Option<u64>,
    #[schema(example = "2026-01-01", format = "date", value_type = String)]
    pub hire_date: NaiveDate,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct EmployeeQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    pub department_id: Option<u64>,
    /// `active` or `inactive`
    pub status: Option<String>,
    /// Matches name, email or employee code
    pub search: Option<String>,
}

/// Any subset of the employee fields; unknown keys are rejected.
#[derive(Deserialize, ToSchema)]
#[schema(example = json!({ "position": "Team Lead", "department_id": 3 }))]
pub struct UpdateEmployee {
    pub employee_code: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub position: Option<String>,
    pub department_id: Option<u64>,
    #[schema(example = "2026-01-01", format = "date", value_type = Option<String>)]
    pub hire_date: Option<NaiveDate>,
    pub status: Option<EmployeeStatus>,
}

#[derive(Deserialize, ToSchema)]
pub struct PhotoUpload {
    /// `data:image/png;base64,...`
    pub image: String,
}

#[derive(Debug, Clone, Copy, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Employee,
    Manager,
    Hr,
}

impl From<AccountRole> for Role {
    fn from(role: AccountRole) -> Self {
        match role {
            AccountRole::Employee => Role::Employee,
            AccountRole::Manager => Role::Manager,
            AccountRole::Hr => Role::Hr,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct CreateAccount {
    #[schema(example = "initial-pass-123")]
    pub password: String,
    /// Defaults to `employee`
    pub role: Option<AccountRole>,
}

fn required_text(value: &str, field: &str) -> ApiResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ApiError::bad_request(format!("{field} is required")))
    } else {
        Ok(trimmed.to_string())
    }
}

fn optional_text(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

async fn ensure_department(pool: &MySqlPool, org_id: u64, department_id: u64) -> ApiResult<()> {
    let found = sqlx::query_scalar::<_, u64>("SELECT id FROM departments WHERE id = ? AND org_id = ?")
        .bind(department_id)
        .bind(org_id)
        .fetch_optional(pool)
        .await?;
    match found {
        Some(_) => Ok(()),
        None => Err(ApiError::bad_request("Department does not belong to this organization")),
    }
}

pub(crate) async fn fetch_employee(pool: &MySqlPool, org_id: u64, id: u64) -> ApiResult<Employee> {
    let sql = format!("SELECT {EMPLOYEE_COLUMNS} FROM employees WHERE id = ? AND org_id = ?");
    sqlx::query_as::<_, Employee>(&sql)
        .bind(id)
        .bind(org_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Employee not found"))
}

fn duplicate_code(e: sqlx::Error) -> ApiError {
    if is_unique_violation(&e) {
        ApiError::conflict("Employee code already exists")
    } else {
        e.into()
    }
}

/// What a validated partial update touches beyond plain columns.
#[derive(Debug, Default, PartialEq)]
struct UpdateChecks {
    department_id: Option<u64>,
    activates: bool,
}

/// Validates a partial update in place: required text is trimmed and must
/// stay non-empty, `department_id` must be an id or null.
fn check_update_payload(payload: &mut Value) -> ApiResult<UpdateChecks> {
    let Some(obj) = payload.as_object_mut() else {
        return Err(ApiError::bad_request("Payload must be a JSON object"));
    };

    for field in ["employee_code", "first_name", "last_name", "email", "hire_date", "status"] {
        if obj.get(field).is_some_and(Value::is_null) {
            return Err(ApiError::bad_request(format!("{field} cannot be null")));
        }
    }
    for field in ["employee_code", "first_name", "last_name"] {
        if let Some(value) = obj.get_mut(field) {
            let text = value
                .as_str()
                .ok_or_else(|| ApiError::bad_request(format!("{field} must be a string")))?;
            *value = Value::String(required_text(text, field)?);
        }
    }
    if let Some(email) = obj.get_mut("email") {
        let raw = email
            .as_str()
            .ok_or_else(|| ApiError::bad_request("email must be a string"))?;
        *email = Value::String(normalize_email(raw)?);
    }

    let mut checks = UpdateChecks::default();
    match obj.get("department_id") {
        None | Some(Value::Null) => {}
        Some(value) => {
            let id = value
                .as_u64()
                .ok_or_else(|| ApiError::bad_request("department_id must be a positive integer"))?;
            checks.department_id = Some(id);
        }
    }
    if let Some(status) = obj.get("status") {
        let status = status
            .as_str()
            .and_then(|s| EmployeeStatus::from_str(s).ok())
            .ok_or_else(|| ApiError::bad_request("status must be 'active' or 'inactive'"))?;
        checks.activates = status == EmployeeStatus::Active;
    }
    if let Some(date) = obj.get("hire_date") {
        date.as_str()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .ok_or_else(|| ApiError::bad_request("hire_date must be YYYY-MM-DD"))?;
    }
    Ok(checks)
}

/// Refuses to add one more active employee once the plan limit is reached.
async fn ensure_capacity(platform: &MySqlPool, pool: &MySqlPool, org_id: u64) -> ApiResult<()> {
    let limit = billing::employee_limit(platform, org_id).await?;
    let active = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM employees WHERE org_id = ? AND status = 'active'",
    )
    .bind(org_id)
    .fetch_one(pool)
    .await?;
    if within_limit(active, limit) {
        return Ok(());
    }
    info!(org_id, limit, "Employee limit reached");
    Err(ApiError::PaymentRequired(format!(
        "Your plan allows {limit} active employees; upgrade to add more"
    )))
}

fn within_limit(active: i64, limit: u32) -> bool {
    active < i64::from(limit)
}

/// Create employee
#[utoipa::path(
    post,
    path = "/api/employees",
    request_body = CreateEmployee,
    responses(
        (status = 201, description = "Employee created", body = Employee),
        (status = 400, description = "Validation failed"),
        (status = 402, description = "Plan employee limit reached"),
        (status = 409, description = "Employee code already exists")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn create_employee(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    platform: web::Data<PlatformDb>,
    payload: web::Json<CreateEmployee>,
) -> ApiResult<HttpResponse> {
    auth.require_manage(Module::Employees)?;
    let org_id = auth.org_id()?;
    let pool: &MySqlPool = &tenant;

    let code = required_text(&payload.employee_code, "employee_code")?;
    let first_name = required_text(&payload.first_name, "first_name")?;
    let last_name = required_text(&payload.last_name, "last_name")?;
    let email = normalize_email(&payload.email)?;

    if let Some(department_id) = payload.department_id {
        ensure_department(pool, org_id, department_id).await?;
    }

    ensure_capacity(&platform, pool, org_id).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO employees
        (org_id, department_id, employee_code, first_name, last_name, email, phone, position, hire_date)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(org_id)
    .bind(payload.department_id)
    .bind(&code)
    .bind(&first_name)
    .bind(&last_name)
    .bind(&email)
    .bind(optional_text(payload.phone.as_deref()))
    .bind(optional_text(payload.position.as_deref()))
    .bind(payload.hire_date)
    .execute(pool)
    .await
    .map_err(duplicate_code)?;

    let id = result.last_insert_id();
    info!(org_id, employee_id = id, "Employee created");
    audit_log::record(
        &platform,
        AuditEntry::by(&auth, "employee.create", "employee", Some(id)).details(json!({ "employee_code": code })),
    )
    .await;

    let employee = fetch_employee(pool, org_id, id).await?;
    Ok(HttpResponse::Created().json(employee))
}

/// List employees
#[utoipa::path(
    get,
    path = "/api/employees",
    params(EmployeeQuery),
    responses((status = 200, description = "Paginated employee list", body = EmployeePage)),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn list_employees(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    query: web::Query<EmployeeQuery>,
) -> ApiResult<HttpResponse> {
    auth.require_view(Module::Employees)?;
    let pool: &MySqlPool = &tenant;
    let page = Page::new(query.page, query.per_page);

    // ---------- build WHERE clause dynamically ----------
    let mut filters = Filters::for_org(auth.org_id()?);
    filters
        .eq_opt("department_id", query.department_id)
        .eq_opt("status", query.status.as_deref())
        .search(
            &["first_name", "last_name", "email", "employee_code"],
            query.search.as_deref(),
        );
    let where_sql = filters.where_clause();

    // ---------- total count ----------
    let count_sql = format!("SELECT COUNT(*) FROM employees{where_sql}");
    let total = bind_query_scalar(sqlx::query_scalar::<_, i64>(&count_sql), filters.values())
        .fetch_one(pool)
        .await?;

    // ---------- data ----------
    let data_sql = format!(
        "SELECT {EMPLOYEE_COLUMNS} FROM employees{where_sql} ORDER BY last_name, first_name, id LIMIT ? OFFSET ?"
    );
    debug!(sql = %data_sql, "Listing employees");
    let employees = bind_query_as(sqlx::query_as::<_, Employee>(&data_sql), filters.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    Ok(HttpResponse::Ok().json(Paginated::new(employees, page, total)))
}

/// Get employee by ID
#[utoipa::path(
    get,
    path = "/api/employees/{id}",
    params(("id" = u64, Path, description = "Employee ID")),
    responses(
        (status = 200, description = "Employee found", body = Employee),
        (status = 404, description = "Employee not found")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn get_employee(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    let id = path.into_inner();
    // employees may always read their own profile
    if auth.employee_id != Some(id) {
        auth.require_view(Module::Employees)?;
    }
    let employee = fetch_employee(&tenant, auth.org_id()?, id).await?;
    Ok(HttpResponse::Ok().json(employee))
}

/// Partially update an employee
#[utoipa::path(
    patch,
    path = "/api/employees/{id}",
    params(("id" = u64, Path, description = "Employee ID")),
    request_body = UpdateEmployee,
    responses(
        (status = 200, description = "Updated employee", body = Employee),
        (status = 400, description = "Invalid field"),
        (status = 402, description = "Reactivation exceeds the plan employee limit"),
        (status = 404, description = "Employee not found"),
        (status = 409, description = "Employee code already exists")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn update_employee(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    platform: web::Data<PlatformDb>,
    path: web::Path<u64>,
    payload: web::Json<Value>,
) -> ApiResult<HttpResponse> {
    auth.require_manage(Module::Employees)?;
    let org_id = auth.org_id()?;
    let id = path.into_inner();
    let pool: &MySqlPool = &tenant;

    let mut payload = payload.into_inner();
    let checks = check_update_payload(&mut payload)?;
    let current = fetch_employee(pool, org_id, id).await?;

    if let Some(department_id) = checks.department_id {
        ensure_department(pool, org_id, department_id).await?;
    }
    // reactivation counts against the plan like a new hire
    if checks.activates && current.status != EmployeeStatus::Active.as_ref() {
        ensure_capacity(&platform, pool, org_id).await?;
    }

    let update = build_update_sql(
        "employees",
        &payload,
        UPDATABLE_FIELDS,
        &[("id", id.into()), ("org_id", org_id.into())],
    )?;
    execute_update(pool, update).await.map_err(duplicate_code)?;

    info!(org_id, employee_id = id, "Employee updated");
    audit_log::record(
        &platform,
        AuditEntry::by(&auth, "employee.update", "employee", Some(id)).details(payload),
    )
    .await;

    let employee = fetch_employee(pool, org_id, id).await?;
    Ok(HttpResponse::Ok().json(employee))
}

/// Delete employee; a linked login is deactivated
#[utoipa::path(
    delete,
    path = "/api/employees/{id}",
    params(("id" = u64, Path, description = "Employee ID")),
    responses(
        (status = 204, description = "Employee deleted"),
        (status = 404, description = "Employee not found")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn delete_employee(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    platform: web::Data<PlatformDb>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require_manage(Module::Employees)?;
    let org_id = auth.org_id()?;
    let id = path.into_inner();

    let employee = fetch_employee(&tenant, org_id, id).await?;

    sqlx::query("DELETE FROM employees WHERE id = ? AND org_id = ?")
        .bind(id)
        .bind(org_id)
        .execute(&tenant.0)
        .await?;

    sqlx::query("UPDATE users SET is_active = FALSE, employee_id = NULL WHERE org_id = ? AND employee_id = ?")
        .bind(org_id)
        .bind(id)
        .execute(&platform.0)
        .await?;

    info!(org_id, employee_id = id, "Employee deleted");
    audit_log::record(
        &platform,
        AuditEntry::by(&auth, "employee.delete", "employee", Some(id))
            .details(json!({ "employee_code": employee.employee_code })),
    )
    .await;

    Ok(HttpResponse::NoContent().finish())
}

/// Upload an employee photo
#[utoipa::path(
    post,
    path = "/api/employees/{id}/photo",
    params(("id" = u64, Path, description = "Employee ID")),
    request_body = PhotoUpload,
    responses(
        (status = 200, description = "Photo stored", body = Employee),
        (status = 400, description = "Not an image data URI"),
        (status = 404, description = "Employee not found"),
        (status = 503, description = "Image storage unavailable")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn upload_photo(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    platform: web::Data<PlatformDb>,
    integrations: web::Data<Integrations>,
    path: web::Path<u64>,
    payload: web::Json<PhotoUpload>,
) -> ApiResult<HttpResponse> {
    auth.require_manage(Module::Employees)?;
    let org_id = auth.org_id()?;
    let id = path.into_inner();
    let pool: &MySqlPool = &tenant;

    fetch_employee(pool, org_id, id).await?;

    let url = integrations
        .cloudinary
        .upload_image(
            &payload.image,
            &format!("orgs/{org_id}/employees"),
            &format!("employee-{id}"),
        )
        .await?;

    sqlx::query("UPDATE employees SET photo_url = ? WHERE id = ? AND org_id = ?")
        .bind(&url)
        .bind(id)
        .bind(org_id)
        .execute(pool)
        .await?;

    audit_log::record(&platform, AuditEntry::by(&auth, "employee.photo", "employee", Some(id))).await;

    let employee = fetch_employee(pool, org_id, id).await?;
    Ok(HttpResponse::Ok().json(employee))
}

/// Create a login for an employee
#[utoipa::path(
    post,
    path = "/api/employees/{id}/account",
    params(("id" = u64, Path, description = "Employee ID")),
    request_body = CreateAccount,
    responses(
        (status = 201, description = "Login created", body = Object, example = json!({
            "user_id": 12, "email": "juan@acme.test", "role": "employee"
        })),
        (status = 404, description = "Employee not found"),
        (status = 409, description = "Employee already has a login or email is taken")
    ),
    tag = "Employee",
    security(("bearer_auth" = []))
)]
pub async fn create_account(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    platform: web::Data<PlatformDb>,
    path: web::Path<u64>,
    payload: web::Json<CreateAccount>,
) -> ApiResult<HttpResponse> {
    auth.require_manage(Module::Employees)?;
    let org_id = auth.org_id()?;
    let id = path.into_inner();
    let role: Role = payload.role.unwrap_or(AccountRole::Employee).into();

    // HR may not mint other HR logins
    if role == Role::Hr && auth.role != Role::OrgAdmin {
        return Err(ApiError::forbidden("Only organization admins can create HR logins"));
    }

    validate_password(&payload.password)?;
    let employee = fetch_employee(&tenant, org_id, id).await?;

    let existing = sqlx::query_scalar::<_, u64>("SELECT id FROM users WHERE org_id = ? AND employee_id = ?")
        .bind(org_id)
        .bind(id)
        .fetch_optional(&platform.0)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict("Employee already has a login"));
    }

    let hash = hash_password(&payload.password)?;
    let result = sqlx::query(
        "INSERT INTO users (org_id, email, password_hash, role_id, employee_id) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(org_id)
    .bind(&employee.email)
    .bind(&hash)
    .bind(role.id())
    .bind(id)
    .execute(&platform.0)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::conflict("Email is already used by another login")
        } else {
            e.into()
        }
    })?;

    let user_id = result.last_insert_id();
    info!(org_id, employee_id = id, user_id, "Employee login created");
    audit_log::record(
        &platform,
        AuditEntry::by(&auth, "user.create", "user", Some(user_id))
            .details(json!({ "employee_id": id, "role": role.as_ref() })),
    )
    .await;

    Ok(HttpResponse::Created().json(json!({
        "user_id": user_id,
        "email": employee.email,
        "role": role,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(mut payload: Value) -> ApiResult<UpdateChecks> {
        check_update_payload(&mut payload)
    }

    #[test]
    fn null_is_rejected_for_required_columns() {
        let err = check(json!({ "first_name": null })).unwrap_err();
        assert!(err.to_string().contains("first_name"));
    }

    #[test]
    fn nullable_columns_accept_null() {
        assert_eq!(
            check(json!({ "phone": null, "department_id": null })).unwrap(),
            UpdateChecks::default()
        );
    }

    #[test]
    fn status_must_be_known() {
        assert!(check(json!({ "status": "inactive" })).is_ok());
        assert!(check(json!({ "status": "fired" })).is_err());
        assert!(check(json!({ "status": 1 })).is_err());
    }

    #[test]
    fn hire_date_must_be_a_date() {
        assert!(check(json!({ "hire_date": "2026-02-30" })).is_err());
        assert!(check(json!({ "hire_date": 20260228 })).is_err());
        assert!(check(json!({ "hire_date": "2026-02-28" })).is_ok());
    }

    #[test]
    fn department_id_given_as_text_is_rejected() {
        let err = check(json!({ "department_id": "7" })).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert!(check(json!({ "department_id": -3 })).is_err());
        assert!(check(json!({ "department_id": 7.5 })).is_err());
    }

    #[test]
    fn department_id_is_returned_for_the_ownership_check() {
        let checks = check(json!({ "department_id": 7 })).unwrap();
        assert_eq!(checks.department_id, Some(7));
    }

    #[test]
    fn blank_names_are_rejected_on_update() {
        for field in ["first_name", "last_name", "employee_code"] {
            let mut payload = json!({});
            payload[field] = json!("   ");
            let err = check(payload).unwrap_err();
            assert!(err.to_string().contains(field));
        }
        assert!(check(json!({ "first_name": 5 })).is_err());
    }

    #[test]
    fn updated_text_is_trimmed_and_email_normalized() {
        let mut payload = json!({ "first_name": "  Ana ", "email": " Ana@Acme.TEST " });
        check_update_payload(&mut payload).unwrap();
        assert_eq!(payload["first_name"], "Ana");
        assert_eq!(payload["email"], "ana@acme.test");
    }

    #[test]
    fn setting_status_active_is_flagged_for_the_plan_limit() {
        assert!(check(json!({ "status": "active" })).unwrap().activates);
        assert!(!check(json!({ "status": "inactive" })).unwrap().activates);
        assert!(!check(json!({ "position": "Lead" })).unwrap().activates);
    }

    #[test]
    fn plan_limit_is_exclusive() {
        assert!(within_limit(4, 5));
        assert!(!within_limit(5, 5));
        assert!(!within_limit(0, 0));
    }

    #[test]
    fn org_scope_is_part_of_the_update() {
        let update = build_update_sql(
            "employees",
            &json!({ "position": "Lead" }),
            UPDATABLE_FIELDS,
            &[("id", 5u64.into()), ("org_id", 9u64.into())],
        )
        .unwrap();
        assert_eq!(update.sql, "UPDATE employees SET position = ? WHERE id = ? AND org_id = ?");
    }

    #[test]
    fn tenant_column_cannot_be_patched() {
        let err = build_update_sql(
            "employees",
            &json!({ "org_id": 2 }),
            UPDATABLE_FIELDS,
            &[("id", 5u64.into())],
        )
        .unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn account_role_defaults_map_to_roles() {
        assert_eq!(Role::from(AccountRole::Hr), Role::Hr);
        assert_eq!(Role::from(AccountRole::Manager), Role::Manager);
    }

    #[test]
    fn blank_text_is_required() {
        assert!(required_text("  ", "first_name").is_err());
        assert_eq!(optional_text(Some("  ")), None);
        assert_eq!(optional_text(Some(" Lead ")).as_deref(), Some("Lead"));
    }
}
