use crate::{
    api::audit_log::{self, AuditEntry},
    auth::{auth::AuthUser, rbac::Module},
    db::{PlatformDb, TenantDb},
    error::{ApiError, ApiResult, is_unique_violation},
    model::department::{Department, normalize_department_name},
};
use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::ToSchema;

const DEPARTMENT_SELECT: &str = r#"
    SELECT d.id, d.name, d.description, COUNT(e.id) AS employee_count, d.created_at
    FROM departments d
    LEFT JOIN employees e ON e.department_id = d.id AND e.org_id = d.org_id
"#;

#[derive(Deserialize, ToSchema)]
pub struct DepartmentPayload {
    #[schema(example = "Engineering")]
    pub name: String,
    #[schema(example = "Product and platform teams", nullable = true)]
    pub description: Option<String>,
}

fn validated(payload: &DepartmentPayload) -> ApiResult<(String, String, Option<String>)> {
    let (name, key) = normalize_department_name(&payload.name)
        .ok_or_else(|| ApiError::bad_request("Department name is required (max 100 characters)"))?;
    let description = payload
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    Ok((name, key, description))
}

fn duplicate_name(e: sqlx::Error) -> ApiError {
    if is_unique_violation(&e) {
        ApiError::conflict("Department name already exists")
    } else {
        e.into()
    }
}

async fn fetch_department(pool: &MySqlPool, org_id: u64, id: u64) -> ApiResult<Department> {
    let sql = format!("{DEPARTMENT_SELECT} WHERE d.org_id = ? AND d.id = ? GROUP BY d.id");
    sqlx::query_as::<_, Department>(&sql)
        .bind(org_id)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Department not found"))
}

/// Create department
#[utoipa::path(
    post,
    path = "/api/departments",
    request_body = DepartmentPayload,
    responses(
        (status = 201, description = "Department created", body = Department),
        (status = 400, description = "Invalid name"),
        (status = 409, description = "Name already used in this organization")
    ),
    security(("bearer_auth" = [])),
    tag = "Department"
)]
pub async fn create_department(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    platform: web::Data<PlatformDb>,
    payload: web::Json<DepartmentPayload>,
) -> ApiResult<HttpResponse> {
    auth.require_manage(Module::Departments)?;
    let org_id = auth.org_id()?;
    let (name, key, description) = validated(&payload)?;

    let result = sqlx::query(
        "INSERT INTO departments (org_id, name, name_key, description) VALUES (?, ?, ?, ?)",
    )
    .bind(org_id)
    .bind(&name)
    .bind(&key)
    .bind(&description)
    .execute(&tenant.0)
    .await
    .map_err(duplicate_name)?;

    let id = result.last_insert_id();
    info!(org_id, department_id = id, "Department created");

    audit_log::record(
        &platform,
        AuditEntry::by(&auth, "department.create", "department", Some(id)).details(json!({ "name": name })),
    )
    .await;

    let department = fetch_department(&tenant, org_id, id).await?;
    Ok(HttpResponse::Created().json(department))
}

/// List departments with their head count
#[utoipa::path(
    get,
    path = "/api/departments",
    responses((status = 200, body = [Department])),
    security(("bearer_auth" = [])),
    tag = "Department"
)]
pub async fn list_departments(auth: AuthUser, tenant: web::Data<TenantDb>) -> ApiResult<HttpResponse> {
    auth.require_view(Module::Departments)?;
    let org_id = auth.org_id()?;

    let sql = format!("{DEPARTMENT_SELECT} WHERE d.org_id = ? GROUP BY d.id ORDER BY d.name");
    let departments = sqlx::query_as::<_, Department>(&sql)
        .bind(org_id)
        .fetch_all(&tenant.0)
        .await?;

    Ok(HttpResponse::Ok().json(departments))
}

#[utoipa::path(
    get,
    path = "/api/departments/{id}",
    params(("id" = u64, Path, description = "Department id")),
    responses((status = 200, body = Department), (status = 404, description = "Not found")),
    security(("bearer_auth" = [])),
    tag = "Department"
)]
pub async fn get_department(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require_view(Module::Departments)?;
    let department = fetch_department(&tenant, auth.org_id()?, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(department))
}

/// Rename or re-describe a department
#[utoipa::path(
    put,
    path = "/api/departments/{id}",
    params(("id" = u64, Path, description = "Department id")),
    request_body = DepartmentPayload,
    responses(
        (status = 200, body = Department),
        (status = 404, description = "Not found"),
        (status = 409, description = "Name already used in this organization")
    ),
    security(("bearer_auth" = [])),
    tag = "Department"
)]
pub async fn update_department(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    platform: web::Data<PlatformDb>,
    path: web::Path<u64>,
    payload: web::Json<DepartmentPayload>,
) -> ApiResult<HttpResponse> {
    auth.require_manage(Module::Departments)?;
    let org_id = auth.org_id()?;
    let id = path.into_inner();
    let (name, key, description) = validated(&payload)?;

    // 404 before attempting the update so an unchanged row is not mistaken for a missing one
    fetch_department(&tenant, org_id, id).await?;

    sqlx::query("UPDATE departments SET name = ?, name_key = ?, description = ? WHERE id = ? AND org_id = ?")
        .bind(&name)
        .bind(&key)
        .bind(&description)
        .bind(id)
        .bind(org_id)
        .execute(&tenant.0)
        .await
        .map_err(duplicate_name)?;

    audit_log::record(
        &platform,
        AuditEntry::by(&auth, "department.update", "department", Some(id)).details(json!({ "name": name })),
    )
    .await;

    let department = fetch_department(&tenant, org_id, id).await?;
    Ok(HttpResponse::Ok().json(department))
}

#[utoipa::path(
    delete,
    path = "/api/departments/{id}",
    params(("id" = u64, Path, description = "Department id")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Employees still belong to the department")
    ),
    security(("bearer_auth" = [])),
    tag = "Department"
)]
pub async fn delete_department(
    auth: AuthUser,
    tenant: web::Data<TenantDb>,
    platform: web::Data<PlatformDb>,
    path: web::Path<u64>,
) -> ApiResult<HttpResponse> {
    auth.require_manage(Module::Departments)?;
    let org_id = auth.org_id()?;
    let id = path.into_inner();

    let department = fetch_department(&tenant, org_id, id).await?;
    if department.employee_count > 0 {
        return Err(ApiError::conflict(format!(
            "Department still has {} employee(s)",
            department.employee_count
        )));
    }

    sqlx::query("DELETE FROM departments WHERE id = ? AND org_id = ?")
        .bind(id)
        .bind(org_id)
        .execute(&tenant.0)
        .await?;

    info!(org_id, department_id = id, "Department deleted");
    audit_log::record(
        &platform,
        AuditEntry::by(&auth, "department.delete", "department", Some(id))
            .details(json!({ "name": department.name })),
    )
    .await;

    Ok(HttpResponse::NoContent().finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_names_are_rejected() {
        let payload = DepartmentPayload { name: "   ".into(), description: None };
        assert!(matches!(validated(&payload), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn blank_description_is_stored_as_null() {
        let payload = DepartmentPayload {
            name: " Sales  Ops ".into(),
            description: Some("  ".into()),
        };
        let (name, key, description) = validated(&payload).unwrap();
        assert_eq!(name, "Sales Ops");
        assert_eq!(key, "sales ops");
        assert_eq!(description, None);
    }
}
