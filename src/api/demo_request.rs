use crate::{
    api::audit_log::{self, AuditEntry},
    auth::{
        auth::AuthUser,
        handlers::{normalize_email, remote_ip},
        rbac::Module,
    },
    db::PlatformDb,
    error::{ApiError, ApiResult},
    integrations::{Integrations, mailer},
    model::demo_request::{DemoRequest, DemoRequestStatus},
    utils::{
        db_utils::{Filters, bind_query_as, bind_query_scalar},
        pagination::{Page, Paginated},
    },
};
use actix_web::{HttpRequest, HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

const DEMO_COLUMNS: &str = "id, full_name, email, company, phone, employee_count, message, status, created_at";

#[derive(Deserialize, ToSchema)]
pub struct CreateDemoRequest {
    #[schema(example = "Maria Santos")]
    pub full_name: String,
    #[schema(example = "maria@example.com")]
    pub email: String,
    #[schema(example = "Example Corp")]
    pub company: String,
    pub phone: Option<String>,
    #[schema(example = 120)]
    pub employee_count: Option<u32>,
    pub message: Option<String>,
    /// reCAPTCHA v3 token from the landing page
    pub recaptcha_token: Option<String>,
}

/// Trimmed required fields of a demo request.
struct ValidDemoRequest {
    full_name: String,
    email: String,
    company: String,
}

fn validate(payload: &CreateDemoRequest) -> ApiResult<ValidDemoRequest> {
    let full_name = payload.full_name.trim();
    let company = payload.company.trim();
    if full_name.is_empty() {
        return Err(ApiError::bad_request("Name is required"));
    }
    if company.is_empty() {
        return Err(ApiError::bad_request("Company is required"));
    }
    Ok(ValidDemoRequest {
        full_name: full_name.to_string(),
        email: normalize_email(&payload.email)?,
        company: company.to_string(),
    })
}

/// Public "book a demo" form
#[utoipa::path(
    post,
    path = "/demo-requests",
    request_body = CreateDemoRequest,
    responses(
        (status = 201, description = "Request stored", body = Object, example = json!({ "id": 3 })),
        (status = 400, description = "Validation or captcha failed"),
        (status = 503, description = "Captcha verification unavailable")
    ),
    tag = "Demo"
)]
pub async fn create_demo_request(
    req: HttpRequest,
    platform: web::Data<PlatformDb>,
    integrations: web::Data<Integrations>,
    payload: web::Json<CreateDemoRequest>,
) -> ApiResult<HttpResponse> {
    integrations
        .recaptcha
        .verify(payload.recaptcha_token.as_deref(), remote_ip(&req).as_deref())
        .await?;
    let valid = validate(&payload)?;

    let trimmed = |v: &Option<String>| v.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);

    let id = sqlx::query(
        r#"
        INSERT INTO demo_requests (full_name, email, company, phone, employee_count, message)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&valid.full_name)
    .bind(&valid.email)
    .bind(&valid.company)
    .bind(trimmed(&payload.phone))
    .bind(payload.employee_count)
    .bind(trimmed(&payload.message))
    .execute(&platform.0)
    .await?
    .last_insert_id();

    info!(demo_request_id = id, company = %valid.company, "Demo requested");
    integrations
        .mailer
        .send(&valid.email, "We received your demo request", mailer::demo_ack_body(&valid.full_name));

    Ok(HttpResponse::Created().json(json!({ "id": id })))
}

#[derive(Deserialize, IntoParams)]
pub struct DemoRequestQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// `new`, `contacted` or `closed`
    pub status: Option<String>,
    pub search: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/platform/demo-requests",
    params(DemoRequestQuery),
    responses((status = 200, body = DemoRequestPage)),
    security(("bearer_auth" = [])),
    tag = "Demo"
)]
pub async fn list_demo_requests(
    auth: AuthUser,
    platform: web::Data<PlatformDb>,
    query: web::Query<DemoRequestQuery>,
) -> ApiResult<HttpResponse> {
    auth.require_view(Module::DemoRequests)?;
    let pool: &MySqlPool = &platform;
    let page = Page::new(query.page, query.per_page);

    let mut filters = Filters::default();
    filters
        .eq_opt("status", query.status.as_deref())
        .search(&["full_name", "email", "company"], query.search.as_deref());
    let where_sql = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM demo_requests{where_sql}");
    let total = bind_query_scalar(sqlx::query_scalar::<_, i64>(&count_sql), filters.values())
        .fetch_one(pool)
        .await?;

    let data_sql =
        format!("SELECT {DEMO_COLUMNS} FROM demo_requests{where_sql} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");
    let requests = bind_query_as(sqlx::query_as::<_, DemoRequest>(&data_sql), filters.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    Ok(HttpResponse::Ok().json(Paginated::new(requests, page, total)))
}

#[derive(Deserialize, ToSchema)]
pub struct SetDemoRequestStatus {
    pub status: DemoRequestStatus,
}

#[utoipa::path(
    put,
    path = "/api/platform/demo-requests/{id}/status",
    params(("id" = u64, Path, description = "Demo request id")),
    request_body = SetDemoRequestStatus,
    responses((status = 200, body = DemoRequest), (status = 404, description = "Not found")),
    security(("bearer_auth" = [])),
    tag = "Demo"
)]
pub async fn set_demo_request_status(
    auth: AuthUser,
    platform: web::Data<PlatformDb>,
    path: web::Path<u64>,
    payload: web::Json<SetDemoRequestStatus>,
) -> ApiResult<HttpResponse> {
    auth.require_manage(Module::DemoRequests)?;
    let id = path.into_inner();
    let pool: &MySqlPool = &platform;

    let sql = format!("SELECT {DEMO_COLUMNS} FROM demo_requests WHERE id = ?");
    let exists = sqlx::query_as::<_, DemoRequest>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .is_some();
    if !exists {
        return Err(ApiError::not_found("Demo request not found"));
    }

    sqlx::query("UPDATE demo_requests SET status = ? WHERE id = ?")
        .bind(payload.status.as_ref())
        .bind(id)
        .execute(pool)
        .await?;

    audit_log::record(
        pool,
        AuditEntry::by(&auth, "demo_request.status", "demo_request", Some(id))
            .details(json!({ "status": payload.status })),
    )
    .await;

    let request = sqlx::query_as::<_, DemoRequest>(&sql).bind(id).fetch_one(pool).await?;
    Ok(HttpResponse::Ok().json(request))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(full_name: &str, email: &str, company: &str) -> CreateDemoRequest {
        CreateDemoRequest {
            full_name: full_name.into(),
            email: email.into(),
            company: company.into(),
            phone: None,
            employee_count: None,
            message: None,
            recaptcha_token: None,
        }
    }

    #[test]
    fn valid_request_is_trimmed() {
        let valid = validate(&request(" Maria ", "Maria@Example.com", " Example ")).unwrap();
        assert_eq!(valid.full_name, "Maria");
        assert_eq!(valid.email, "maria@example.com");
        assert_eq!(valid.company, "Example");
    }

    #[test]
    fn missing_fields_are_rejected() {
        assert!(validate(&request("", "a@b.co", "X")).is_err());
        assert!(validate(&request("A", "not-an-email", "X")).is_err());
        assert!(validate(&request("A", "a@b.co", " ")).is_err());
    }
}
