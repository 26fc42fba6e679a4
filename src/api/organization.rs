use crate::{
    api::audit_log::{self, AuditEntry},
    auth::{auth::AuthUser, handlers::normalize_email, rbac::Module},
    db::PlatformDb,
    error::{ApiError, ApiResult},
    model::organization::{OrgStatus, Organization},
    utils::{
        db_utils::{Filters, bind_query_as, bind_query_scalar},
        pagination::{Page, Paginated},
    },
};
use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use tracing::info;
use utoipa::{IntoParams, ToSchema};

const ORG_COLUMNS: &str = "id, code, name, email, address, status, created_at";

async fn fetch_org(pool: &MySqlPool, id: u64) -> ApiResult<Organization> {
    let sql = format!("SELECT {ORG_COLUMNS} FROM organizations WHERE id = ?");
    sqlx::query_as::<_, Organization>(&sql)
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::not_found("Organization not found"))
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateOrganization {
    #[schema(example = "Acme Corporation")]
    pub name: String,
    #[schema(example = "admin@acme.test")]
    pub email: String,
    pub address: Option<String>,
}

#[derive(Deserialize, IntoParams)]
pub struct OrganizationQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// `pending_payment`, `active` or `suspended`
    pub status: Option<String>,
    /// Matches name, code or email
    pub search: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct SetOrganizationStatus {
    pub status: OrgStatus,
}

/// The caller's organization
#[utoipa::path(
    get,
    path = "/api/organization",
    responses((status = 200, body = Organization)),
    security(("bearer_auth" = [])),
    tag = "Organization"
)]
pub async fn get_organization(auth: AuthUser, platform: web::Data<PlatformDb>) -> ApiResult<HttpResponse> {
    auth.require_view(Module::Organization)?;
    let org = fetch_org(&platform, auth.org_id()?).await?;
    Ok(HttpResponse::Ok().json(org))
}

/// Update name, contact email and address
#[utoipa::path(
    put,
    path = "/api/organization",
    request_body = UpdateOrganization,
    responses((status = 200, body = Organization), (status = 400, description = "Validation failed")),
    security(("bearer_auth" = [])),
    tag = "Organization"
)]
pub async fn update_organization(
    auth: AuthUser,
    platform: web::Data<PlatformDb>,
    payload: web::Json<UpdateOrganization>,
) -> ApiResult<HttpResponse> {
    auth.require_manage(Module::Organization)?;
    let org_id = auth.org_id()?;
    let pool: &MySqlPool = &platform;

    let name = payload.name.trim();
    if name.is_empty() || name.chars().count() > 150 {
        return Err(ApiError::bad_request("Organization name is required (max 150 characters)"));
    }
    let email = normalize_email(&payload.email)?;
    let address = payload.address.as_deref().map(str::trim).filter(|a| !a.is_empty());

    sqlx::query("UPDATE organizations SET name = ?, email = ?, address = ? WHERE id = ?")
        .bind(name)
        .bind(&email)
        .bind(address)
        .bind(org_id)
        .execute(pool)
        .await?;

    audit_log::record(
        pool,
        AuditEntry::by(&auth, "organization.update", "organization", Some(org_id))
            .details(json!({ "name": name, "email": email })),
    )
    .await;

    let org = fetch_org(pool, org_id).await?;
    Ok(HttpResponse::Ok().json(org))
}

/// All tenants (platform admin)
#[utoipa::path(
    get,
    path = "/api/platform/organizations",
    params(OrganizationQuery),
    responses((status = 200, body = OrganizationPage)),
    security(("bearer_auth" = [])),
    tag = "Platform"
)]
pub async fn list_organizations(
    auth: AuthUser,
    platform: web::Data<PlatformDb>,
    query: web::Query<OrganizationQuery>,
) -> ApiResult<HttpResponse> {
    auth.require_view(Module::Platform)?;
    let pool: &MySqlPool = &platform;
    let page = Page::new(query.page, query.per_page);

    let mut filters = Filters::default();
    filters
        .eq_opt("status", query.status.as_deref())
        .search(&["name", "code", "email"], query.search.as_deref());
    let where_sql = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM organizations{where_sql}");
    let total = bind_query_scalar(sqlx::query_scalar::<_, i64>(&count_sql), filters.values())
        .fetch_one(pool)
        .await?;

    let data_sql =
        format!("SELECT {ORG_COLUMNS} FROM organizations{where_sql} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?");
    let orgs = bind_query_as(sqlx::query_as::<_, Organization>(&data_sql), filters.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    Ok(HttpResponse::Ok().json(Paginated::new(orgs, page, total)))
}

/// Activate or suspend a tenant (platform admin)
#[utoipa::path(
    put,
    path = "/api/platform/organizations/{id}/status",
    params(("id" = u64, Path, description = "Organization id")),
    request_body = SetOrganizationStatus,
    responses(
        (status = 200, body = Organization),
        (status = 400, description = "Only active or suspended may be set"),
        (status = 404, description = "Not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Platform"
)]
pub async fn set_organization_status(
    auth: AuthUser,
    platform: web::Data<PlatformDb>,
    path: web::Path<u64>,
    payload: web::Json<SetOrganizationStatus>,
) -> ApiResult<HttpResponse> {
    auth.require_manage(Module::Platform)?;
    let id = path.into_inner();
    let pool: &MySqlPool = &platform;

    // pending_payment is reached through signup only
    if payload.status == OrgStatus::PendingPayment {
        return Err(ApiError::bad_request("Status must be 'active' or 'suspended'"));
    }

    let before = fetch_org(pool, id).await?;

    sqlx::query("UPDATE organizations SET status = ? WHERE id = ?")
        .bind(payload.status.as_ref())
        .bind(id)
        .execute(pool)
        .await?;

    info!(org_id = id, from = %before.status, to = %payload.status, "Organization status changed");
    audit_log::record(
        pool,
        AuditEntry {
            org_id: Some(id),
            ..AuditEntry::by(&auth, "organization.status", "organization", Some(id))
        }
        .details(json!({ "from": before.status, "to": payload.status })),
    )
    .await;

    let org = fetch_org(pool, id).await?;
    Ok(HttpResponse::Ok().json(org))
}
