use crate::{
    auth::{auth::AuthUser, rbac::Module},
    db::PlatformDb,
    error::ApiResult,
    model::audit_log::AuditLog,
    utils::{
        db_utils::{Filters, SqlValue, bind_query_as, bind_query_scalar},
        pagination::{Page, Paginated},
    },
};
use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;
use sqlx::MySqlPool;
use utoipa::IntoParams;

/// One row for the audit trail.
pub struct AuditEntry<'a> {
    pub org_id: Option<u64>,
    pub user_id: Option<u64>,
    pub action: &'a str,
    pub entity: &'a str,
    pub entity_id: Option<u64>,
    pub details: Option<Value>,
}

impl<'a> AuditEntry<'a> {
    pub fn by(user: &AuthUser, action: &'a str, entity: &'a str, entity_id: Option<u64>) -> Self {
        Self {
            org_id: user.org_id,
            user_id: Some(user.user_id),
            action,
            entity,
            entity_id,
            details: None,
        }
    }

    pub fn details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Appends to the audit trail. Failures are logged and never fail the request.
pub async fn record(pool: &MySqlPool, entry: AuditEntry<'_>) {
    let details = entry.details.as_ref().map(Value::to_string);

    let result = sqlx::query(
        r#"
        INSERT INTO audit_logs (org_id, user_id, action, entity, entity_id, details)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.org_id)
    .bind(entry.user_id)
    .bind(entry.action)
    .bind(entry.entity)
    .bind(entry.entity_id)
    .bind(details)
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::error!(error = %e, action = entry.action, "Failed to write audit log");
    }
}

#[derive(Deserialize, IntoParams)]
pub struct AuditLogQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// Platform admins only; ignored for organization users
    pub org_id: Option<u64>,
    pub action: Option<String>,
    pub entity: Option<String>,
    #[param(value_type = Option<String>)]
    pub from: Option<NaiveDate>,
    #[param(value_type = Option<String>)]
    pub to: Option<NaiveDate>,
}

/// List audit trail entries, newest first
#[utoipa::path(
    get,
    path = "/api/audit-logs",
    params(AuditLogQuery),
    responses(
        (status = 200, description = "Paginated audit logs", body = AuditLogPage),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Audit"
)]
pub async fn list_audit_logs(
    auth: AuthUser,
    platform: web::Data<PlatformDb>,
    query: web::Query<AuditLogQuery>,
) -> ApiResult<HttpResponse> {
    auth.require_view(Module::AuditLogs)?;
    let pool: &MySqlPool = &platform;
    let page = Page::new(query.page, query.per_page);

    let mut filters = match auth.org_id {
        Some(org_id) => Filters::for_org(org_id),
        None => {
            let mut f = Filters::default();
            f.eq_opt("org_id", query.org_id);
            f
        }
    };
    filters
        .eq_opt("action", query.action.as_deref())
        .eq_opt("entity", query.entity.as_deref());
    if let Some(from) = query.from {
        filters.push("created_at >= ?", [SqlValue::Date(from)]);
    }
    if let Some(to) = query.to {
        filters.push("created_at < ? + INTERVAL 1 DAY", [SqlValue::Date(to)]);
    }

    let where_sql = filters.where_clause();

    let count_sql = format!("SELECT COUNT(*) FROM audit_logs{where_sql}");
    let total = bind_query_scalar(sqlx::query_scalar::<_, i64>(&count_sql), filters.values())
        .fetch_one(pool)
        .await?;

    let data_sql = format!(
        r#"
        SELECT id, org_id, user_id, action, entity, entity_id, details, created_at
        FROM audit_logs
        {where_sql}
        ORDER BY created_at DESC, id DESC
        LIMIT ? OFFSET ?
        "#
    );
    let logs = bind_query_as(sqlx::query_as::<_, AuditLog>(&data_sql), filters.values())
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(pool)
        .await?;

    Ok(HttpResponse::Ok().json(Paginated::new(logs, page, total)))
}
