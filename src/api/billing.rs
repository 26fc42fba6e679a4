//! Plans, subscriptions and the PayMongo checkout / webhook round trip.
//!
//! A paid plan starts as a `pending` subscription carrying the checkout
//! session id. The `checkout_session.payment.paid` webhook activates it for
//! one billing period, cancels whatever was active before and lifts the
//! organization out of `pending_payment`.

use crate::{
    api::audit_log::{self, AuditEntry},
    auth::{auth::AuthUser, rbac::Module},
    db::PlatformDb,
    error::{ApiError, ApiResult, is_unique_violation},
    integrations::{
        Integrations,
        paymongo::{CheckoutRequest, EVENT_CHECKOUT_PAID, parse_event},
    },
    model::{
        plan::Plan,
        subscription::{BILLING_PERIOD_DAYS, Subscription, SubscriptionStatus},
    },
};
use actix_web::{HttpRequest, HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::{MySqlConnection, MySqlPool};
use std::str::FromStr;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

pub const FREE_PLAN_CODE: &str = "free";

const PLAN_COLUMNS: &str = "id, code, name, price_cents, currency, max_employees, is_active";

const SUBSCRIPTION_SELECT: &str = r#"
    SELECT s.id, s.org_id, s.plan_id, p.code AS plan_code, p.name AS plan_name, s.status,
           s.checkout_session_id, s.current_period_start, s.current_period_end, s.created_at
    FROM subscriptions s
    JOIN plans p ON p.id = s.plan_id
"#;

/// Active plan looked up by its code.
pub(crate) async fn find_plan(pool: &MySqlPool, code: &str) -> ApiResult<Plan> {
    let sql = format!("SELECT {PLAN_COLUMNS} FROM plans WHERE code = ? AND is_active = TRUE");
    sqlx::query_as::<_, Plan>(&sql)
        .bind(code.trim().to_lowercase())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::bad_request(format!("Unknown plan '{code}'")))
}

/// Employee cap of the organization's active plan, or of the free plan when
/// nothing is active.
pub async fn employee_limit(pool: &MySqlPool, org_id: u64) -> ApiResult<u32> {
    let active = sqlx::query_scalar::<_, u32>(
        r#"
        SELECT p.max_employees
        FROM subscriptions s
        JOIN plans p ON p.id = s.plan_id
        WHERE s.org_id = ? AND s.status = 'active'
        ORDER BY s.id DESC
        LIMIT 1
        "#,
    )
    .bind(org_id)
    .fetch_optional(pool)
    .await?;

    if let Some(limit) = active {
        return Ok(limit);
    }

    sqlx::query_scalar::<_, u32>("SELECT max_employees FROM plans WHERE code = ?")
        .bind(FREE_PLAN_CODE)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::internal("free plan is missing"))
}

/// Retires the previous active subscription; must run before the new one
/// turns active so the one-active-per-org key never sees two rows.
const SUPERSEDE_ACTIVE_SQL: &str =
    "UPDATE subscriptions SET status = 'cancelled' WHERE org_id = ? AND status = 'active' AND id <> ?";

const ACTIVATE_SQL: &str = r#"
    UPDATE subscriptions
    SET status = 'active',
        current_period_start = NOW(),
        current_period_end = NOW() + INTERVAL ? DAY
    WHERE id = ? AND org_id = ?
"#;

/// Makes `subscription_id` the organization's only active subscription and
/// activates an organization still waiting for payment. Callers run it
/// inside a transaction.
pub(crate) async fn activate_subscription(
    conn: &mut MySqlConnection,
    org_id: u64,
    subscription_id: u64,
) -> Result<(), sqlx::Error> {
    sqlx::query(SUPERSEDE_ACTIVE_SQL)
        .bind(org_id)
        .bind(subscription_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(ACTIVATE_SQL)
        .bind(BILLING_PERIOD_DAYS)
        .bind(subscription_id)
        .bind(org_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query("UPDATE organizations SET status = 'active' WHERE id = ? AND status = 'pending_payment'")
        .bind(org_id)
        .execute(&mut *conn)
        .await?;

    Ok(())
}

/// Opens a PayMongo checkout for a pending subscription and remembers the
/// session id on it.
pub(crate) async fn start_checkout(
    pool: &MySqlPool,
    integrations: &Integrations,
    org_id: u64,
    subscription_id: u64,
    plan: &Plan,
    email: &str,
) -> ApiResult<String> {
    let session = integrations
        .paymongo
        .create_checkout(&CheckoutRequest {
            org_id,
            subscription_id,
            plan_name: &plan.name,
            amount_cents: plan.price_cents,
            currency: &plan.currency,
            customer_email: email,
        })
        .await?;

    sqlx::query("UPDATE subscriptions SET checkout_session_id = ? WHERE id = ?")
        .bind(&session.id)
        .bind(subscription_id)
        .execute(pool)
        .await?;

    info!(org_id, subscription_id, session_id = %session.id, "Checkout session created");
    Ok(session.checkout_url)
}

/// New checkout for the organization's latest pending subscription, used
/// when a login hits an unpaid organization.
pub async fn resume_checkout(
    pool: &MySqlPool,
    integrations: &Integrations,
    org_id: u64,
    email: &str,
) -> ApiResult<String> {
    let pending = sqlx::query_as::<_, (u64, u64)>(
        "SELECT id, plan_id FROM subscriptions WHERE org_id = ? AND status = 'pending' ORDER BY id DESC LIMIT 1",
    )
    .bind(org_id)
    .fetch_optional(pool)
    .await?;

    let (subscription_id, plan_id) = pending.ok_or_else(|| ApiError::not_found("No pending subscription"))?;

    let sql = format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = ?");
    let plan = sqlx::query_as::<_, Plan>(&sql)
        .bind(plan_id)
        .fetch_one(pool)
        .await?;

    start_checkout(pool, integrations, org_id, subscription_id, &plan, email).await
}

/// Public list of plans on sale
#[utoipa::path(
    get,
    path = "/billing/plans",
    responses((status = 200, body = [Plan])),
    tag = "Billing"
)]
pub async fn list_plans(platform: web::Data<PlatformDb>) -> ApiResult<HttpResponse> {
    let sql = format!("SELECT {PLAN_COLUMNS} FROM plans WHERE is_active = TRUE ORDER BY price_cents, id");
    let plans = sqlx::query_as::<_, Plan>(&sql).fetch_all(&platform.0).await?;
    Ok(HttpResponse::Ok().json(plans))
}

#[derive(Deserialize, ToSchema)]
pub struct CreatePlan {
    #[schema(example = "business")]
    pub code: String,
    #[schema(example = "Business")]
    pub name: String,
    #[schema(example = 499900)]
    pub price_cents: i64,
    /// ISO 4217, defaults to PHP
    pub currency: Option<String>,
    #[schema(example = 2000)]
    pub max_employees: u32,
}

fn validate_plan(payload: &CreatePlan) -> ApiResult<(String, String, String)> {
    let code = payload.code.trim().to_lowercase();
    if code.is_empty() || code.len() > 32 || !code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err(ApiError::bad_request("Plan code must be 1-32 characters of a-z, 0-9 or '-'"));
    }
    let name = payload.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::bad_request("Plan name is required"));
    }
    if payload.price_cents < 0 {
        return Err(ApiError::bad_request("price_cents cannot be negative"));
    }
    if payload.max_employees == 0 {
        return Err(ApiError::bad_request("max_employees must be positive"));
    }
    let currency = payload
        .currency
        .as_deref()
        .map(|c| c.trim().to_uppercase())
        .unwrap_or_else(|| "PHP".to_string());
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(ApiError::bad_request("currency must be a 3-letter code"));
    }
    Ok((code, name, currency))
}

/// Add a plan (platform admin)
#[utoipa::path(
    post,
    path = "/api/platform/plans",
    request_body = CreatePlan,
    responses(
        (status = 201, body = Plan),
        (status = 409, description = "Plan code already exists")
    ),
    security(("bearer_auth" = [])),
    tag = "Billing"
)]
pub async fn create_plan(
    auth: AuthUser,
    platform: web::Data<PlatformDb>,
    payload: web::Json<CreatePlan>,
) -> ApiResult<HttpResponse> {
    auth.require_manage(Module::Plans)?;
    let (code, name, currency) = validate_plan(&payload)?;
    let pool: &MySqlPool = &platform;

    let result = sqlx::query(
        "INSERT INTO plans (code, name, price_cents, currency, max_employees) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&code)
    .bind(&name)
    .bind(payload.price_cents)
    .bind(&currency)
    .bind(payload.max_employees)
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::conflict("Plan code already exists")
        } else {
            e.into()
        }
    })?;

    let id = result.last_insert_id();
    audit_log::record(
        pool,
        AuditEntry::by(&auth, "plan.create", "plan", Some(id)).details(json!({ "code": code })),
    )
    .await;

    let sql = format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = ?");
    let plan = sqlx::query_as::<_, Plan>(&sql).bind(id).fetch_one(pool).await?;
    Ok(HttpResponse::Created().json(plan))
}

/// Current subscription: the active one, else the latest pending one
#[utoipa::path(
    get,
    path = "/api/billing/subscription",
    responses(
        (status = 200, body = Subscription),
        (status = 404, description = "No subscription")
    ),
    security(("bearer_auth" = [])),
    tag = "Billing"
)]
pub async fn get_subscription(auth: AuthUser, platform: web::Data<PlatformDb>) -> ApiResult<HttpResponse> {
    auth.require_view(Module::Billing)?;

    let sql = format!(
        "{SUBSCRIPTION_SELECT} WHERE s.org_id = ? AND s.status IN ('active', 'pending') \
         ORDER BY s.status = 'active' DESC, s.id DESC LIMIT 1"
    );
    let subscription = sqlx::query_as::<_, Subscription>(&sql)
        .bind(auth.org_id()?)
        .fetch_optional(&platform.0)
        .await?
        .ok_or_else(|| ApiError::not_found("No subscription"))?;

    Ok(HttpResponse::Ok().json(subscription))
}

#[derive(Deserialize, ToSchema)]
pub struct CheckoutBody {
    #[schema(example = "pro")]
    pub plan_code: String,
}

/// Switch plans. Paid plans return a checkout URL; the free plan applies at once.
#[utoipa::path(
    post,
    path = "/api/billing/checkout",
    request_body = CheckoutBody,
    responses(
        (status = 200, description = "Checkout started or free plan applied", body = Object, example = json!({
            "subscription_id": 7, "checkout_url": "https://checkout.paymongo.com/cs_..."
        })),
        (status = 400, description = "Unknown plan"),
        (status = 503, description = "Payment provider unavailable")
    ),
    security(("bearer_auth" = [])),
    tag = "Billing"
)]
pub async fn create_checkout(
    auth: AuthUser,
    platform: web::Data<PlatformDb>,
    integrations: web::Data<Integrations>,
    payload: web::Json<CheckoutBody>,
) -> ApiResult<HttpResponse> {
    auth.require_manage(Module::Billing)?;
    let org_id = auth.org_id()?;
    let pool: &MySqlPool = &platform;
    let plan = find_plan(pool, &payload.plan_code).await?;

    let mut tx = pool.begin().await?;

    // only the newest checkout stays payable
    sqlx::query("UPDATE subscriptions SET status = 'cancelled' WHERE org_id = ? AND status = 'pending'")
        .bind(org_id)
        .execute(&mut *tx)
        .await?;

    let subscription_id = sqlx::query("INSERT INTO subscriptions (org_id, plan_id) VALUES (?, ?)")
        .bind(org_id)
        .bind(plan.id)
        .execute(&mut *tx)
        .await?
        .last_insert_id();

    if plan.is_free() {
        activate_subscription(&mut tx, org_id, subscription_id).await?;
    }
    tx.commit().await?;

    audit_log::record(
        pool,
        AuditEntry::by(&auth, "subscription.checkout", "subscription", Some(subscription_id))
            .details(json!({ "plan": plan.code })),
    )
    .await;

    if plan.is_free() {
        info!(org_id, subscription_id, "Switched to free plan");
        return Ok(HttpResponse::Ok().json(json!({
            "subscription_id": subscription_id,
            "status": SubscriptionStatus::Active,
        })));
    }

    let checkout_url = start_checkout(pool, &integrations, org_id, subscription_id, &plan, &auth.email).await?;
    Ok(HttpResponse::Ok().json(json!({
        "subscription_id": subscription_id,
        "status": SubscriptionStatus::Pending,
        "checkout_url": checkout_url,
    })))
}

/// Cancel the active subscription; the organization falls back to free-plan limits
#[utoipa::path(
    post,
    path = "/api/billing/subscription/cancel",
    responses(
        (status = 200, description = "Cancelled"),
        (status = 404, description = "No active subscription")
    ),
    security(("bearer_auth" = [])),
    tag = "Billing"
)]
pub async fn cancel_subscription(auth: AuthUser, platform: web::Data<PlatformDb>) -> ApiResult<HttpResponse> {
    auth.require_manage(Module::Billing)?;
    let org_id = auth.org_id()?;
    let pool: &MySqlPool = &platform;

    let result = sqlx::query("UPDATE subscriptions SET status = 'cancelled' WHERE org_id = ? AND status = 'active'")
        .bind(org_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("No active subscription"));
    }

    info!(org_id, "Subscription cancelled");
    audit_log::record(pool, AuditEntry::by(&auth, "subscription.cancel", "subscription", None)).await;

    Ok(HttpResponse::Ok().json(json!({ "message": "Subscription cancelled" })))
}

/// PayMongo webhook receiver
#[utoipa::path(
    post,
    path = "/billing/webhook",
    request_body(content = Object, description = "PayMongo event", content_type = "application/json"),
    params(("Paymongo-Signature" = String, Header, description = "t=<ts>,te=<hex>,li=<hex>")),
    responses(
        (status = 200, description = "Event acknowledged"),
        (status = 401, description = "Bad signature")
    ),
    tag = "Billing"
)]
#[instrument(name = "paymongo_webhook", skip_all)]
pub async fn webhook(
    req: HttpRequest,
    body: web::Bytes,
    platform: web::Data<PlatformDb>,
    integrations: web::Data<Integrations>,
) -> ApiResult<HttpResponse> {
    let signature = req
        .headers()
        .get("Paymongo-Signature")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Missing webhook signature"))?;

    integrations.paymongo.verify_webhook(signature, &body)?;
    let event = parse_event(&body)?;

    if event.event_type != EVENT_CHECKOUT_PAID {
        info!(event_type = %event.event_type, "Ignoring webhook event");
        return Ok(HttpResponse::Ok().json(json!({ "received": true })));
    }

    let pool: &MySqlPool = &platform;
    let found = match (event.subscription_id, event.resource_id.as_deref()) {
        (Some(id), _) => {
            sqlx::query_as::<_, (u64, u64, String)>("SELECT id, org_id, status FROM subscriptions WHERE id = ?")
                .bind(id)
                .fetch_optional(pool)
                .await?
        }
        (None, Some(session_id)) => {
            sqlx::query_as::<_, (u64, u64, String)>(
                "SELECT id, org_id, status FROM subscriptions WHERE checkout_session_id = ?",
            )
            .bind(session_id)
            .fetch_optional(pool)
            .await?
        }
        (None, None) => None,
    };

    let Some((subscription_id, org_id, status)) = found else {
        warn!(?event, "Paid event for an unknown subscription");
        return Ok(HttpResponse::Ok().json(json!({ "received": true })));
    };

    // redeliveries and payments for superseded checkouts are acknowledged only
    if SubscriptionStatus::from_str(&status).ok() != Some(SubscriptionStatus::Pending) {
        info!(subscription_id, %status, "Subscription not pending, nothing to do");
        return Ok(HttpResponse::Ok().json(json!({ "received": true })));
    }

    let mut tx = pool.begin().await?;
    activate_subscription(&mut tx, org_id, subscription_id).await?;
    tx.commit().await?;

    info!(org_id, subscription_id, "Subscription activated");
    audit_log::record(
        pool,
        AuditEntry {
            org_id: Some(org_id),
            user_id: None,
            action: "subscription.activate",
            entity: "subscription",
            entity_id: Some(subscription_id),
            details: event.resource_id.map(|id| json!({ "checkout_session_id": id })),
        },
    )
    .await;

    Ok(HttpResponse::Ok().json(json!({ "received": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, integrations::Integrations};
    use actix_web::{App, http::StatusCode, test, web};
    use sqlx::mysql::MySqlPoolOptions;

    fn plan(code: &str, price_cents: i64, max_employees: u32) -> CreatePlan {
        CreatePlan {
            code: code.into(),
            name: "Business".into(),
            price_cents,
            currency: None,
            max_employees,
        }
    }

    #[::core::prelude::v1::test]
    fn plan_defaults_to_php() {
        let (code, _, currency) = validate_plan(&plan(" Business ", 499_900, 2000)).unwrap();
        assert_eq!(code, "business");
        assert_eq!(currency, "PHP");
    }

    #[::core::prelude::v1::test]
    fn plan_rejects_negative_price_and_zero_cap() {
        assert!(validate_plan(&plan("biz", -1, 10)).is_err());
        assert!(validate_plan(&plan("biz", 100, 0)).is_err());
        assert!(validate_plan(&plan("biz plan", 100, 10)).is_err());
    }

    #[::core::prelude::v1::test]
    fn activation_retires_every_other_active_subscription_of_the_org() {
        assert!(SUPERSEDE_ACTIVE_SQL.contains("WHERE org_id = ? AND status = 'active' AND id <> ?"));
        assert!(ACTIVATE_SQL.contains("WHERE id = ? AND org_id = ?"));
    }

    #[actix_web::test]
    async fn webhook_without_signature_is_rejected() {
        // never connected: the handler must fail before touching the database
        let pool = MySqlPoolOptions::new()
            .connect_lazy("mysql://localhost/platform")
            .unwrap();
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(Config::for_tests()))
                .app_data(web::Data::new(PlatformDb(pool)))
                .app_data(web::Data::new(Integrations::disabled()))
                .route("/billing/webhook", web::post().to(webhook)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/billing/webhook")
            .set_payload(r#"{"data":{}}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
