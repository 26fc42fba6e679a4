//! Self-service organization signup.
//!
//! One platform transaction creates the organization, its first OrgAdmin and
//! a subscription. The free plan is active immediately and the response
//! carries tokens; a paid plan leaves the organization in `pending_payment`
//! and the response carries a PayMongo checkout URL instead.

use crate::{
    api::billing::{self, FREE_PLAN_CODE},
    auth::{
        handlers::{LoginResponse, find_user_by_email, find_user_by_id, issue_session, normalize_email, remote_ip},
        jwt::verify_token_of,
        password::{hash_password, validate_password},
        rbac::Role,
    },
    config::Config,
    db::PlatformDb,
    error::{ApiError, ApiResult, is_unique_violation},
    integrations::{Integrations, mailer},
    model::organization::{OrgStatus, normalize_org_code},
    models::TokenType,
    utils::org_code_registry::OrgCodeRegistry,
};
use actix_web::{HttpRequest, HttpResponse, web};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

#[derive(Deserialize, ToSchema)]
pub struct SignupRequest {
    #[schema(example = "Acme Corporation")]
    pub org_name: String,
    #[schema(example = "acme")]
    pub org_code: String,
    pub address: Option<String>,
    /// Required unless `signup_token` is given
    #[schema(example = "admin@acme.test")]
    pub email: Option<String>,
    /// Required unless `signup_token` is given
    pub password: Option<String>,
    /// Defaults to the free plan
    #[schema(example = "starter")]
    pub plan_code: Option<String>,
    /// Token returned by `/auth/google` with status `signup_required`
    pub signup_token: Option<String>,
    pub recaptcha_token: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct SignupResponse {
    pub org_id: u64,
    pub org_code: String,
    pub status: OrgStatus,
    /// Present for the free plan
    pub session: Option<LoginResponse>,
    /// Present for paid plans; absent if the payment provider could not be reached
    pub checkout_url: Option<String>,
}

/// Who is signing up, after the token or the password was checked.
#[derive(Debug, PartialEq)]
struct Applicant {
    email: String,
    password: Option<String>,
    google_subject: Option<String>,
}

fn applicant(payload: &SignupRequest, jwt_secret: &str) -> ApiResult<Applicant> {
    if let Some(token) = payload.signup_token.as_deref() {
        let claims = verify_token_of(token, jwt_secret, TokenType::ExternalSignup)?;
        if let Some(password) = payload.password.as_deref() {
            validate_password(password)?;
        }
        return Ok(Applicant {
            email: normalize_email(&claims.sub)?,
            password: payload.password.clone(),
            google_subject: claims.google_sub,
        });
    }

    let email = payload
        .email
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("Email is required"))?;
    let password = payload
        .password
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("Password is required"))?;
    validate_password(password)?;

    Ok(Applicant {
        email: normalize_email(email)?,
        password: Some(password.to_string()),
        google_subject: None,
    })
}

fn org_fields(payload: &SignupRequest) -> ApiResult<(String, String)> {
    let name = payload.org_name.trim();
    if name.is_empty() || name.chars().count() > 150 {
        return Err(ApiError::bad_request("Organization name is required (max 150 characters)"));
    }
    let code = normalize_org_code(&payload.org_code)
        .ok_or_else(|| ApiError::bad_request("Code must be 3-32 characters of a-z, 0-9 or '-'"))?;
    Ok((name.to_string(), code))
}

/// Register a new organization
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Organization created", body = SignupResponse),
        (status = 400, description = "Validation or captcha failed"),
        (status = 409, description = "Organization code or email already registered"),
        (status = 503, description = "Captcha verification unavailable")
    ),
    tag = "Auth"
)]
#[instrument(name = "auth_signup", skip_all, fields(org_code = %payload.org_code))]
pub async fn signup(
    req: HttpRequest,
    payload: web::Json<SignupRequest>,
    platform: web::Data<PlatformDb>,
    config: web::Data<Config>,
    integrations: web::Data<Integrations>,
    registry: web::Data<OrgCodeRegistry>,
) -> ApiResult<HttpResponse> {
    info!("Signup request received");
    let pool: &MySqlPool = &platform;

    integrations
        .recaptcha
        .verify(payload.recaptcha_token.as_deref(), remote_ip(&req).as_deref())
        .await?;

    let applicant = applicant(&payload, &config.jwt_secret)?;
    let (org_name, org_code) = org_fields(&payload)?;
    let address = payload.address.as_deref().map(str::trim).filter(|a| !a.is_empty());
    let plan = billing::find_plan(pool, payload.plan_code.as_deref().unwrap_or(FREE_PLAN_CODE)).await?;

    if !registry.is_available(&org_code, pool).await {
        return Err(ApiError::conflict("Organization code is already taken"));
    }
    if find_user_by_email(pool, &applicant.email).await?.is_some() {
        return Err(ApiError::conflict("Email is already registered"));
    }

    let password_hash = applicant.password.as_deref().map(hash_password).transpose()?;
    let status = if plan.is_free() { OrgStatus::Active } else { OrgStatus::PendingPayment };

    let duplicate = |e: sqlx::Error| {
        if is_unique_violation(&e) {
            ApiError::conflict("Organization code or email already registered")
        } else {
            ApiError::from(e)
        }
    };

    let mut tx = pool.begin().await?;

    let org_id = sqlx::query("INSERT INTO organizations (code, name, email, address, status) VALUES (?, ?, ?, ?, ?)")
        .bind(&org_code)
        .bind(&org_name)
        .bind(&applicant.email)
        .bind(address)
        .bind(status.as_ref())
        .execute(&mut *tx)
        .await
        .map_err(duplicate)?
        .last_insert_id();

    let user_id = sqlx::query(
        "INSERT INTO users (org_id, email, password_hash, role_id, google_subject) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(org_id)
    .bind(&applicant.email)
    .bind(&password_hash)
    .bind(Role::OrgAdmin.id())
    .bind(&applicant.google_subject)
    .execute(&mut *tx)
    .await
    .map_err(duplicate)?
    .last_insert_id();

    let subscription_id = sqlx::query("INSERT INTO subscriptions (org_id, plan_id) VALUES (?, ?)")
        .bind(org_id)
        .bind(plan.id)
        .execute(&mut *tx)
        .await?
        .last_insert_id();

    if plan.is_free() {
        billing::activate_subscription(&mut tx, org_id, subscription_id).await?;
    }

    tx.commit().await?;
    registry.mark_taken(&org_code).await;
    info!(org_id, user_id, plan = %plan.code, "Organization registered");

    integrations
        .mailer
        .send(
            &applicant.email,
            "Welcome to your HR workspace",
            mailer::welcome_body(&org_name, &org_code),
        );

    let mut response = SignupResponse {
        org_id,
        org_code,
        status,
        session: None,
        checkout_url: None,
    };

    if plan.is_free() {
        let user = find_user_by_id(pool, user_id)
            .await?
            .ok_or_else(|| ApiError::internal("user vanished after signup"))?;
        response.session = Some(issue_session(pool, &config, &user).await?);
    } else {
        // the org stays pending; logging in offers a fresh checkout
        match billing::start_checkout(pool, &integrations, org_id, subscription_id, &plan, &applicant.email).await {
            Ok(url) => response.checkout_url = Some(url),
            Err(e) => warn!(error = %e, org_id, "Checkout could not be started at signup"),
        }
    }

    Ok(HttpResponse::Created().json(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::{TokenSubject, generate_access_token, generate_signup_token};

    const SECRET: &str = "signup-secret";

    fn request() -> SignupRequest {
        SignupRequest {
            org_name: " Acme ".into(),
            org_code: "Acme".into(),
            address: None,
            email: Some("Admin@Acme.test".into()),
            password: Some("long-enough".into()),
            plan_code: None,
            signup_token: None,
            recaptcha_token: None,
        }
    }

    #[test]
    fn password_signup_needs_email_and_password() {
        let mut req = request();
        req.password = None;
        assert!(applicant(&req, SECRET).is_err());

        let mut req = request();
        req.email = None;
        assert!(applicant(&req, SECRET).is_err());
    }

    #[test]
    fn short_passwords_are_rejected() {
        let mut req = request();
        req.password = Some("short".into());
        assert!(matches!(applicant(&req, SECRET), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn password_applicant_is_normalized() {
        let a = applicant(&request(), SECRET).unwrap();
        assert_eq!(a.email, "admin@acme.test");
        assert_eq!(a.google_subject, None);
    }

    #[test]
    fn google_signup_takes_identity_from_token() {
        let token = generate_signup_token("g@acme.test", Some("G".into()), "sub-123", SECRET, 60).unwrap();
        let mut req = request();
        req.email = Some("ignored@acme.test".into());
        req.password = None;
        req.signup_token = Some(token);

        let a = applicant(&req, SECRET).unwrap();
        assert_eq!(a.email, "g@acme.test");
        assert_eq!(a.password, None);
        assert_eq!(a.google_subject.as_deref(), Some("sub-123"));
    }

    #[test]
    fn access_token_is_not_a_signup_token() {
        let subject = TokenSubject {
            user_id: 1,
            email: "a@acme.test".into(),
            role: 2,
            org_id: Some(1),
            employee_id: None,
        };
        let mut req = request();
        req.signup_token = Some(generate_access_token(&subject, SECRET, 60).unwrap());
        assert!(matches!(applicant(&req, SECRET), Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn org_fields_are_validated() {
        assert_eq!(org_fields(&request()).unwrap(), ("Acme".to_string(), "acme".to_string()));

        let mut req = request();
        req.org_code = "a b".into();
        assert!(org_fields(&req).is_err());
    }
}
