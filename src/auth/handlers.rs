use crate::{
    api::{
        audit_log::{self, AuditEntry},
        billing,
    },
    auth::{
        auth::{AuthUser, bearer_token},
        flow::{self, LoginDecision},
        jwt::{
            TokenSubject, generate_access_token, generate_refresh_token, generate_signup_token,
            generate_two_factor_token, verify_token, verify_token_of,
        },
        password::verify_password,
        rbac::{self, ModuleAccess},
        totp,
    },
    config::Config,
    db::PlatformDb,
    error::{ApiError, ApiResult},
    integrations::Integrations,
    model::{
        organization::{Organization, normalize_org_code},
        user::{USER_COLUMNS, User},
    },
    models::TokenType,
    utils::org_code_registry::OrgCodeRegistry,
};
use actix_web::{HttpRequest, HttpResponse, web};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::MySqlPool;
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

// ---------- lookups shared with signup and billing ----------

pub(crate) async fn find_user_by_email(pool: &MySqlPool, email: &str) -> ApiResult<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?");
    Ok(sqlx::query_as::<_, User>(&sql)
        .bind(email)
        .fetch_optional(pool)
        .await?)
}

pub(crate) async fn find_user_by_id(pool: &MySqlPool, id: u64) -> ApiResult<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
    Ok(sqlx::query_as::<_, User>(&sql).bind(id).fetch_optional(pool).await?)
}

async fn find_user_by_google(pool: &MySqlPool, subject: &str) -> ApiResult<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE google_subject = ?");
    Ok(sqlx::query_as::<_, User>(&sql)
        .bind(subject)
        .fetch_optional(pool)
        .await?)
}

pub(crate) async fn find_org(pool: &MySqlPool, org_id: u64) -> ApiResult<Option<Organization>> {
    Ok(sqlx::query_as::<_, Organization>(
        "SELECT id, code, name, email, address, status, created_at FROM organizations WHERE id = ?",
    )
    .bind(org_id)
    .fetch_optional(pool)
    .await?)
}

pub(crate) fn normalize_email(raw: &str) -> ApiResult<String> {
    let email = raw.trim().to_lowercase();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.') && !domain.ends_with('.'));
    if valid {
        Ok(email)
    } else {
        Err(ApiError::bad_request("A valid email address is required"))
    }
}

pub(crate) fn remote_ip(req: &HttpRequest) -> Option<String> {
    req.connection_info().realip_remote_addr().map(str::to_string)
}

// ---------- responses ----------

#[derive(Debug, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginResponse {
    Authenticated {
        access_token: String,
        refresh_token: String,
        /// seconds until the access token expires
        expires_in: usize,
    },
    TwoFactorRequired {
        challenge_token: String,
        expires_in: usize,
    },
    PaymentPending {
        org_id: u64,
        checkout_url: Option<String>,
        message: String,
    },
    SignupRequired {
        signup_token: String,
        email: String,
        name: Option<String>,
    },
}

/// Issues an access/refresh pair and records the refresh token.
pub(crate) async fn issue_session(pool: &MySqlPool, config: &Config, user: &User) -> ApiResult<LoginResponse> {
    let subject = TokenSubject::from(user);

    debug!(user_id = user.id, "Generating tokens");
    let access_token = generate_access_token(&subject, &config.jwt_secret, config.access_token_ttl)?;
    let (refresh_token, refresh_claims) =
        generate_refresh_token(&subject, &config.jwt_secret, config.refresh_token_ttl)?;

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (user_id, jti, expires_at)
        VALUES (?, ?, FROM_UNIXTIME(?))
        "#,
    )
    .bind(user.id)
    .bind(&refresh_claims.jti)
    .bind(refresh_claims.exp as i64)
    .execute(pool)
    .await?;

    // non-fatal
    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = ?")
        .bind(user.id)
        .execute(pool)
        .await
    {
        error!(error = %e, "Failed to update last_login_at");
    }

    Ok(LoginResponse::Authenticated {
        access_token,
        refresh_token,
        expires_in: config.access_token_ttl,
    })
}

/// Turns a login decision into the HTTP answer.
async fn respond(
    decision: LoginDecision,
    user: &User,
    pool: &MySqlPool,
    integrations: &Integrations,
    config: &Config,
) -> ApiResult<HttpResponse> {
    match decision {
        LoginDecision::Authenticated => {
            info!(user_id = user.id, "Login successful");
            Ok(HttpResponse::Ok().json(issue_session(pool, config, user).await?))
        }
        LoginDecision::TwoFactorRequired => {
            info!(user_id = user.id, "Second factor required");
            let challenge_token = generate_two_factor_token(
                &TokenSubject::from(user),
                &config.jwt_secret,
                config.two_factor_token_ttl,
            )?;
            Ok(HttpResponse::Ok().json(LoginResponse::TwoFactorRequired {
                challenge_token,
                expires_in: config.two_factor_token_ttl,
            }))
        }
        LoginDecision::PaymentPending { org_id } => {
            info!(user_id = user.id, org_id, "Login blocked by pending payment");
            let checkout_url = match billing::resume_checkout(pool, integrations, org_id, &user.email).await {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(error = %e, org_id, "Could not resume checkout");
                    None
                }
            };
            Ok(HttpResponse::PaymentRequired().json(LoginResponse::PaymentPending {
                org_id,
                checkout_url,
                message: "Complete payment to activate your organization".to_string(),
            }))
        }
        LoginDecision::Disabled(reason) => {
            info!(user_id = user.id, reason, "Login refused");
            Err(ApiError::forbidden(reason))
        }
    }
}

// ---------- password login ----------

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "admin@acme.test")]
    pub email: String,
    #[schema(example = "s3cret-pass")]
    pub password: String,
}

/// Email + password login
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Tokens issued or second factor required", body = LoginResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 402, description = "Organization payment pending", body = LoginResponse),
        (status = 403, description = "Account or organization disabled")
    ),
    tag = "Auth"
)]
#[instrument(name = "auth_login", skip(platform, config, integrations, body), fields(email = %body.email))]
pub async fn login(
    body: web::Json<LoginRequest>,
    platform: web::Data<PlatformDb>,
    config: web::Data<Config>,
    integrations: web::Data<Integrations>,
) -> ApiResult<HttpResponse> {
    info!("Login request received");
    let pool: &MySqlPool = &platform;

    if body.email.trim().is_empty() || body.password.is_empty() {
        return Err(ApiError::bad_request("Email and password are required"));
    }
    let email = body.email.trim().to_lowercase();

    let user = match find_user_by_email(pool, &email).await? {
        Some(u) => u,
        None => {
            info!("Invalid credentials: user not found");
            return Err(ApiError::unauthorized("Invalid credentials"));
        }
    };

    // google-only accounts have no password
    let Some(hash) = user.password_hash.as_deref() else {
        info!(user_id = user.id, "Password login on external-only account");
        return Err(ApiError::unauthorized("Invalid credentials"));
    };

    if !verify_password(&body.password, hash)? {
        info!(user_id = user.id, "Invalid credentials: password mismatch");
        return Err(ApiError::unauthorized("Invalid credentials"));
    }

    let org = match user.org_id {
        Some(org_id) => find_org(pool, org_id).await?,
        None => None,
    };

    respond(flow::decide(&user, org.as_ref()), &user, pool, &integrations, &config).await
}

// ---------- second factor ----------

#[derive(Deserialize, ToSchema)]
pub struct TwoFactorLoginRequest {
    pub challenge_token: String,
    #[schema(example = "123456")]
    pub code: String,
}

/// Completes a login that returned `two_factor_required`
#[utoipa::path(
    post,
    path = "/auth/login/2fa",
    request_body = TwoFactorLoginRequest,
    responses(
        (status = 200, description = "Tokens issued", body = LoginResponse),
        (status = 401, description = "Invalid challenge or code")
    ),
    tag = "Auth"
)]
#[instrument(name = "auth_login_2fa", skip_all)]
pub async fn login_two_factor(
    body: web::Json<TwoFactorLoginRequest>,
    platform: web::Data<PlatformDb>,
    config: web::Data<Config>,
    integrations: web::Data<Integrations>,
) -> ApiResult<HttpResponse> {
    let pool: &MySqlPool = &platform;
    let claims = verify_token_of(&body.challenge_token, &config.jwt_secret, TokenType::TwoFactor)?;

    let user = find_user_by_id(pool, claims.user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid challenge"))?;

    let secret = match (&user.totp_secret, user.totp_enabled) {
        (Some(secret), true) => secret,
        _ => return Err(ApiError::unauthorized("Two-factor authentication is not enabled")),
    };

    let now = Utc::now().timestamp().max(0) as u64;
    if !totp::verify_code(secret, &body.code, now) {
        info!(user_id = user.id, "Invalid TOTP code");
        return Err(ApiError::unauthorized("Invalid verification code"));
    }

    let org = match user.org_id {
        Some(org_id) => find_org(pool, org_id).await?,
        None => None,
    };

    // the second factor is satisfied now
    let decision = match flow::decide(&user, org.as_ref()) {
        LoginDecision::TwoFactorRequired => LoginDecision::Authenticated,
        other => other,
    };
    respond(decision, &user, pool, &integrations, &config).await
}

// ---------- google ----------

#[derive(Deserialize, ToSchema)]
pub struct GoogleLoginRequest {
    /// Google Identity Services ID token
    pub id_token: String,
}

/// Sign in with a Google ID token
#[utoipa::path(
    post,
    path = "/auth/google",
    request_body = GoogleLoginRequest,
    responses(
        (status = 200, description = "Tokens issued, second factor required, or signup required", body = LoginResponse),
        (status = 401, description = "Invalid Google token"),
        (status = 402, description = "Organization payment pending", body = LoginResponse),
        (status = 503, description = "Google login not configured")
    ),
    tag = "Auth"
)]
#[instrument(name = "auth_google", skip_all)]
pub async fn google_login(
    body: web::Json<GoogleLoginRequest>,
    platform: web::Data<PlatformDb>,
    config: web::Data<Config>,
    integrations: web::Data<Integrations>,
) -> ApiResult<HttpResponse> {
    let pool: &MySqlPool = &platform;
    let profile = integrations.google.verify_id_token(&body.id_token).await?;

    let user = match find_user_by_google(pool, &profile.subject).await? {
        Some(u) => Some(u),
        None => match find_user_by_email(pool, &profile.email).await? {
            Some(u) if u.google_subject.is_none() => {
                // first google sign-in for an existing password account
                sqlx::query("UPDATE users SET google_subject = ? WHERE id = ?")
                    .bind(&profile.subject)
                    .bind(u.id)
                    .execute(pool)
                    .await?;
                info!(user_id = u.id, "Linked Google account");
                Some(u)
            }
            Some(u) => {
                warn!(user_id = u.id, "Email is linked to a different Google account");
                return Err(ApiError::unauthorized("Email is linked to a different Google account"));
            }
            None => None,
        },
    };

    let Some(user) = user else {
        info!(email = %profile.email, "No account for Google identity, signup required");
        let signup_token = generate_signup_token(
            &profile.email,
            profile.name.clone(),
            &profile.subject,
            &config.jwt_secret,
            config.signup_token_ttl,
        )?;
        return Ok(HttpResponse::Ok().json(LoginResponse::SignupRequired {
            signup_token,
            email: profile.email,
            name: profile.name,
        }));
    };

    let org = match user.org_id {
        Some(org_id) => find_org(pool, org_id).await?,
        None => None,
    };

    respond(flow::decide(&user, org.as_ref()), &user, pool, &integrations, &config).await
}

// ---------- org code availability ----------

/// Check whether an organization code is free
#[utoipa::path(
    get,
    path = "/auth/org-code/{code}",
    params(("code" = String, Path, description = "Desired organization code")),
    responses(
        (status = 200, description = "Availability", body = Object, example = json!({"code": "acme", "available": true})),
        (status = 400, description = "Malformed code")
    ),
    tag = "Auth"
)]
pub async fn org_code_available(
    path: web::Path<String>,
    platform: web::Data<PlatformDb>,
    registry: web::Data<OrgCodeRegistry>,
) -> ApiResult<HttpResponse> {
    let code = normalize_org_code(&path.into_inner())
        .ok_or_else(|| ApiError::bad_request("Code must be 3-32 characters of a-z, 0-9 or '-'"))?;

    let available = registry.is_available(&code, &platform).await;

    Ok(HttpResponse::Ok().json(json!({ "code": code, "available": available })))
}

// ---------- refresh / logout ----------

/// Rotate a refresh token (sent as the bearer token)
#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "New token pair", body = LoginResponse),
        (status = 401, description = "Refresh token invalid, revoked or expired"),
        (status = 403, description = "Account disabled or organization not active")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn refresh_token(
    req: HttpRequest,
    platform: web::Data<PlatformDb>,
    config: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    let pool: &MySqlPool = &platform;
    let token = bearer_token(&req).ok_or_else(|| ApiError::unauthorized("No token"))?;
    let claims = verify_token_of(token, &config.jwt_secret, TokenType::Refresh)?;

    // find refresh token in DB
    let record = sqlx::query_as::<_, (u64, u64, bool)>(
        "SELECT id, user_id, revoked FROM refresh_tokens WHERE jti = ?",
    )
    .bind(&claims.jti)
    .fetch_optional(pool)
    .await?;

    let (record_id, user_id) = match record {
        Some((id, user_id, false)) => (id, user_id),
        _ => return Err(ApiError::unauthorized("Refresh token revoked")),
    };

    // revoke old refresh token; losing the race means someone else rotated it
    let revoked = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = ? AND revoked = FALSE")
        .bind(record_id)
        .execute(pool)
        .await?;
    if revoked.rows_affected() == 0 {
        return Err(ApiError::unauthorized("Refresh token revoked"));
    }

    // current role/org/employee link, not the ones baked into the old token
    let user = find_user_by_id(pool, user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Account no longer exists"))?;
    let org = match user.org_id {
        Some(org_id) => find_org(pool, org_id).await?,
        None => None,
    };
    flow::check_refresh(&user, org.as_ref())?;

    Ok(HttpResponse::Ok().json(issue_session(pool, &config, &user).await?))
}

/// Revoke a refresh token (sent as the bearer token); always 204
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Logged out")),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn logout(
    req: HttpRequest,
    platform: web::Data<PlatformDb>,
    config: web::Data<Config>,
) -> HttpResponse {
    let Some(token) = bearer_token(&req) else {
        return HttpResponse::NoContent().finish();
    };

    let claims = match verify_token(token, &config.jwt_secret) {
        Ok(c) if c.token_type == TokenType::Refresh => c,
        _ => return HttpResponse::NoContent().finish(),
    };

    // idempotent
    if let Err(e) = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE jti = ?")
        .bind(&claims.jti)
        .execute(&platform.0)
        .await
    {
        error!(error = %e, "Failed to revoke refresh token");
    }

    HttpResponse::NoContent().finish()
}

// ---------- current user ----------

#[derive(Serialize, ToSchema)]
pub struct MeResponse {
    pub user_id: u64,
    pub email: String,
    pub role: rbac::Role,
    pub org_id: Option<u64>,
    pub employee_id: Option<u64>,
    pub totp_enabled: bool,
    pub modules: Vec<ModuleAccess>,
}

/// Current user and the modules their role may open
#[utoipa::path(
    get,
    path = "/api/me",
    responses((status = 200, body = MeResponse), (status = 401, description = "Unauthorized")),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn me(auth: AuthUser, platform: web::Data<PlatformDb>) -> ApiResult<HttpResponse> {
    let user = find_user_by_id(&platform, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Account no longer exists"))?;

    Ok(HttpResponse::Ok().json(MeResponse {
        user_id: auth.user_id,
        email: auth.email.clone(),
        role: auth.role,
        org_id: auth.org_id,
        employee_id: auth.employee_id,
        totp_enabled: user.totp_enabled,
        modules: rbac::modules_for(auth.role),
    }))
}

/// Modules the caller's role may open, for building the navigation menu
#[utoipa::path(
    get,
    path = "/api/me/modules",
    responses((status = 200, body = [ModuleAccess]), (status = 401, description = "Unauthorized")),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn my_modules(auth: AuthUser) -> HttpResponse {
    HttpResponse::Ok().json(rbac::modules_for(auth.role))
}

// ---------- TOTP enrolment ----------

#[derive(Deserialize, ToSchema)]
pub struct TotpCodeRequest {
    #[schema(example = "123456")]
    pub code: String,
}

#[derive(Serialize, ToSchema)]
pub struct TotpSetupResponse {
    pub secret: String,
    pub otpauth_uri: String,
}

/// Start TOTP enrolment; returns a new secret to scan
#[utoipa::path(
    post,
    path = "/api/2fa/setup",
    responses(
        (status = 200, body = TotpSetupResponse),
        (status = 409, description = "Two-factor already enabled")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn totp_setup(
    auth: AuthUser,
    platform: web::Data<PlatformDb>,
    config: web::Data<Config>,
) -> ApiResult<HttpResponse> {
    let pool: &MySqlPool = &platform;
    let user = find_user_by_id(pool, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if user.totp_enabled {
        return Err(ApiError::conflict("Two-factor authentication is already enabled"));
    }

    let secret = totp::generate_secret();
    sqlx::query("UPDATE users SET totp_secret = ?, totp_enabled = FALSE WHERE id = ?")
        .bind(&secret)
        .bind(user.id)
        .execute(pool)
        .await?;

    let otpauth_uri = totp::provisioning_uri(&secret, &user.email, &config.totp_issuer)?;
    Ok(HttpResponse::Ok().json(TotpSetupResponse { secret, otpauth_uri }))
}

/// Confirm enrolment with a code from the authenticator app
#[utoipa::path(
    post,
    path = "/api/2fa/enable",
    request_body = TotpCodeRequest,
    responses(
        (status = 200, description = "Two-factor enabled"),
        (status = 400, description = "Invalid code or setup not started")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn totp_enable(
    auth: AuthUser,
    platform: web::Data<PlatformDb>,
    body: web::Json<TotpCodeRequest>,
) -> ApiResult<HttpResponse> {
    let pool: &MySqlPool = &platform;
    let user = find_user_by_id(pool, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if user.totp_enabled {
        return Err(ApiError::conflict("Two-factor authentication is already enabled"));
    }
    let secret = user
        .totp_secret
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("Call /2fa/setup first"))?;

    let now = Utc::now().timestamp().max(0) as u64;
    if !totp::verify_code(secret, &body.code, now) {
        return Err(ApiError::bad_request("Invalid verification code"));
    }

    sqlx::query("UPDATE users SET totp_enabled = TRUE WHERE id = ?")
        .bind(user.id)
        .execute(pool)
        .await?;

    audit_log::record(pool, AuditEntry::by(&auth, "user.2fa_enable", "user", Some(user.id))).await;

    Ok(HttpResponse::Ok().json(json!({ "message": "Two-factor authentication enabled" })))
}

/// Turn TOTP off; requires a current code
#[utoipa::path(
    post,
    path = "/api/2fa/disable",
    request_body = TotpCodeRequest,
    responses(
        (status = 200, description = "Two-factor disabled"),
        (status = 400, description = "Invalid code or not enabled")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
pub async fn totp_disable(
    auth: AuthUser,
    platform: web::Data<PlatformDb>,
    body: web::Json<TotpCodeRequest>,
) -> ApiResult<HttpResponse> {
    let pool: &MySqlPool = &platform;
    let user = find_user_by_id(pool, auth.user_id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let secret = match (&user.totp_secret, user.totp_enabled) {
        (Some(secret), true) => secret,
        _ => return Err(ApiError::bad_request("Two-factor authentication is not enabled")),
    };

    let now = Utc::now().timestamp().max(0) as u64;
    if !totp::verify_code(secret, &body.code, now) {
        return Err(ApiError::bad_request("Invalid verification code"));
    }

    sqlx::query("UPDATE users SET totp_secret = NULL, totp_enabled = FALSE WHERE id = ?")
        .bind(user.id)
        .execute(pool)
        .await?;

    audit_log::record(pool, AuditEntry::by(&auth, "user.2fa_disable", "user", Some(user.id))).await;

    Ok(HttpResponse::Ok().json(json!({ "message": "Two-factor authentication disabled" })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Ana@Acme.TEST ").unwrap(), "ana@acme.test");
    }

    #[test]
    fn malformed_emails_are_rejected() {
        for bad in ["", "ana", "@acme.test", "ana@acme", "ana@acme."] {
            assert!(normalize_email(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn login_response_is_tagged_by_status() {
        let value = serde_json::to_value(LoginResponse::TwoFactorRequired {
            challenge_token: "t".into(),
            expires_in: 300,
        })
        .unwrap();
        assert_eq!(value["status"], "two_factor_required");
        assert_eq!(value["challenge_token"], "t");

        let value = serde_json::to_value(LoginResponse::PaymentPending {
            org_id: 4,
            checkout_url: None,
            message: "pay".into(),
        })
        .unwrap();
        assert_eq!(value["status"], "payment_pending");
        assert_eq!(value["org_id"], 4);
    }
}
