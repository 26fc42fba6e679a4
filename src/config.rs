use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone)]
pub struct RecaptchaConfig {
    pub secret: String,
    pub min_score: f64,
}

#[derive(Clone)]
pub struct PayMongoConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Clone)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

#[derive(Clone)]
pub struct Config {
    pub server_addr: String,
    pub platform_database_url: String,
    pub tenant_database_url: String,
    pub jwt_secret: String,

    // token lifetimes in seconds
    pub access_token_ttl: usize,
    pub refresh_token_ttl: usize,
    pub two_factor_token_ttl: usize,
    pub signup_token_ttl: usize,

    // Rate limiting
    pub rate_login_per_min: u32,
    pub rate_signup_per_min: u32,
    pub rate_refresh_per_min: u32,
    pub rate_protected_per_min: u32,

    pub api_prefix: String,

    // startup migration loop
    pub migrate_attempts: u32,
    pub migrate_timeout: Duration,
    pub migrate_delay: Duration,

    // abandoned pending-payment signups
    pub pending_signup_ttl: Duration,
    pub cleanup_interval: Duration,

    pub totp_issuer: String,

    pub recaptcha: Option<RecaptchaConfig>,
    pub paymongo: Option<PayMongoConfig>,
    pub google_client_id: Option<String>,
    pub cloudinary: Option<CloudinaryConfig>,
    pub locationiq_key: Option<String>,
    pub smtp: Option<SmtpConfig>,
}

fn required(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{key} must be set"))
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value: {raw}")),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let recaptcha = match optional("RECAPTCHA_SECRET") {
            Some(secret) => Some(RecaptchaConfig {
                secret,
                min_score: parse_or("RECAPTCHA_MIN_SCORE", 0.5)?,
            }),
            None => None,
        };

        let paymongo = match optional("PAYMONGO_SECRET_KEY") {
            Some(secret_key) => Some(PayMongoConfig {
                secret_key,
                webhook_secret: required("PAYMONGO_WEBHOOK_SECRET")?,
                success_url: required("PAYMONGO_SUCCESS_URL")?,
                cancel_url: required("PAYMONGO_CANCEL_URL")?,
            }),
            None => None,
        };

        let cloudinary = match optional("CLOUDINARY_CLOUD_NAME") {
            Some(cloud_name) => Some(CloudinaryConfig {
                cloud_name,
                api_key: required("CLOUDINARY_API_KEY")?,
                api_secret: required("CLOUDINARY_API_SECRET")?,
            }),
            None => None,
        };

        let smtp = match optional("SMTP_HOST") {
            Some(host) => Some(SmtpConfig {
                host,
                port: parse_or("SMTP_PORT", 587)?,
                username: required("SMTP_USERNAME")?,
                password: required("SMTP_PASSWORD")?,
                from: required("SMTP_FROM")?,
            }),
            None => None,
        };

        Ok(Self {
            server_addr: required("SERVER_ADDR")?,
            platform_database_url: required("PLATFORM_DATABASE_URL")?,
            tenant_database_url: required("TENANT_DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,

            access_token_ttl: parse_or("ACCESS_TOKEN_TTL", 900)?, // 15 min
            refresh_token_ttl: parse_or("REFRESH_TOKEN_TTL", 604_800)?, // 7 days
            two_factor_token_ttl: parse_or("TWO_FACTOR_TOKEN_TTL", 300)?,
            signup_token_ttl: parse_or("SIGNUP_TOKEN_TTL", 900)?,

            rate_login_per_min: parse_or("RATE_LOGIN_PER_MIN", 60)?,
            rate_signup_per_min: parse_or("RATE_SIGNUP_PER_MIN", 30)?,
            rate_refresh_per_min: parse_or("RATE_REFRESH_PER_MIN", 30)?,
            rate_protected_per_min: parse_or("RATE_PROTECTED_PER_MIN", 1000)?,

            api_prefix: optional("API_PREFIX").unwrap_or_else(|| "/api".to_string()),

            migrate_attempts: parse_or("MIGRATE_ATTEMPTS", 10)?,
            migrate_timeout: Duration::from_secs(parse_or("MIGRATE_TIMEOUT_SECS", 30)?),
            migrate_delay: Duration::from_secs(parse_or("MIGRATE_DELAY_SECS", 5)?),

            pending_signup_ttl: Duration::from_secs(parse_or("PENDING_SIGNUP_TTL_SECS", 86_400)?),
            cleanup_interval: Duration::from_secs(parse_or("CLEANUP_INTERVAL_SECS", 900)?),

            totp_issuer: optional("TOTP_ISSUER").unwrap_or_else(|| "HRM SaaS".to_string()),

            recaptcha,
            paymongo,
            google_client_id: optional("GOOGLE_CLIENT_ID"),
            cloudinary,
            locationiq_key: optional("LOCATIONIQ_KEY"),
            smtp,
        })
    }

    /// Minimal config for handler and middleware tests.
    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            server_addr: "127.0.0.1:0".to_string(),
            platform_database_url: "mysql://localhost/platform".to_string(),
            tenant_database_url: "mysql://localhost/tenant".to_string(),
            jwt_secret: "test-secret".to_string(),
            access_token_ttl: 900,
            refresh_token_ttl: 3600,
            two_factor_token_ttl: 300,
            signup_token_ttl: 900,
            rate_login_per_min: 60,
            rate_signup_per_min: 30,
            rate_refresh_per_min: 30,
            rate_protected_per_min: 1000,
            api_prefix: "/api".to_string(),
            migrate_attempts: 1,
            migrate_timeout: Duration::from_secs(1),
            migrate_delay: Duration::from_secs(0),
            pending_signup_ttl: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(60),
            totp_issuer: "HRM SaaS".to_string(),
            recaptcha: None,
            paymongo: None,
            google_client_id: None,
            cloudinary: None,
            locationiq_key: None,
            smtp: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_or_falls_back_to_default_when_unset() {
        let value: u32 = parse_or("HRM_SAAS_TEST_UNSET_KEY", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn required_names_the_missing_key() {
        let err = required("HRM_SAAS_TEST_MISSING_KEY").unwrap_err();
        assert!(err.to_string().contains("HRM_SAAS_TEST_MISSING_KEY"));
    }
}
