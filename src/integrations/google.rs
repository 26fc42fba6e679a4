use crate::error::{ApiError, ApiResult};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Verified identity from a Google ID token.
#[derive(Debug, Clone, PartialEq)]
pub struct GoogleProfile {
    pub subject: String,
    pub email: String,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: String,
    sub: String,
    email: Option<String>,
    /// tokeninfo sends this as the string "true"; accept a bool as well
    email_verified: Option<Value>,
    name: Option<String>,
}

pub struct GoogleVerifier {
    http: reqwest::Client,
    client_id: Option<String>,
}

impl GoogleVerifier {
    pub fn new(http: reqwest::Client, client_id: Option<String>) -> Self {
        Self { http, client_id }
    }

    pub async fn verify_id_token(&self, id_token: &str) -> ApiResult<GoogleProfile> {
        let client_id = self
            .client_id
            .as_deref()
            .ok_or_else(|| ApiError::ServiceUnavailable("Google login is not configured".into()))?;

        let response = self
            .http
            .get(TOKENINFO_URL)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Google tokeninfo request failed");
                ApiError::ServiceUnavailable("Google login unavailable".into())
            })?;

        if !response.status().is_success() {
            return Err(ApiError::unauthorized("Invalid Google token"));
        }

        let info = response.json::<TokenInfo>().await.map_err(|e| {
            warn!(error = %e, "Google tokeninfo body unreadable");
            ApiError::ServiceUnavailable("Google login unavailable".into())
        })?;

        profile_from(info, client_id)
    }
}

fn is_true(value: &Option<Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn profile_from(info: TokenInfo, client_id: &str) -> ApiResult<GoogleProfile> {
    if info.aud != client_id {
        return Err(ApiError::unauthorized("Google token was issued for another client"));
    }
    if !is_true(&info.email_verified) {
        return Err(ApiError::unauthorized("Google email is not verified"));
    }
    let email = info
        .email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Google token has no email"))?;

    Ok(GoogleProfile {
        subject: info.sub,
        email,
        name: info.name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(body: &str) -> TokenInfo {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn verified_token_for_our_client_is_accepted() {
        let profile = profile_from(
            info(r#"{"aud":"cid","sub":"123","email":"Jane@Acme.test","email_verified":"true","name":"Jane"}"#),
            "cid",
        )
        .unwrap();
        assert_eq!(profile.email, "jane@acme.test");
        assert_eq!(profile.subject, "123");
        assert_eq!(profile.name.as_deref(), Some("Jane"));
    }

    #[test]
    fn foreign_audience_is_rejected() {
        let r = profile_from(
            info(r#"{"aud":"other","sub":"1","email":"a@b.c","email_verified":true}"#),
            "cid",
        );
        assert!(r.is_err());
    }

    #[test]
    fn unverified_email_is_rejected() {
        let r = profile_from(
            info(r#"{"aud":"cid","sub":"1","email":"a@b.c","email_verified":"false"}"#),
            "cid",
        );
        assert!(r.is_err());
    }
}
