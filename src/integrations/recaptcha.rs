use crate::config::RecaptchaConfig;
use crate::error::{ApiError, ApiResult};
use serde::Deserialize;
use tracing::{info, warn};

const VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    /// v3 only
    score: Option<f64>,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

pub struct RecaptchaClient {
    http: reqwest::Client,
    config: Option<RecaptchaConfig>,
}

impl RecaptchaClient {
    pub fn new(http: reqwest::Client, config: Option<RecaptchaConfig>) -> Self {
        Self { http, config }
    }

    /// Passes when reCAPTCHA is not configured. Network failures fail closed.
    pub async fn verify(&self, token: Option<&str>, remote_ip: Option<&str>) -> ApiResult<()> {
        let Some(config) = &self.config else {
            return Ok(());
        };

        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::bad_request("reCAPTCHA token is required"))?;

        let mut form = vec![("secret", config.secret.as_str()), ("response", token)];
        if let Some(ip) = remote_ip {
            form.push(("remoteip", ip));
        }

        let response = self
            .http
            .post(VERIFY_URL)
            .form(&form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                warn!(error = %e, "reCAPTCHA verification request failed");
                ApiError::ServiceUnavailable("reCAPTCHA verification unavailable".into())
            })?
            .json::<SiteVerifyResponse>()
            .await
            .map_err(|e| {
                warn!(error = %e, "reCAPTCHA returned an unreadable body");
                ApiError::ServiceUnavailable("reCAPTCHA verification unavailable".into())
            })?;

        if passes(&response, config.min_score) {
            Ok(())
        } else {
            info!(errors = ?response.error_codes, score = ?response.score, "reCAPTCHA rejected");
            Err(ApiError::bad_request("reCAPTCHA verification failed"))
        }
    }
}

fn passes(response: &SiteVerifyResponse, min_score: f64) -> bool {
    response.success && response.score.map_or(true, |score| score >= min_score)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> SiteVerifyResponse {
        serde_json::from_str(body).unwrap()
    }

    #[test]
    fn v2_success_passes() {
        assert!(passes(&parse(r#"{"success": true}"#), 0.5));
    }

    #[test]
    fn low_v3_score_fails() {
        assert!(!passes(&parse(r#"{"success": true, "score": 0.2}"#), 0.5));
        assert!(passes(&parse(r#"{"success": true, "score": 0.9}"#), 0.5));
    }

    #[test]
    fn failure_carries_error_codes() {
        let r = parse(r#"{"success": false, "error-codes": ["timeout-or-duplicate"]}"#);
        assert!(!passes(&r, 0.0));
        assert_eq!(r.error_codes, vec!["timeout-or-duplicate"]);
    }

    #[actix_web::test]
    async fn disabled_client_always_passes() {
        let client = RecaptchaClient::new(reqwest::Client::new(), None);
        assert!(client.verify(None, None).await.is_ok());
    }
}
