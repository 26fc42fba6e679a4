//! PayMongo checkout sessions and webhook verification.

use crate::config::PayMongoConfig;
use crate::error::{ApiError, ApiResult};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{Value, json};
use sha2::Sha256;
use tracing::{error, warn};

const CHECKOUT_URL: &str = "https://api.paymongo.com/v1/checkout_sessions";

pub const EVENT_CHECKOUT_PAID: &str = "checkout_session.payment.paid";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone)]
pub struct CheckoutRequest<'a> {
    pub org_id: u64,
    pub subscription_id: u64,
    pub plan_name: &'a str,
    pub amount_cents: i64,
    pub currency: &'a str,
    pub customer_email: &'a str,
}

#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub id: String,
    pub checkout_url: String,
}

#[derive(Deserialize)]
struct CheckoutEnvelope {
    data: CheckoutData,
}

#[derive(Deserialize)]
struct CheckoutData {
    id: String,
    attributes: CheckoutAttributes,
}

#[derive(Deserialize)]
struct CheckoutAttributes {
    checkout_url: String,
}

pub struct PayMongoClient {
    http: reqwest::Client,
    config: Option<PayMongoConfig>,
}

impl PayMongoClient {
    pub fn new(http: reqwest::Client, config: Option<PayMongoConfig>) -> Self {
        Self { http, config }
    }

    fn config(&self) -> ApiResult<&PayMongoConfig> {
        self.config
            .as_ref()
            .ok_or_else(|| ApiError::ServiceUnavailable("Billing is not configured".into()))
    }

    pub async fn create_checkout(&self, req: &CheckoutRequest<'_>) -> ApiResult<CheckoutSession> {
        let config = self.config()?;
        let body = checkout_body(req, config);

        let response = self
            .http
            .post(CHECKOUT_URL)
            .basic_auth(&config.secret_key, Some(""))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "PayMongo checkout request failed");
                ApiError::ServiceUnavailable("Payment provider unavailable".into())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!(%status, body = %text, "PayMongo rejected checkout session");
            return Err(ApiError::ServiceUnavailable("Payment provider rejected the request".into()));
        }

        let envelope = response.json::<CheckoutEnvelope>().await.map_err(|e| {
            error!(error = %e, "PayMongo checkout body unreadable");
            ApiError::ServiceUnavailable("Payment provider unavailable".into())
        })?;

        Ok(CheckoutSession {
            id: envelope.data.id,
            checkout_url: envelope.data.attributes.checkout_url,
        })
    }

    pub fn verify_webhook(&self, signature_header: &str, body: &[u8]) -> ApiResult<()> {
        let config = self.config()?;
        if verify_signature(signature_header, body, &config.webhook_secret) {
            Ok(())
        } else {
            Err(ApiError::unauthorized("Invalid webhook signature"))
        }
    }
}

fn checkout_body(req: &CheckoutRequest<'_>, config: &PayMongoConfig) -> Value {
    json!({
        "data": {
            "attributes": {
                "line_items": [{
                    "name": format!("{} plan", req.plan_name),
                    "amount": req.amount_cents,
                    "currency": req.currency,
                    "quantity": 1
                }],
                "payment_method_types": ["card", "gcash", "paymaya"],
                "description": format!("{} subscription", req.plan_name),
                "reference_number": format!("sub-{}", req.subscription_id),
                "send_email_receipt": true,
                "billing": { "email": req.customer_email },
                "success_url": config.success_url,
                "cancel_url": config.cancel_url,
                "metadata": {
                    "org_id": req.org_id.to_string(),
                    "subscription_id": req.subscription_id.to_string()
                }
            }
        }
    })
}

/// Checks a `Paymongo-Signature` header (`t=<ts>,te=<hex>,li=<hex>`).
/// The signed payload is `<ts>.<raw body>`; either the test or the live
/// signature may match.
pub fn verify_signature(header: &str, body: &[u8], secret: &str) -> bool {
    let mut timestamp = None;
    let mut candidates = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = Some(v),
            Some(("te", v)) | Some(("li", v)) if !v.is_empty() => candidates.push(v),
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        return false;
    };

    candidates.into_iter().any(|candidate| {
        let Ok(expected) = hex::decode(candidate) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        mac.verify_slice(&expected).is_ok()
    })
}

/// The parts of a webhook event the billing handler acts on.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEvent {
    pub event_type: String,
    /// checkout session id (`cs_...`) for checkout events
    pub resource_id: Option<String>,
    pub subscription_id: Option<u64>,
}

pub fn parse_event(body: &[u8]) -> ApiResult<WebhookEvent> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|_| ApiError::bad_request("Webhook body is not JSON"))?;

    let attributes = &value["data"]["attributes"];
    let event_type = attributes["type"]
        .as_str()
        .ok_or_else(|| ApiError::bad_request("Webhook event has no type"))?
        .to_string();

    let resource = &attributes["data"];
    let resource_id = resource["id"].as_str().map(str::to_string);
    let subscription_id = resource["attributes"]["metadata"]["subscription_id"]
        .as_str()
        .and_then(|s| s.parse().ok());

    Ok(WebhookEvent {
        event_type,
        resource_id,
        subscription_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, ts: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(ts.as_bytes());
        mac.update(b".");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_mode_signature_verifies() {
        let body = br#"{"data":{}}"#;
        let header = format!("t=1700000000,te={},li=", sign("whsk", "1700000000", body));
        assert!(verify_signature(&header, body, "whsk"));
    }

    #[test]
    fn live_mode_signature_verifies() {
        let body = br#"{"data":{}}"#;
        let header = format!("t=1700000000,te=,li={}", sign("whsk", "1700000000", body));
        assert!(verify_signature(&header, body, "whsk"));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let body = br#"{"data":{"amount":100}}"#;
        let header = format!("t=1700000000,te={}", sign("whsk", "1700000000", body));
        assert!(!verify_signature(&header, br#"{"data":{"amount":1}}"#, "whsk"));
    }

    #[test]
    fn wrong_secret_or_missing_timestamp_is_rejected() {
        let body = b"{}";
        let sig = sign("whsk", "1", body);
        assert!(!verify_signature(&format!("t=1,te={sig}"), body, "other"));
        assert!(!verify_signature(&format!("te={sig}"), body, "whsk"));
    }

    #[test]
    fn paid_event_exposes_session_and_subscription() {
        let body = br#"{
            "data": {
                "id": "evt_1",
                "attributes": {
                    "type": "checkout_session.payment.paid",
                    "data": {
                        "id": "cs_abc",
                        "attributes": { "metadata": { "subscription_id": "42", "org_id": "7" } }
                    }
                }
            }
        }"#;
        let event = parse_event(body).unwrap();
        assert_eq!(event.event_type, EVENT_CHECKOUT_PAID);
        assert_eq!(event.resource_id.as_deref(), Some("cs_abc"));
        assert_eq!(event.subscription_id, Some(42));
    }

    #[test]
    fn checkout_body_carries_metadata_and_amount() {
        let config = PayMongoConfig {
            secret_key: "sk".into(),
            webhook_secret: "whsk".into(),
            success_url: "https://app/ok".into(),
            cancel_url: "https://app/cancel".into(),
        };
        let req = CheckoutRequest {
            org_id: 7,
            subscription_id: 42,
            plan_name: "Starter",
            amount_cents: 99900,
            currency: "PHP",
            customer_email: "a@acme.test",
        };
        let body = checkout_body(&req, &config);
        let attrs = &body["data"]["attributes"];
        assert_eq!(attrs["line_items"][0]["amount"], 99900);
        assert_eq!(attrs["metadata"]["subscription_id"], "42");
        assert_eq!(attrs["success_url"], "https://app/ok");
    }
}
