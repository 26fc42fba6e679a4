use crate::{
    error::{ApiError, ApiResult},
    model::user::User,
    models::{Claims, TokenType},
};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use uuid::Uuid;

fn now() -> usize {
    Utc::now().timestamp().max(0) as usize
}

/// Identity fields copied into every token issued for a user.
#[derive(Debug, Clone)]
pub struct TokenSubject {
    pub user_id: u64,
    pub email: String,
    pub role: u8,
    pub org_id: Option<u64>,
    pub employee_id: Option<u64>,
}

impl From<&User> for TokenSubject {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role_id,
            org_id: user.org_id,
            employee_id: user.employee_id,
        }
    }
}

impl From<&Claims> for TokenSubject {
    fn from(claims: &Claims) -> Self {
        Self {
            user_id: claims.user_id,
            email: claims.sub.clone(),
            role: claims.role,
            org_id: claims.org_id,
            employee_id: claims.employee_id,
        }
    }
}

fn sign(claims: &Claims, secret: &str) -> ApiResult<String> {
    encode(
        &Header::default(),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::internal(format!("token encoding failed: {e}")))
}

fn claims_for(subject: &TokenSubject, token_type: TokenType, ttl: usize) -> Claims {
    Claims {
        user_id: subject.user_id,
        sub: subject.email.clone(),
        role: subject.role,
        exp: now() + ttl,
        jti: Uuid::new_v4().to_string(),
        token_type,
        org_id: subject.org_id,
        employee_id: subject.employee_id,
        name: None,
        google_sub: None,
    }
}

pub fn generate_access_token(subject: &TokenSubject, secret: &str, ttl: usize) -> ApiResult<String> {
    sign(&claims_for(subject, TokenType::Access, ttl), secret)
}

pub fn generate_refresh_token(
    subject: &TokenSubject,
    secret: &str,
    ttl: usize,
) -> ApiResult<(String, Claims)> {
    let claims = claims_for(subject, TokenType::Refresh, ttl);
    let token = sign(&claims, secret)?;
    Ok((token, claims))
}

/// Short-lived token proving the first login factor succeeded.
pub fn generate_two_factor_token(subject: &TokenSubject, secret: &str, ttl: usize) -> ApiResult<String> {
    sign(&claims_for(subject, TokenType::TwoFactor, ttl), secret)
}

/// Token carrying a verified Google identity into the signup form.
pub fn generate_signup_token(
    email: &str,
    name: Option<String>,
    google_sub: &str,
    secret: &str,
    ttl: usize,
) -> ApiResult<String> {
    let claims = Claims {
        user_id: 0,
        sub: email.to_string(),
        role: 0,
        exp: now() + ttl,
        jti: Uuid::new_v4().to_string(),
        token_type: TokenType::ExternalSignup,
        org_id: None,
        employee_id: None,
        name,
        google_sub: Some(google_sub.to_string()),
    };
    sign(&claims, secret)
}

pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| e.to_string())
}

/// Verifies the signature and expiry and that the token is of `expected` type.
pub fn verify_token_of(token: &str, secret: &str, expected: TokenType) -> ApiResult<Claims> {
    let claims = verify_token(token, secret)
        .map_err(|_| ApiError::unauthorized("Invalid or expired token"))?;

    if claims.token_type != expected {
        return Err(ApiError::unauthorized("Wrong token type"));
    }
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret";

    fn subject() -> TokenSubject {
        TokenSubject {
            user_id: 7,
            email: "hr@acme.test".to_string(),
            role: 3,
            org_id: Some(2),
            employee_id: Some(40),
        }
    }

    #[test]
    fn access_token_round_trips_identity() {
        let token = generate_access_token(&subject(), SECRET, 60).unwrap();
        let claims = verify_token_of(&token, SECRET, TokenType::Access).unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.sub, "hr@acme.test");
        assert_eq!(claims.org_id, Some(2));
        assert_eq!(claims.employee_id, Some(40));
    }

    #[test]
    fn refresh_token_is_not_an_access_token() {
        let (token, claims) = generate_refresh_token(&subject(), SECRET, 60).unwrap();
        assert_eq!(claims.token_type, TokenType::Refresh);
        assert!(verify_token_of(&token, SECRET, TokenType::Access).is_err());
        assert!(verify_token_of(&token, SECRET, TokenType::Refresh).is_ok());
    }

    #[test]
    fn two_factor_token_is_not_an_access_token() {
        let token = generate_two_factor_token(&subject(), SECRET, 60).unwrap();
        assert!(verify_token_of(&token, SECRET, TokenType::Access).is_err());
    }

    #[test]
    fn signup_token_carries_google_identity() {
        let token = generate_signup_token("new@acme.test", Some("New Person".into()), "g-123", SECRET, 60).unwrap();
        let claims = verify_token_of(&token, SECRET, TokenType::ExternalSignup).unwrap();
        assert_eq!(claims.sub, "new@acme.test");
        assert_eq!(claims.name.as_deref(), Some("New Person"));
        assert_eq!(claims.google_sub.as_deref(), Some("g-123"));
        assert_eq!(claims.user_id, 0);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = generate_access_token(&subject(), SECRET, 60).unwrap();
        assert!(verify_token(&token, "other").is_err());
    }

    #[test]
    fn each_token_gets_a_fresh_jti() {
        let (_, a) = generate_refresh_token(&subject(), SECRET, 60).unwrap();
        let (_, b) = generate_refresh_token(&subject(), SECRET, 60).unwrap();
        assert_ne!(a.jti, b.jti);
    }
}
