//! RFC 6238 time-based one-time passwords (HMAC-SHA1, 30 s step, 6 digits).

use crate::error::{ApiError, ApiResult};
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use reqwest::Url;
use sha1::Sha1;

type HmacSha1 = Hmac<Sha1>;

pub const STEP_SECS: u64 = 30;
pub const DIGITS: u32 = 6;
/// Accepted drift in steps on either side of the current one.
pub const SKEW_STEPS: u64 = 1;
const SECRET_LEN: usize = 20;

/// New random secret, base32 without padding.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_LEN];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    BASE32_NOPAD.encode(&bytes)
}

fn decode_secret(secret: &str) -> Option<Vec<u8>> {
    let cleaned: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    BASE32_NOPAD.decode(cleaned.as_bytes()).ok()
}

/// RFC 4226 HOTP value for `counter`.
pub fn hotp(key: &[u8], counter: u64, digits: u32) -> Option<u32> {
    let mut mac = HmacSha1::new_from_slice(key).ok()?;
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = ((digest[offset] as u32 & 0x7f) << 24)
        | ((digest[offset + 1] as u32) << 16)
        | ((digest[offset + 2] as u32) << 8)
        | digest[offset + 3] as u32;

    Some(binary % 10u32.pow(digits))
}

pub fn code_at(secret: &str, unix_time: u64) -> Option<String> {
    let key = decode_secret(secret)?;
    let value = hotp(&key, unix_time / STEP_SECS, DIGITS)?;
    Some(format!("{:0width$}", value, width = DIGITS as usize))
}

/// Checks `code` against the current step and `SKEW_STEPS` around it.
pub fn verify_code(secret: &str, code: &str, unix_time: u64) -> bool {
    let code = code.trim();
    if code.len() != DIGITS as usize || !code.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let Some(key) = decode_secret(secret) else {
        return false;
    };

    let current = unix_time / STEP_SECS;
    let first = current.saturating_sub(SKEW_STEPS);
    (first..=current + SKEW_STEPS).any(|counter| {
        hotp(&key, counter, DIGITS)
            .map(|v| format!("{:0width$}", v, width = DIGITS as usize) == code)
            .unwrap_or(false)
    })
}

/// `otpauth://` URI understood by authenticator apps.
pub fn provisioning_uri(secret: &str, email: &str, issuer: &str) -> ApiResult<String> {
    let mut url = Url::parse("otpauth://totp/")
        .map_err(|e| ApiError::internal(format!("otpauth url: {e}")))?;
    url.set_path(&format!("{issuer}:{email}"));
    url.query_pairs_mut()
        .append_pair("secret", secret)
        .append_pair("issuer", issuer)
        .append_pair("algorithm", "SHA1")
        .append_pair("digits", &DIGITS.to_string())
        .append_pair("period", &STEP_SECS.to_string());
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 6238 appendix B, SHA-1 key
    const RFC_KEY: &[u8] = b"12345678901234567890";

    #[test]
    fn matches_rfc6238_sha1_vectors() {
        let cases = [
            (59u64, 94287082u32),
            (1111111109, 7081804),
            (1111111111, 14050471),
            (1234567890, 89005924),
            (2000000000, 69279037),
        ];
        for (time, expected) in cases {
            assert_eq!(hotp(RFC_KEY, time / STEP_SECS, 8), Some(expected), "t={time}");
        }
    }

    #[test]
    fn six_digit_codes_are_zero_padded() {
        let secret = BASE32_NOPAD.encode(RFC_KEY);
        assert_eq!(code_at(&secret, 1111111109).as_deref(), Some("081804"));
    }

    #[test]
    fn verify_accepts_one_step_of_drift() {
        let secret = BASE32_NOPAD.encode(RFC_KEY);
        let code = code_at(&secret, 1234567890).unwrap();
        assert!(verify_code(&secret, &code, 1234567890));
        assert!(verify_code(&secret, &code, 1234567890 + STEP_SECS));
        assert!(verify_code(&secret, &code, 1234567890 - STEP_SECS));
        assert!(!verify_code(&secret, &code, 1234567890 + 3 * STEP_SECS));
    }

    #[test]
    fn verify_rejects_malformed_codes() {
        let secret = generate_secret();
        assert!(!verify_code(&secret, "12345", 0));
        assert!(!verify_code(&secret, "abcdef", 0));
        assert!(!verify_code("not base32 !!", "123456", 0));
    }

    #[test]
    fn generated_secrets_decode_to_twenty_bytes() {
        let secret = generate_secret();
        assert_eq!(decode_secret(&secret).map(|k| k.len()), Some(SECRET_LEN));
    }

    #[test]
    fn lowercase_secrets_are_accepted() {
        let secret = BASE32_NOPAD.encode(RFC_KEY).to_lowercase();
        assert_eq!(code_at(&secret, 59).as_deref(), Some("287082"));
    }

    #[test]
    fn provisioning_uri_names_issuer_and_secret() {
        let uri = provisioning_uri("JBSWY3DPEHPK3PXP", "hr@acme.test", "HRM SaaS").unwrap();
        assert!(uri.starts_with("otpauth://totp/"));
        assert!(uri.contains("secret=JBSWY3DPEHPK3PXP"));
        assert!(uri.contains("issuer=HRM+SaaS"));
        assert!(uri.contains("hr@acme.test"));
    }
}
