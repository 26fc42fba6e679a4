use crate::config::CloudinaryConfig;
use crate::error::{ApiError, ApiResult};
use chrono::Utc;
use serde::Deserialize;
use sha1::{Digest, Sha1};
use tracing::{error, warn};

/// Largest accepted data URI, roughly 5 MB of image.
pub const MAX_DATA_URI_LEN: usize = 7 * 1024 * 1024;

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: String,
}

pub struct CloudinaryClient {
    http: reqwest::Client,
    config: Option<CloudinaryConfig>,
}

impl CloudinaryClient {
    pub fn new(http: reqwest::Client, config: Option<CloudinaryConfig>) -> Self {
        Self { http, config }
    }

    /// Uploads a `data:image/...;base64,` URI and returns its HTTPS URL.
    pub async fn upload_image(&self, data_uri: &str, folder: &str, public_id: &str) -> ApiResult<String> {
        let config = self
            .config
            .as_ref()
            .ok_or_else(|| ApiError::ServiceUnavailable("Image storage is not configured".into()))?;

        validate_data_uri(data_uri)?;

        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign_params(
            &[("folder", folder), ("public_id", public_id), ("timestamp", &timestamp)],
            &config.api_secret,
        );

        let url = format!("https://api.cloudinary.com/v1_1/{}/image/upload", config.cloud_name);
        let form = [
            ("file", data_uri),
            ("api_key", config.api_key.as_str()),
            ("timestamp", timestamp.as_str()),
            ("folder", folder),
            ("public_id", public_id),
            ("signature", signature.as_str()),
        ];

        let response = self.http.post(url).form(&form).send().await.map_err(|e| {
            warn!(error = %e, "Cloudinary upload request failed");
            ApiError::ServiceUnavailable("Image storage unavailable".into())
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            error!(%status, body = %text, "Cloudinary rejected upload");
            return Err(ApiError::bad_request("Image upload was rejected"));
        }

        response
            .json::<UploadResponse>()
            .await
            .map(|r| r.secure_url)
            .map_err(|e| {
                error!(error = %e, "Cloudinary upload body unreadable");
                ApiError::ServiceUnavailable("Image storage unavailable".into())
            })
    }
}

fn validate_data_uri(data_uri: &str) -> ApiResult<()> {
    if !data_uri.starts_with("data:image/") || !data_uri.contains(";base64,") {
        return Err(ApiError::bad_request("Photo must be a base64 image data URI"));
    }
    if data_uri.len() > MAX_DATA_URI_LEN {
        return Err(ApiError::bad_request("Photo is too large"));
    }
    Ok(())
}

/// Cloudinary signature: params sorted by key, joined as `k=v&...`, secret
/// appended, SHA-1 hex.
pub fn sign_params(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));

    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha1::new();
    hasher.update(joined.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_cloudinary_docs_example() {
        // example from the Cloudinary authentication docs
        let sig = sign_params(
            &[
                ("timestamp", "1315060510"),
                ("public_id", "sample_image"),
                ("eager", "w_400,h_300,c_pad|w_260,h_200,c_crop"),
            ],
            "abcd",
        );
        assert_eq!(sig, "bfd09f95f331f558cbd1320e67aa8d488770583e");
    }

    #[test]
    fn only_image_data_uris_are_accepted() {
        assert!(validate_data_uri("data:image/png;base64,iVBORw0KGgo=").is_ok());
        assert!(validate_data_uri("https://example.com/a.png").is_err());
        assert!(validate_data_uri("data:text/plain;base64,aGk=").is_err());
    }
}
