use serde::Deserialize;
use tracing::{debug, warn};

const REVERSE_URL: &str = "https://us1.locationiq.com/v1/reverse";

/// Width of `attendance.address`, in characters.
pub const MAX_ADDRESS_CHARS: usize = 255;

#[derive(Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
}

/// LocationIQ reverse geocoding. Lookups are best effort: any failure
/// yields `None` and the caller stores the raw coordinates only.
pub struct Geocoder {
    http: reqwest::Client,
    api_key: Option<String>,
}

/// Cuts an address to the column width on a char boundary.
pub fn fit_address(mut address: String) -> String {
    if let Some((idx, _)) = address.char_indices().nth(MAX_ADDRESS_CHARS) {
        address.truncate(idx);
    }
    address
}

pub fn valid_coordinates(latitude: f64, longitude: f64) -> bool {
    (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude)
}

impl Geocoder {
    pub fn new(http: reqwest::Client, api_key: Option<String>) -> Self {
        Self { http, api_key }
    }

    pub async fn reverse(&self, latitude: f64, longitude: f64) -> Option<String> {
        let key = self.api_key.as_deref()?;
        if !valid_coordinates(latitude, longitude) {
            return None;
        }

        let lat = latitude.to_string();
        let lon = longitude.to_string();
        let result = self
            .http
            .get(REVERSE_URL)
            .query(&[("key", key), ("lat", &lat), ("lon", &lon), ("format", "json")])
            .send()
            .await
            .and_then(|r| r.error_for_status());

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Reverse geocoding failed");
                return None;
            }
        };

        match response.json::<ReverseResponse>().await {
            Ok(body) => body.display_name.map(fit_address),
            Err(e) => {
                debug!(error = %e, "Reverse geocoding body unreadable");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_are_range_checked() {
        assert!(valid_coordinates(14.5547, 121.0244));
        assert!(!valid_coordinates(91.0, 0.0));
        assert!(!valid_coordinates(0.0, -181.0));
    }

    #[test]
    fn long_addresses_are_cut_to_the_column_width() {
        let long = "Ñ".repeat(300);
        let fitted = fit_address(long);
        assert_eq!(fitted.chars().count(), MAX_ADDRESS_CHARS);
        assert!(fitted.chars().all(|c| c == 'Ñ'));

        let short = "Makati, Metro Manila".to_string();
        assert_eq!(fit_address(short.clone()), short);
        assert_eq!(fit_address("a".repeat(MAX_ADDRESS_CHARS)).len(), MAX_ADDRESS_CHARS);
    }

    #[actix_web::test]
    async fn without_key_lookup_is_skipped() {
        let geocoder = Geocoder::new(reqwest::Client::new(), None);
        assert_eq!(geocoder.reverse(14.5, 121.0).await, None);
    }
}
