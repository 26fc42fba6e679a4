//! Clients for the third-party services the API talks to.
//!
//! Every client is built from an optional config group; a missing group
//! turns the integration off instead of failing startup.

pub mod cloudinary;
pub mod geocoding;
pub mod google;
pub mod mailer;
pub mod paymongo;
pub mod recaptcha;

use crate::config::Config;
use anyhow::{Context, Result};
use std::time::Duration;

pub struct Integrations {
    pub recaptcha: recaptcha::RecaptchaClient,
    pub google: google::GoogleVerifier,
    pub paymongo: paymongo::PayMongoClient,
    pub cloudinary: cloudinary::CloudinaryClient,
    pub geocoder: geocoding::Geocoder,
    pub mailer: mailer::Mailer,
}

impl Integrations {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("hrm-saas/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build http client")?;

        Ok(Self {
            recaptcha: recaptcha::RecaptchaClient::new(http.clone(), config.recaptcha.clone()),
            google: google::GoogleVerifier::new(http.clone(), config.google_client_id.clone()),
            paymongo: paymongo::PayMongoClient::new(http.clone(), config.paymongo.clone()),
            cloudinary: cloudinary::CloudinaryClient::new(http.clone(), config.cloudinary.clone()),
            geocoder: geocoding::Geocoder::new(http, config.locationiq_key.clone()),
            mailer: mailer::Mailer::new(config.smtp.clone())?,
        })
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        let http = reqwest::Client::new();
        Self {
            recaptcha: recaptcha::RecaptchaClient::new(http.clone(), None),
            google: google::GoogleVerifier::new(http.clone(), None),
            paymongo: paymongo::PayMongoClient::new(http.clone(), None),
            cloudinary: cloudinary::CloudinaryClient::new(http.clone(), None),
            geocoder: geocoding::Geocoder::new(http, None),
            mailer: mailer::Mailer::disabled(),
        }
    }
}
