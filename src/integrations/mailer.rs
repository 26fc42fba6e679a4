use crate::config::SmtpConfig;
use actix_web::rt;
use anyhow::{Context, Result};
use lettre::message::{Mailbox, header::ContentType};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info, warn};

/// Plain-text notification mail over SMTP. Delivery runs on a spawned task,
/// so a slow relay never holds up a response; errors are logged and dropped.
pub struct Mailer {
    transport: Option<(AsyncSmtpTransport<Tokio1Executor>, Mailbox)>,
}

impl Mailer {
    pub fn new(config: Option<SmtpConfig>) -> Result<Self> {
        let Some(config) = config else {
            info!("SMTP not configured, outgoing mail disabled");
            return Ok(Self::disabled());
        };

        let from: Mailbox = config
            .from
            .parse()
            .with_context(|| format!("SMTP_FROM is not a mailbox: {}", config.from))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .with_context(|| format!("invalid SMTP host {}", config.host))?
            .port(config.port)
            .credentials(Credentials::new(config.username, config.password))
            .build();

        Ok(Self {
            transport: Some((transport, from)),
        })
    }

    pub fn disabled() -> Self {
        Self { transport: None }
    }

    /// Queues one mail. Returns `false` when nothing was queued.
    pub fn send(&self, to: &str, subject: &str, body: String) -> bool {
        let Some((transport, from)) = &self.transport else {
            debug!(to, subject, "Mail skipped, SMTP disabled");
            return false;
        };

        let to_mailbox: Mailbox = match to.parse() {
            Ok(m) => m,
            Err(e) => {
                warn!(to, error = %e, "Invalid recipient, mail skipped");
                return false;
            }
        };

        let message = match Message::builder()
            .from(from.clone())
            .to(to_mailbox)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
        {
            Ok(m) => m,
            Err(e) => {
                warn!(to, error = %e, "Failed to build mail");
                return false;
            }
        };

        let transport = transport.clone();
        let to = to.to_string();
        let subject = subject.to_string();
        rt::spawn(async move {
            match transport.send(message).await {
                Ok(_) => debug!(to, subject, "Mail sent"),
                Err(e) => warn!(to, subject, error = %e, "Mail delivery failed"),
            }
        });
        true
    }
}

pub fn welcome_body(org_name: &str, org_code: &str) -> String {
    format!(
        "Welcome aboard!\n\nYour organization {org_name} is registered with the code \"{org_code}\".\n\
         Sign in with this email address to start adding departments and employees.\n"
    )
}

pub fn leave_decision_body(employee_name: &str, status: &str, start: &str, end: &str) -> String {
    format!("Hi {employee_name},\n\nYour leave request for {start} to {end} was {status}.\n")
}

pub fn demo_ack_body(full_name: &str) -> String {
    format!(
        "Hi {full_name},\n\nThanks for requesting a demo. Our team will reach out within two business days.\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay() -> Mailer {
        Mailer::new(Some(SmtpConfig {
            host: "localhost".into(),
            port: 1,
            username: "hr".into(),
            password: "secret".into(),
            from: "HR <hr@acme.test>".into(),
        }))
        .unwrap()
    }

    #[test]
    fn disabled_mailer_is_a_no_op() {
        assert!(!Mailer::disabled().send("a@acme.test", "hi", "body".into()));
    }

    #[actix_web::test]
    async fn send_returns_before_delivery() {
        // the relay is unreachable; delivery fails later on the spawned task
        assert!(relay().send("a@acme.test", "hi", "body".into()));
    }

    #[actix_web::test]
    async fn invalid_recipient_is_skipped() {
        assert!(!relay().send("not-an-address", "hi", "body".into()));
    }

    #[test]
    fn leave_body_mentions_dates_and_status() {
        let body = leave_decision_body("Ana", "approved", "2026-03-01", "2026-03-03");
        assert!(body.contains("approved"));
        assert!(body.contains("2026-03-01 to 2026-03-03"));
    }
}
