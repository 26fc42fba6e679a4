//! Background maintenance loops spawned at startup.

use crate::{
    config::Config,
    db::PlatformDb,
    model::organization::{OrgStatus, Organization},
    utils::org_code_registry::OrgCodeRegistry,
};
use actix_web::{rt, web::Data};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::MySqlPool;
use std::time::Duration;
use tracing::{error, info};

/// Every `cleanup_interval`: drop signups that never paid, expire lapsed
/// paid subscriptions and purge expired refresh tokens.
pub fn spawn_maintenance(platform: PlatformDb, registry: Data<OrgCodeRegistry>, config: &Config) {
    let every = config.cleanup_interval;
    let pending_ttl = config.pending_signup_ttl;

    rt::spawn(async move {
        let mut ticker = rt::time::interval(every);
        loop {
            ticker.tick().await;

            match cleanup_pending_signups(&platform, &registry, pending_ttl).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "Removed abandoned signups"),
                Err(e) => error!(error = %e, "Pending signup cleanup failed"),
            }

            match expire_subscriptions(&platform).await {
                Ok(0) => {}
                Ok(expired) => info!(expired, "Expired lapsed subscriptions"),
                Err(e) => error!(error = %e, "Subscription expiry failed"),
            }

            if let Err(e) = purge_refresh_tokens(&platform).await {
                error!(error = %e, "Refresh token purge failed");
            }
        }
    });
}

/// Signups created before this instant are abandoned.
fn pending_cutoff(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_sub_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn is_abandoned(org: &Organization, cutoff: DateTime<Utc>) -> bool {
    org.status() == Some(OrgStatus::PendingPayment) && org.created_at < cutoff
}

/// Deletes organizations stuck in `pending_payment` for longer than `ttl`
/// together with their users, tokens and subscriptions.
pub async fn cleanup_pending_signups(pool: &MySqlPool, registry: &OrgCodeRegistry, ttl: Duration) -> Result<usize> {
    let cutoff = pending_cutoff(Utc::now(), ttl);
    let candidates = sqlx::query_as::<_, Organization>(
        r#"
        SELECT id, code, name, email, address, status, created_at FROM organizations
        WHERE status = 'pending_payment' AND created_at < ?
        "#,
    )
    .bind(cutoff)
    .fetch_all(pool)
    .await
    .context("listing pending signups")?;

    let stale = candidates
        .into_iter()
        .filter(|org| is_abandoned(org, cutoff))
        .map(|org| (org.id, org.code));

    let mut removed = 0;
    for (org_id, code) in stale {
        let mut tx = pool.begin().await?;

        // re-checked under the transaction: a payment may have landed meanwhile
        let deleted = sqlx::query("DELETE FROM organizations WHERE id = ? AND status = 'pending_payment'")
            .bind(org_id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            continue;
        }

        sqlx::query("DELETE FROM refresh_tokens WHERE user_id IN (SELECT id FROM users WHERE org_id = ?)")
            .bind(org_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM users WHERE org_id = ?")
            .bind(org_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM subscriptions WHERE org_id = ?")
            .bind(org_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await.with_context(|| format!("removing signup {org_id}"))?;
        registry.release(&code).await;
        info!(org_id, code = %code, "Abandoned signup removed");
        removed += 1;
    }

    Ok(removed)
}

/// Paid subscriptions past their period end become `expired`; the
/// organization then falls back to free-plan limits.
pub async fn expire_subscriptions(pool: &MySqlPool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE subscriptions s
        JOIN plans p ON p.id = s.plan_id
        SET s.status = 'expired'
        WHERE s.status = 'active' AND p.price_cents > 0 AND s.current_period_end < NOW()
        "#,
    )
    .execute(pool)
    .await
    .context("expiring subscriptions")?;
    Ok(result.rows_affected())
}

async fn purge_refresh_tokens(pool: &MySqlPool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < NOW()")
        .execute(pool)
        .await
        .context("purging refresh tokens")?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::mysql::MySqlPoolOptions;

    const DAY: Duration = Duration::from_secs(86_400);

    fn org(status: OrgStatus, age: chrono::Duration, now: DateTime<Utc>) -> Organization {
        Organization {
            id: 4,
            code: "acme".into(),
            name: "Acme".into(),
            email: "owner@acme.test".into(),
            address: None,
            status: status.as_ref().to_string(),
            created_at: now - age,
        }
    }

    #[test]
    fn cutoff_is_ttl_before_now() {
        let now = Utc::now();
        assert_eq!(pending_cutoff(now, DAY), now - chrono::Duration::days(1));
        assert_eq!(pending_cutoff(now, Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn stale_pending_signup_is_selected() {
        let now = Utc::now();
        let cutoff = pending_cutoff(now, DAY);
        assert!(is_abandoned(&org(OrgStatus::PendingPayment, chrono::Duration::hours(25), now), cutoff));
    }

    #[test]
    fn fresh_pending_signup_is_kept() {
        let now = Utc::now();
        let cutoff = pending_cutoff(now, DAY);
        assert!(!is_abandoned(&org(OrgStatus::PendingPayment, chrono::Duration::hours(23), now), cutoff));
    }

    #[test]
    fn paid_or_suspended_orgs_are_never_removed() {
        let now = Utc::now();
        let cutoff = pending_cutoff(now, DAY);
        let old = chrono::Duration::days(30);
        assert!(!is_abandoned(&org(OrgStatus::Active, old, now), cutoff));
        assert!(!is_abandoned(&org(OrgStatus::Suspended, old, now), cutoff));
    }

    #[actix_web::test]
    async fn released_code_becomes_available_again() {
        // never connected: a database lookup would report the code as taken
        let pool = MySqlPoolOptions::new()
            .connect_lazy("mysql://localhost/platform")
            .unwrap();
        let registry = OrgCodeRegistry::new();
        registry.warmup_done();
        registry.mark_taken("acme").await;
        assert!(!registry.is_available("acme", &pool).await);

        registry.release("acme").await;
        assert!(registry.is_available("acme", &pool).await);
    }
}
