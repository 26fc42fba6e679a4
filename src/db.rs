use crate::config::Config;
use actix_web::rt::time::{sleep, timeout};
use anyhow::{Context, Result, anyhow};
use derive_more::Deref;
use sqlx::MySqlPool;
use sqlx::mysql::MySqlPoolOptions;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Cross-tenant database: organizations, users, billing, audit and demo requests.
#[derive(Clone, Deref)]
pub struct PlatformDb(pub MySqlPool);

/// Tenant-scoped database: every row carries an `org_id`.
#[derive(Clone, Deref)]
pub struct TenantDb(pub MySqlPool);

const PLATFORM_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS organizations (
        id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
        code VARCHAR(32) NOT NULL UNIQUE,
        name VARCHAR(150) NOT NULL,
        email VARCHAR(190) NOT NULL,
        address VARCHAR(255) NULL,
        status VARCHAR(20) NOT NULL DEFAULT 'pending_payment',
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        INDEX idx_org_status_created (status, created_at)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
        org_id BIGINT UNSIGNED NULL,
        email VARCHAR(190) NOT NULL UNIQUE,
        password_hash VARCHAR(255) NULL,
        role_id TINYINT UNSIGNED NOT NULL,
        employee_id BIGINT UNSIGNED NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        totp_secret VARCHAR(64) NULL,
        totp_enabled BOOLEAN NOT NULL DEFAULT FALSE,
        google_subject VARCHAR(64) NULL,
        last_login_at TIMESTAMP NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        INDEX idx_users_org (org_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS refresh_tokens (
        id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
        user_id BIGINT UNSIGNED NOT NULL,
        jti VARCHAR(64) NOT NULL UNIQUE,
        expires_at TIMESTAMP NOT NULL,
        revoked BOOLEAN NOT NULL DEFAULT FALSE,
        INDEX idx_refresh_user (user_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS plans (
        id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
        code VARCHAR(32) NOT NULL UNIQUE,
        name VARCHAR(100) NOT NULL,
        price_cents BIGINT NOT NULL,
        currency VARCHAR(3) NOT NULL DEFAULT 'PHP',
        max_employees INT UNSIGNED NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS subscriptions (
        id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
        org_id BIGINT UNSIGNED NOT NULL,
        plan_id BIGINT UNSIGNED NOT NULL,
        status VARCHAR(20) NOT NULL DEFAULT 'pending',
        checkout_session_id VARCHAR(100) NULL,
        current_period_start TIMESTAMP NULL,
        current_period_end TIMESTAMP NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        -- NULL unless the row is active / pending; unique keys ignore NULLs
        active_org_id BIGINT UNSIGNED AS (IF(status = 'active', org_id, NULL)) STORED,
        pending_org_id BIGINT UNSIGNED AS (IF(status = 'pending', org_id, NULL)) STORED,
        INDEX idx_sub_org (org_id),
        INDEX idx_sub_checkout (checkout_session_id),
        UNIQUE KEY uq_sub_one_active (active_org_id),
        UNIQUE KEY uq_sub_one_pending (pending_org_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_logs (
        id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
        org_id BIGINT UNSIGNED NULL,
        user_id BIGINT UNSIGNED NULL,
        action VARCHAR(50) NOT NULL,
        entity VARCHAR(50) NOT NULL,
        entity_id BIGINT UNSIGNED NULL,
        details TEXT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        INDEX idx_audit_org_created (org_id, created_at)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS demo_requests (
        id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
        full_name VARCHAR(150) NOT NULL,
        email VARCHAR(190) NOT NULL,
        company VARCHAR(150) NOT NULL,
        phone VARCHAR(40) NULL,
        employee_count INT UNSIGNED NULL,
        message TEXT NULL,
        status VARCHAR(20) NOT NULL DEFAULT 'new',
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    r#"
    INSERT IGNORE INTO plans (code, name, price_cents, currency, max_employees) VALUES
        ('free', 'Free', 0, 'PHP', 10),
        ('starter', 'Starter', 99900, 'PHP', 50),
        ('pro', 'Pro', 249900, 'PHP', 500)
    "#,
];

const TENANT_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS departments (
        id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
        org_id BIGINT UNSIGNED NOT NULL,
        name VARCHAR(100) NOT NULL,
        name_key VARCHAR(100) NOT NULL,
        description VARCHAR(255) NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE KEY uq_department_org_name (org_id, name_key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS employees (
        id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
        org_id BIGINT UNSIGNED NOT NULL,
        department_id BIGINT UNSIGNED NULL,
        employee_code VARCHAR(40) NOT NULL,
        first_name VARCHAR(100) NOT NULL,
        last_name VARCHAR(100) NOT NULL,
        email VARCHAR(190) NOT NULL,
        phone VARCHAR(40) NULL,
        position VARCHAR(100) NULL,
        hire_date DATE NOT NULL,
        status VARCHAR(20) NOT NULL DEFAULT 'active',
        photo_url VARCHAR(500) NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE KEY uq_employee_org_code (org_id, employee_code),
        INDEX idx_employee_department (org_id, department_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS leave_requests (
        id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
        org_id BIGINT UNSIGNED NOT NULL,
        employee_id BIGINT UNSIGNED NOT NULL,
        leave_type VARCHAR(20) NOT NULL,
        start_date DATE NOT NULL,
        end_date DATE NOT NULL,
        reason VARCHAR(500) NULL,
        status VARCHAR(20) NOT NULL DEFAULT 'pending',
        reviewed_by BIGINT UNSIGNED NULL,
        reviewed_at TIMESTAMP NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        INDEX idx_leave_org_employee (org_id, employee_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS shift_schedules (
        id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
        org_id BIGINT UNSIGNED NOT NULL,
        name VARCHAR(100) NOT NULL,
        start_time TIME NOT NULL,
        end_time TIME NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE KEY uq_schedule_org_name (org_id, name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS shift_assignments (
        id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
        org_id BIGINT UNSIGNED NOT NULL,
        employee_id BIGINT UNSIGNED NOT NULL,
        schedule_id BIGINT UNSIGNED NOT NULL,
        work_date DATE NOT NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE KEY uq_assignment_employee_date (employee_id, work_date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS attendance (
        id BIGINT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
        org_id BIGINT UNSIGNED NOT NULL,
        employee_id BIGINT UNSIGNED NOT NULL,
        work_date DATE NOT NULL,
        check_in DATETIME NOT NULL,
        check_out DATETIME NULL,
        latitude DOUBLE NULL,
        longitude DOUBLE NULL,
        address VARCHAR(255) NULL,
        UNIQUE KEY uq_attendance_employee_date (employee_id, work_date),
        INDEX idx_attendance_org_date (org_id, work_date)
    )
    "#,
];

/// Runs `op` up to `attempts` times, each bounded by `limit`, sleeping
/// `delay` between failures.
pub async fn retry_with_timeout<T, F, Fut>(
    what: &str,
    attempts: u32,
    limit: Duration,
    delay: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut last_err = anyhow!("{what}: no attempt made");

    for attempt in 1..=attempts {
        match timeout(limit, op()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(e)) => {
                warn!(attempt, attempts, error = %e, "{what} failed");
                last_err = e;
            }
            Err(_) => {
                warn!(attempt, attempts, timeout_secs = limit.as_secs(), "{what} timed out");
                last_err = anyhow!("{what} timed out after {}s", limit.as_secs());
            }
        }

        if attempt < attempts {
            sleep(delay).await;
        }
    }

    Err(last_err.context(format!("{what} failed after {attempts} attempts")))
}

async fn apply_schema(pool: &MySqlPool, statements: &[&str]) -> Result<()> {
    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .context("migration statement failed")?;
    }
    Ok(())
}

async fn connect_and_migrate(config: &Config, url: &str, name: &str, schema: &[&str]) -> Result<MySqlPool> {
    let pool = retry_with_timeout(
        &format!("connect {name} database"),
        config.migrate_attempts,
        config.migrate_timeout,
        config.migrate_delay,
        move || async move {
            MySqlPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
                .map_err(anyhow::Error::from)
        },
    )
    .await?;

    let pool_ref = &pool;
    retry_with_timeout(
        &format!("migrate {name} database"),
        config.migrate_attempts,
        config.migrate_timeout,
        config.migrate_delay,
        move || apply_schema(pool_ref, schema),
    )
    .await?;

    info!(database = name, "Database ready");
    Ok(pool)
}

pub async fn init_db(config: &Config) -> Result<(PlatformDb, TenantDb)> {
    let platform = connect_and_migrate(
        config,
        &config.platform_database_url,
        "platform",
        PLATFORM_SCHEMA,
    )
    .await?;
    let tenant = connect_and_migrate(config, &config.tenant_database_url, "tenant", TENANT_SCHEMA).await?;

    Ok((PlatformDb(platform), TenantDb(tenant)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn subscriptions_allow_one_active_and_one_pending_per_org() {
        let ddl = PLATFORM_SCHEMA
            .iter()
            .find(|sql| sql.contains("CREATE TABLE IF NOT EXISTS subscriptions"))
            .unwrap();
        assert!(ddl.contains("UNIQUE KEY uq_sub_one_active (active_org_id)"));
        assert!(ddl.contains("UNIQUE KEY uq_sub_one_pending (pending_org_id)"));
        assert!(ddl.contains("IF(status = 'active', org_id, NULL)"));
    }

    #[actix_web::test]
    async fn retry_stops_on_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let value = retry_with_timeout("platform", 5, Duration::from_secs(1), Duration::ZERO, || {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(anyhow!("not yet")) } else { Ok(n) }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[actix_web::test]
    async fn retry_gives_up_after_bounded_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = retry_with_timeout("platform", 3, Duration::from_secs(1), Duration::ZERO, || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(anyhow!("down"))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[actix_web::test]
    async fn slow_attempts_count_as_timeouts() {
        let result: Result<()> = retry_with_timeout(
            "probe",
            2,
            Duration::from_millis(10),
            Duration::ZERO,
            || async {
                sleep(Duration::from_millis(200)).await;
                Ok(())
            },
        )
        .await;

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("timed out"));
    }
}
