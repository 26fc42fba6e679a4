//! Org code availability lookups.
//!
//! A cuckoo filter answers "definitely free" without touching the
//! database, a moka cache answers "recently seen as taken", and the
//! platform database settles everything else. Until the warm-up has
//! loaded every existing code, the filter's negatives are not trusted.

use anyhow::{Result, anyhow};
use autoscale_cuckoo_filter::CuckooFilter;
use futures_util::StreamExt;
use moka::future::Cache;
use sqlx::MySqlPool;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// Expected capacity and false-positive rate of the filter.
const FILTER_CAPACITY: usize = 100_000;
const FALSE_POSITIVE_RATE: f64 = 0.001;

const CACHE_CAPACITY: u64 = 200_000;
const CACHE_TTL: Duration = Duration::from_secs(86_400);

pub struct OrgCodeRegistry {
    filter: RwLock<CuckooFilter<String>>,
    taken: Cache<String, ()>,
    warm: AtomicBool,
}

impl Default for OrgCodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl OrgCodeRegistry {
    pub fn new() -> Self {
        Self {
            filter: RwLock::new(CuckooFilter::new(FILTER_CAPACITY, FALSE_POSITIVE_RATE)),
            taken: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
            warm: AtomicBool::new(false),
        }
    }

    /// False positives possible, false negatives not.
    pub fn might_exist(&self, code: &str) -> bool {
        match self.filter.read() {
            Ok(filter) => filter.contains(&code.to_string()),
            // a poisoned lock must not report codes as free
            Err(_) => true,
        }
    }

    pub async fn mark_taken(&self, code: &str) {
        if let Ok(mut filter) = self.filter.write() {
            filter.add(&code.to_string());
        }
        self.taken.insert(code.to_string(), ()).await;
    }

    /// Forget a code after its organization was deleted.
    pub async fn release(&self, code: &str) {
        if let Ok(mut filter) = self.filter.write() {
            filter.remove(&code.to_string());
        }
        self.taken.invalidate(code).await;
    }

    pub fn is_warm(&self) -> bool {
        self.warm.load(Ordering::Acquire)
    }

    /// Called once every existing code is in the filter.
    pub fn warmup_done(&self) {
        self.warm.store(true, Ordering::Release);
    }

    pub async fn is_cached_taken(&self, code: &str) -> bool {
        self.taken.contains_key(code)
    }

    /// `code` must already be normalized. Database errors report the code as taken.
    pub async fn is_available(&self, code: &str, pool: &MySqlPool) -> bool {
        // 1. filter: fast negative, once warm
        if self.is_warm() && !self.might_exist(code) {
            return true;
        }

        // 2. cache: fast positive
        if self.is_cached_taken(code).await {
            return false;
        }

        // 3. database fallback
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM organizations WHERE code = ? LIMIT 1)",
        )
        .bind(code)
        .fetch_one(pool)
        .await
        .unwrap_or_else(|e| {
            warn!(error = %e, code, "Org code lookup failed");
            true
        });

        if exists {
            self.taken.insert(code.to_string(), ()).await;
        }

        !exists
    }

    /// Streams every existing org code into the filter in batches.
    pub async fn warmup(&self, pool: &MySqlPool, batch_size: usize) -> Result<()> {
        let mut stream = sqlx::query_as::<_, (String,)>("SELECT code FROM organizations").fetch(pool);

        let mut batch = Vec::with_capacity(batch_size);
        let mut total = 0usize;

        while let Some(row) = stream.next().await {
            let (code,) = row.map_err(|e| anyhow!("DB row fetch failed: {}", e))?;
            batch.push(code.to_lowercase());
            total += 1;

            if batch.len() == batch_size {
                self.insert_batch(&batch)?;
                batch.clear();
            }
        }

        if !batch.is_empty() {
            self.insert_batch(&batch)?;
        }

        self.warmup_done();
        info!(total, "Org code filter warmup complete");
        Ok(())
    }

    fn insert_batch(&self, codes: &[String]) -> Result<()> {
        let mut filter = self
            .filter
            .write()
            .map_err(|_| anyhow!("org code filter lock poisoned"))?;

        for code in codes {
            filter.add(code);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_pool() -> MySqlPool {
        sqlx::mysql::MySqlPoolOptions::new()
            .acquire_timeout(Duration::from_millis(500))
            .connect_lazy("mysql://127.0.0.1:1/platform")
            .unwrap()
    }

    #[actix_web::test]
    async fn cold_registry_asks_the_database() {
        let registry = OrgCodeRegistry::new();
        assert!(!registry.is_warm());
        // the filter is empty, but without warm-up only the database may say "free";
        // an unreachable database reports the code as taken
        assert!(!registry.is_available("acme", &unreachable_pool()).await);
    }

    #[actix_web::test]
    async fn warm_registry_trusts_filter_negatives() {
        let registry = OrgCodeRegistry::new();
        registry.warmup_done();
        assert!(registry.is_available("acme", &unreachable_pool()).await);
    }

    #[actix_web::test]
    async fn unseen_codes_are_reported_free_by_the_filter() {
        let registry = OrgCodeRegistry::new();
        assert!(!registry.might_exist("acme"));
    }

    #[actix_web::test]
    async fn marked_codes_hit_filter_and_cache() {
        let registry = OrgCodeRegistry::new();
        registry.mark_taken("acme").await;
        assert!(registry.might_exist("acme"));
        assert!(registry.is_cached_taken("acme").await);
    }

    #[actix_web::test]
    async fn released_codes_leave_the_cache() {
        let registry = OrgCodeRegistry::new();
        registry.mark_taken("acme").await;
        registry.release("acme").await;
        assert!(!registry.is_cached_taken("acme").await);
        assert!(!registry.might_exist("acme"));
    }
}
