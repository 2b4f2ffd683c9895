use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

use crate::schemes::PaymentScheme;

/// How long a derived scheme stays valid per plan id.
pub const SCHEME_CACHE_TTL: Duration = Duration::from_secs(300);

/// Read access to plan metadata, needed when no explicit scheme hint is
/// available.
#[async_trait]
pub trait PlanRegistry: Send + Sync {
    async fn get_plan(&self, plan_id: &str) -> Result<Value, PlanRegistryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PlanRegistryError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Copy)]
struct SchemeCacheEntry {
    scheme: PaymentScheme,
    cached_at: Instant,
}

/// In-memory plan-id to scheme cache with TTL semantics.
///
/// Colliding writes are last-writer-wins; concurrent resolutions of the same
/// plan derive equivalent values, so no further coordination is needed.
#[derive(Debug, Clone, Default)]
pub struct SchemeCache {
    entries: Arc<RwLock<HashMap<String, SchemeCacheEntry>>>,
}

impl SchemeCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a cached scheme. Expired entries are evicted and treated as
    /// missing.
    #[must_use]
    pub fn get(&self, plan_id: &str, now: Instant) -> Option<PaymentScheme> {
        {
            let lock = self.entries.read().ok()?;
            let entry = *lock.get(plan_id)?;
            if now.saturating_duration_since(entry.cached_at) < SCHEME_CACHE_TTL {
                return Some(entry.scheme);
            }
        }

        if let Ok(mut lock) = self.entries.write() {
            lock.remove(plan_id);
        }
        None
    }

    pub fn put(&self, plan_id: &str, scheme: PaymentScheme, now: Instant) {
        if let Ok(mut lock) = self.entries.write() {
            lock.insert(
                plan_id.to_string(),
                SchemeCacheEntry {
                    scheme,
                    cached_at: now,
                },
            );
        }
    }

    /// Drop every cached entry. Test isolation hook.
    pub fn clear(&self) {
        if let Ok(mut lock) = self.entries.write() {
            lock.clear();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |lock| lock.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resolves which payment scheme applies to a plan.
///
/// An explicit hint always wins with zero lookups. Otherwise plan metadata
/// is fetched through the registry (cached per plan id): a fiat-priced plan
/// resolves to card delegation, everything else to erc4337. Resolution never
/// fails; lookup errors fall back to the default scheme without caching.
pub struct SchemeResolver {
    registry: Arc<dyn PlanRegistry>,
    cache: SchemeCache,
}

impl SchemeResolver {
    #[must_use]
    pub fn new(registry: Arc<dyn PlanRegistry>) -> Self {
        Self::with_cache(registry, SchemeCache::new())
    }

    #[must_use]
    pub fn with_cache(registry: Arc<dyn PlanRegistry>, cache: SchemeCache) -> Self {
        Self { registry, cache }
    }

    pub async fn resolve(
        &self,
        plan_id: &str,
        explicit_scheme: Option<PaymentScheme>,
    ) -> PaymentScheme {
        if let Some(scheme) = explicit_scheme {
            return scheme;
        }

        if let Some(scheme) = self.cache.get(plan_id, Instant::now()) {
            return scheme;
        }

        match self.registry.get_plan(plan_id).await {
            Ok(plan) => {
                let scheme = scheme_from_plan(&plan);
                self.cache.put(plan_id, scheme, Instant::now());
                scheme
            }
            Err(error) => {
                tracing::debug!(
                    reason = %error,
                    plan_id,
                    "plan metadata fetch failed, defaulting scheme"
                );
                PaymentScheme::default()
            }
        }
    }

    /// Test isolation hook mirroring [`SchemeCache::clear`].
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

fn scheme_from_plan(plan: &Value) -> PaymentScheme {
    match plan
        .pointer("/registry/price/isCrypto")
        .and_then(Value::as_bool)
    {
        Some(false) => PaymentScheme::CardDelegation,
        _ => PaymentScheme::Erc4337,
    }
}
