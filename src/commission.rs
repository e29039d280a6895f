use std::sync::Mutex;
use std::time::{Duration, Instant};

use metrics::counter;
use serde::{Deserialize, Serialize};

use crate::context::LedgerContext;
use crate::error::{LedgerError, RateTarget};

/// A commission rate, validated to lie within `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct CommissionRate(f64);

impl CommissionRate {
    pub fn new(rate: f64, target: RateTarget) -> Result<Self, LedgerError> {
        if !(0.0..=1.0).contains(&rate) {
            return Err(LedgerError::InvalidRate { target, rate });
        }
        Ok(Self(rate))
    }

    pub fn value(&self) -> f64 {
        self.0
    }

    /// Split a gross amount into the platform's cut and the store's share.
    /// The commission is rounded to the nearest minor unit.
    pub fn split(&self, amount: u64) -> CommissionSplit {
        let commission = ((amount as f64) * self.0).round() as u64;
        CommissionSplit::from_commission(amount, commission.min(amount))
    }
}

/// The two halves of a gross amount. Always sums back to the amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionSplit {
    pub commission: u64,
    pub store_amount: u64,
}

impl CommissionSplit {
    /// Split with an absolute fee. Callers guarantee `commission <= amount`.
    pub fn from_commission(amount: u64, commission: u64) -> Self {
        Self {
            commission,
            store_amount: amount - commission,
        }
    }
}

struct CachedRate {
    rate: CommissionRate,
    fetched_at: Instant,
}

/// Resolves the commission rate for new ledger entries.
///
/// Store overrides always win and are read straight from storage. The global
/// rate is cached in-process for `ttl`; writing it through this resolver
/// invalidates the cache, so the next read observes the new value. Other
/// processes may see the old global rate for up to `ttl`.
pub struct CommissionResolver {
    ctx: LedgerContext,
    default_rate: CommissionRate,
    ttl: Duration,
    cache: Mutex<Option<CachedRate>>,
}

impl CommissionResolver {
    pub fn new(ctx: LedgerContext, default_rate: CommissionRate, ttl: Duration) -> Self {
        Self {
            ctx,
            default_rate,
            ttl,
            cache: Mutex::new(None),
        }
    }

    pub async fn resolve_rate(&self, store_id: Option<&str>) -> Result<CommissionRate, LedgerError> {
        if let Some(store_id) = store_id {
            if let Some(rate) = self.ctx.get_store_rate(store_id).await? {
                return CommissionRate::new(rate, RateTarget::Store(store_id.to_string()));
            }
        }

        if let Some(rate) = self.cached() {
            counter!("ledger.commission.cache", "result" => "hit").increment(1);
            tracing::debug!(rate = rate.value(), "commission cache hit");
            return Ok(rate);
        }
        counter!("ledger.commission.cache", "result" => "miss").increment(1);

        let rate = match self.ctx.get_global_rate().await? {
            Some(rate) => CommissionRate::new(rate, RateTarget::Global)?,
            None => {
                tracing::info!(
                    rate = self.default_rate.value(),
                    "no global commission rate stored, seeding default"
                );
                self.ctx.set_global_rate(self.default_rate.value()).await?;
                self.default_rate
            }
        };

        *self.lock_cache() = Some(CachedRate {
            rate,
            fetched_at: Instant::now(),
        });
        Ok(rate)
    }

    pub async fn set_global_rate(&self, rate: f64) -> Result<(), LedgerError> {
        let rate = CommissionRate::new(rate, RateTarget::Global)?;
        self.ctx.set_global_rate(rate.value()).await?;
        self.invalidate();
        tracing::info!(rate = rate.value(), "global commission rate updated");
        Ok(())
    }

    pub async fn set_store_rate(&self, store_id: &str, rate: f64) -> Result<(), LedgerError> {
        let rate = CommissionRate::new(rate, RateTarget::Store(store_id.to_string()))?;
        self.ctx.set_store_rate(store_id, Some(rate.value())).await?;
        tracing::info!(store_id, rate = rate.value(), "store commission override set");
        Ok(())
    }

    /// Remove a store override; the store falls back to the global rate.
    pub async fn clear_store_rate(&self, store_id: &str) -> Result<(), LedgerError> {
        self.ctx.set_store_rate(store_id, None).await?;
        tracing::info!(store_id, "store commission override cleared");
        Ok(())
    }

    pub fn invalidate(&self) {
        *self.lock_cache() = None;
    }

    fn cached(&self) -> Option<CommissionRate> {
        let cache = self.lock_cache();
        cache
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() < self.ttl)
            .map(|c| c.rate)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, Option<CachedRate>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryAdapter;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn resolver(ttl: Duration) -> (CommissionResolver, LedgerContext) {
        let ctx = LedgerContext::new(Arc::new(MemoryAdapter::new()), Duration::from_secs(1));
        let default = CommissionRate::new(0.01, RateTarget::Global).unwrap();
        (CommissionResolver::new(ctx.clone(), default, ttl), ctx)
    }

    #[test]
    fn test_rate_bounds() {
        assert!(CommissionRate::new(0.0, RateTarget::Global).is_ok());
        assert!(CommissionRate::new(1.0, RateTarget::Global).is_ok());
        assert!(matches!(
            CommissionRate::new(1.01, RateTarget::Global),
            Err(LedgerError::InvalidRate { .. })
        ));
        assert!(matches!(
            CommissionRate::new(-0.1, RateTarget::Store("S1".into())),
            Err(LedgerError::InvalidRate { .. })
        ));
        assert!(CommissionRate::new(f64::NAN, RateTarget::Global).is_err());
    }

    #[test]
    fn test_split_rounds_to_minor_unit() {
        let rate = CommissionRate::new(0.10, RateTarget::Global).unwrap();
        let split = rate.split(100_000);
        assert_eq!(split.commission, 10_000);
        assert_eq!(split.store_amount, 90_000);

        // 0.035 * 1234 = 43.19 -> 43
        let rate = CommissionRate::new(0.035, RateTarget::Global).unwrap();
        assert_eq!(rate.split(1234).commission, 43);
    }

    proptest! {
        #[test]
        fn split_always_sums_to_amount(amount in 1u64..10_000_000_000, rate in 0.0f64..=1.0) {
            let rate = CommissionRate::new(rate, RateTarget::Global).unwrap();
            let split = rate.split(amount);
            prop_assert_eq!(split.commission + split.store_amount, amount);
            prop_assert!(split.commission <= amount);
        }
    }

    #[tokio::test]
    async fn test_seeds_default_when_unset() {
        let (resolver, ctx) = resolver(Duration::from_secs(300));
        let rate = resolver.resolve_rate(None).await.unwrap();
        assert_eq!(rate.value(), 0.01);
        assert_eq!(ctx.get_global_rate().await.unwrap(), Some(0.01));
    }

    #[tokio::test]
    async fn test_store_override_wins() {
        let (resolver, _ctx) = resolver(Duration::from_secs(300));
        resolver.set_global_rate(0.05).await.unwrap();
        resolver.set_store_rate("S1", 0.02).await.unwrap();

        assert_eq!(resolver.resolve_rate(Some("S1")).await.unwrap().value(), 0.02);
        assert_eq!(resolver.resolve_rate(Some("S2")).await.unwrap().value(), 0.05);

        resolver.clear_store_rate("S1").await.unwrap();
        assert_eq!(resolver.resolve_rate(Some("S1")).await.unwrap().value(), 0.05);
    }

    #[tokio::test]
    async fn test_global_write_invalidates_cache() {
        let (resolver, _ctx) = resolver(Duration::from_secs(300));
        resolver.set_global_rate(0.05).await.unwrap();
        assert_eq!(resolver.resolve_rate(None).await.unwrap().value(), 0.05);

        resolver.set_global_rate(0.07).await.unwrap();
        assert_eq!(resolver.resolve_rate(None).await.unwrap().value(), 0.07);
    }

    #[tokio::test]
    async fn test_cache_serves_stale_within_ttl() {
        let (resolver, ctx) = resolver(Duration::from_secs(300));
        resolver.set_global_rate(0.05).await.unwrap();
        resolver.resolve_rate(None).await.unwrap();

        // Written by another process, bypassing this resolver
        ctx.set_global_rate(0.09).await.unwrap();
        assert_eq!(resolver.resolve_rate(None).await.unwrap().value(), 0.05);

        resolver.invalidate();
        assert_eq!(resolver.resolve_rate(None).await.unwrap().value(), 0.09);
    }

    #[tokio::test]
    async fn test_expired_cache_refetches() {
        let (resolver, ctx) = resolver(Duration::ZERO);
        resolver.set_global_rate(0.05).await.unwrap();
        resolver.resolve_rate(None).await.unwrap();

        ctx.set_global_rate(0.09).await.unwrap();
        assert_eq!(resolver.resolve_rate(None).await.unwrap().value(), 0.09);
    }

    #[tokio::test]
    async fn test_invalid_rates_are_not_persisted() {
        let (resolver, ctx) = resolver(Duration::from_secs(300));
        assert!(matches!(
            resolver.set_global_rate(1.5).await,
            Err(LedgerError::InvalidRate { target: RateTarget::Global, .. })
        ));
        assert!(resolver.set_store_rate("S1", -0.5).await.is_err());
        assert_eq!(ctx.get_global_rate().await.unwrap(), None);
        assert_eq!(ctx.get_store_rate("S1").await.unwrap(), None);
    }
}
