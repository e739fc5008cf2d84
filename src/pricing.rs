use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::error::CoreResult;
use crate::model::usage::{self, UsageDetails};

/// An immutable per-model price table captured at ingest time, in USD per
/// million units, keyed by usage type (`input`, `output`, ...).
#[derive(Debug, Clone)]
pub struct PricingSnapshot {
    pub snapshot_time: DateTime<Utc>,
    pub prices_per_million: BTreeMap<String, Decimal>,
}

/// `cost_details`, keyed the same way as `usage_details` plus `total`.
pub type CostDetails = BTreeMap<String, Decimal>;

/// External collaborator: obtains pricing snapshots for a model at a point
/// in time. A real implementation talks to a pricing service; this crate
/// only ships an in-memory time-travel provider for tests and demos.
#[async_trait]
pub trait PricingProvider: Send + Sync {
    async fn get_snapshot(
        &self,
        project_id: Option<&str>,
        model_name: &str,
        at: DateTime<Utc>,
    ) -> CoreResult<PricingSnapshot>;
}

/// For each usage key with price `p` (USD per million units),
/// `cost = usage[k] * p / 1_000_000` as a 9-fractional-digit decimal.
/// `total_cost = cost_details["total"]`, the sum over all non-cache keys —
/// cache sub-tokens still get a priced `cost_details` entry, they're just
/// not folded into `total` (mirrors `usage::recompute_total`).
pub fn calculate_cost(usage: &UsageDetails, snapshot: &PricingSnapshot) -> (CostDetails, Decimal) {
    let million = dec!(1_000_000);
    let mut cost_details = CostDetails::new();
    let mut total = Decimal::ZERO;

    for (key, &amount) in usage {
        if key == "total" {
            continue;
        }
        if let Some(price) = snapshot.prices_per_million.get(key) {
            let cost = (Decimal::from(amount) * price / million).round_dp(9);
            if key != usage::keys::CACHE_READ_INPUT_TOKENS
                && key != usage::keys::CACHE_CREATION_INPUT_TOKENS
            {
                total += cost;
            }
            cost_details.insert(key.clone(), cost);
        }
    }
    total = total.round_dp(9);
    cost_details.insert("total".to_string(), total);
    (cost_details, total)
}

/// Render `pricing_snapshot` as `{key}_price_per_million` entries, the form
/// stored alongside the span for auditability.
pub fn snapshot_as_span_fields(snapshot: &PricingSnapshot) -> BTreeMap<String, Decimal> {
    snapshot
        .prices_per_million
        .iter()
        .map(|(k, v)| (format!("{k}_price_per_million"), *v))
        .collect()
}

/// Time-travel pricing provider: binary-searches a sorted
/// `(effective_from, snapshot)` table per model name. The sole concrete
/// provider this crate ships; a real pricing service is an external
/// collaborator out of scope here.
#[derive(Debug, Default)]
pub struct InMemoryPricingProvider {
    by_model: BTreeMap<String, Vec<(DateTime<Utc>, PricingSnapshot)>>,
}

impl InMemoryPricingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a snapshot effective from `effective_from` onward for
    /// `model_name`. Entries are kept sorted by time per model.
    pub fn register(&mut self, model_name: impl Into<String>, effective_from: DateTime<Utc>, snapshot: PricingSnapshot) {
        let entries = self.by_model.entry(model_name.into()).or_default();
        let pos = entries.partition_point(|(t, _)| *t <= effective_from);
        entries.insert(pos, (effective_from, snapshot));
    }
}

#[async_trait]
impl PricingProvider for InMemoryPricingProvider {
    async fn get_snapshot(
        &self,
        _project_id: Option<&str>,
        model_name: &str,
        at: DateTime<Utc>,
    ) -> CoreResult<PricingSnapshot> {
        let entries = self.by_model.get(model_name).ok_or_else(|| {
            crate::error::CoreError::NotFound(format!("no pricing for model {model_name}"))
        })?;
        let pos = entries.partition_point(|(t, _)| *t <= at);
        entries
            .get(pos.saturating_sub(1))
            .filter(|_| pos > 0)
            .map(|(_, snap)| snap.clone())
            .ok_or_else(|| {
                crate::error::CoreError::NotFound(format!(
                    "no pricing effective at or before {at} for model {model_name}"
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(pairs: &[(&str, u64)]) -> UsageDetails {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn snapshot(pairs: &[(&str, Decimal)]) -> PricingSnapshot {
        PricingSnapshot {
            snapshot_time: Utc::now(),
            prices_per_million: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    #[test]
    fn seed_scenario_cost_calc() {
        let usage = usage(&[("input", 1000), ("output", 500)]);
        let snap = snapshot(&[("input", dec!(3.00)), ("output", dec!(15.00))]);
        let (costs, total) = calculate_cost(&usage, &snap);
        assert_eq!(costs["input"], dec!(0.003000000));
        assert_eq!(costs["output"], dec!(0.007500000));
        assert_eq!(costs["total"], dec!(0.010500000));
        assert_eq!(total, dec!(0.010500000));
    }

    #[test]
    fn total_cost_equals_sum_of_parts() {
        let usage = usage(&[("input", 42), ("output", 7), ("reasoning_tokens", 3)]);
        let snap = snapshot(&[
            ("input", dec!(1.50)),
            ("output", dec!(2.50)),
            ("reasoning_tokens", dec!(5.00)),
        ]);
        let (costs, total) = calculate_cost(&usage, &snap);
        let sum: Decimal = costs
            .iter()
            .filter(|(k, _)| *k != "total")
            .map(|(_, v)| *v)
            .sum();
        assert_eq!(sum.round_dp(9), total);
    }

    #[test]
    fn priced_cache_tokens_get_a_cost_entry_but_are_excluded_from_total() {
        let usage = usage(&[
            ("input", 1000),
            ("output", 500),
            (usage::keys::CACHE_READ_INPUT_TOKENS, 2000),
        ]);
        let snap = snapshot(&[
            ("input", dec!(3.00)),
            ("output", dec!(15.00)),
            (usage::keys::CACHE_READ_INPUT_TOKENS, dec!(0.30)),
        ]);
        let (costs, total) = calculate_cost(&usage, &snap);
        assert_eq!(costs[usage::keys::CACHE_READ_INPUT_TOKENS], dec!(0.000600000));
        assert_eq!(total, dec!(0.010500000));
        assert_eq!(costs["total"], total);
    }

    #[test]
    fn missing_price_is_skipped_not_zeroed() {
        let usage = usage(&[("input", 100), ("unknown_key", 999)]);
        let snap = snapshot(&[("input", dec!(1.00))]);
        let (costs, _) = calculate_cost(&usage, &snap);
        assert!(!costs.contains_key("unknown_key"));
    }

    #[tokio::test]
    async fn in_memory_provider_picks_latest_snapshot_before_at() {
        let mut provider = InMemoryPricingProvider::new();
        let t0 = Utc::now() - chrono::Duration::days(2);
        let t1 = Utc::now() - chrono::Duration::days(1);
        provider.register("gpt", t0, snapshot(&[("input", dec!(1.00))]));
        provider.register("gpt", t1, snapshot(&[("input", dec!(2.00))]));

        let at = Utc::now();
        let found = provider.get_snapshot(None, "gpt", at).await.unwrap();
        assert_eq!(found.prices_per_million["input"], dec!(2.00));
    }

    #[tokio::test]
    async fn in_memory_provider_errors_on_unknown_model() {
        let provider = InMemoryPricingProvider::new();
        let err = provider.get_snapshot(None, "nope", Utc::now()).await;
        assert!(err.is_err());
    }
}
