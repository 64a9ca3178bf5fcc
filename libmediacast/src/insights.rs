//! Post-publish metrics
//!
//! Fetches a platform's raw insights for a published post and normalizes
//! them into [`MetricSet`]. Metrics the platform does not report stay
//! `None`; they are never filled in as zero.

use std::sync::Arc;

use tracing::debug;

use crate::clock::Clock;
use crate::credentials::TokenManager;
use crate::error::{MediacastError, Result};
use crate::platforms::PlatformRegistry;
use crate::store::AccountStore;
use crate::types::{InsightSnapshot, InsightsRequest, Metric, MetricSet, PlatformMetrics};

#[derive(Clone)]
pub struct InsightsAggregator {
    accounts: Arc<dyn AccountStore>,
    tokens: Arc<TokenManager>,
    registry: Arc<PlatformRegistry>,
    clock: Arc<dyn Clock>,
}

impl InsightsAggregator {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        tokens: Arc<TokenManager>,
        registry: Arc<PlatformRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            accounts,
            tokens,
            registry,
            clock,
        }
    }

    /// Current metrics for `post_id`, normalized.
    ///
    /// # Errors
    ///
    /// - `MediacastError::NotFound` if the account does not exist
    /// - `MediacastError::Token` if no valid token can be obtained
    /// - `MediacastError::Platform` if the platform refused the request
    pub async fn get_insights(&self, account_id: &str, post_id: &str) -> Result<InsightSnapshot> {
        let account = self
            .accounts
            .get_account(account_id)
            .await?
            .ok_or_else(|| MediacastError::NotFound(format!("Account {}", account_id)))?;
        let client = self.registry.get(account.kind)?;
        let credential = self.tokens.get_valid_token(&account).await?;

        let raw = client.fetch_insights(&credential, post_id).await?;
        let metrics = normalize(&raw, client.metric_aliases());

        Ok(InsightSnapshot {
            post_id: post_id.to_string(),
            metrics,
            fetched_at: self.clock.now(),
        })
    }

    pub async fn fetch(&self, request: &InsightsRequest) -> Result<InsightSnapshot> {
        self.get_insights(&request.account_id, &request.post_id).await
    }
}

/// Map native metric names onto the shared vocabulary.
///
/// When several native names map to the same metric, the one listed first
/// in `aliases` wins.
pub fn normalize(raw: &PlatformMetrics, aliases: &[(&str, Metric)]) -> MetricSet {
    let mut metrics = MetricSet::default();

    for (native, metric) in aliases {
        if metrics.get(*metric).is_some() {
            continue;
        }
        if let Some(value) = raw.values.get(*native) {
            metrics.set(*metric, *value);
        }
    }

    for name in raw.values.keys() {
        if !aliases.iter().any(|(native, _)| *native == name.as_str()) {
            debug!("Ignoring unmapped metric '{}' for {}", name, raw.post_id);
        }
    }

    metrics
}
