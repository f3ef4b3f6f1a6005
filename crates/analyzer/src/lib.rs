//! External analyzer boundary.
//!
//! The pipeline only ever sees the [`ExternalAnalyzer`] capability: a single
//! call returning an optional second-opinion signal. Adapters swallow every
//! failure — timeout, transport, malformed response — and return `None`; the
//! pipeline must behave identically with an analyzer that never answers.

pub mod rate_limit;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use coalesce_types::{AiSignal, EntityType, Record};

pub use rate_limit::RateLimiter;

/// Default per-call timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Stateless second-opinion capability. Implementations must be cheap to
/// share across workers.
#[async_trait]
pub trait ExternalAnalyzer: Send + Sync {
    /// Analyze a candidate pair. `None` on any failure or when no opinion
    /// is available; never an error.
    async fn analyze(&self, a: &Record, b: &Record, entity_type: EntityType) -> Option<AiSignal>;
}

/// Default analyzer: never has an opinion.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAnalyzer;

#[async_trait]
impl ExternalAnalyzer for NoopAnalyzer {
    async fn analyze(&self, _a: &Record, _b: &Record, _entity_type: EntityType) -> Option<AiSignal> {
        None
    }
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    entity_a: &'a serde_json::Value,
    entity_b: &'a serde_json::Value,
    entity_type: &'a str,
}

/// HTTP adapter posting candidate pairs to a remote analyzer service.
///
/// Calls are rate limited through a process-wide token bucket and bounded by
/// a per-call timeout; both degrade to `None`, never an error.
pub struct HttpAnalyzer {
    client: reqwest::Client,
    endpoint: String,
    limiter: RateLimiter,
    timeout: Duration,
}

impl HttpAnalyzer {
    pub fn new(endpoint: impl Into<String>, max_rate_per_minute: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            limiter: RateLimiter::per_minute(max_rate_per_minute),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn call(&self, a: &Record, b: &Record, entity_type: EntityType) -> Option<AiSignal> {
        let request = AnalyzeRequest {
            entity_a: &a.to_value(),
            entity_b: &b.to_value(),
            entity_type: entity_type.slug(),
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?;
        let signal: AiSignal = response.json().await.ok()?;
        if !(0.0..=100.0).contains(&signal.confidence) {
            tracing::warn!(confidence = signal.confidence, "analyzer returned out-of-range confidence");
            return None;
        }
        Some(signal)
    }
}

#[async_trait]
impl ExternalAnalyzer for HttpAnalyzer {
    async fn analyze(&self, a: &Record, b: &Record, entity_type: EntityType) -> Option<AiSignal> {
        self.limiter.acquire().await;
        match tokio::time::timeout(self.timeout, self.call(a, b, entity_type)).await {
            Ok(signal) => signal,
            Err(_) => {
                tracing::warn!(endpoint = %self.endpoint, "analyzer call timed out");
                None
            }
        }
    }
}
