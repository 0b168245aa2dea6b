//! Service adapter contract.
//!
//! An [`Adapter`] describes one external service's rows declaratively:
//! the remote-key column, the denormalized columns, where timestamps
//! live, how to split a webhook payload into resource and event, and
//! how to page through the service's API for backfills. The engine
//! ([`crate::replicator::Replicator`]) drives everything else.
//!
//! Adapters are configuration plus a handful of strategy methods; the
//! defaults cover the common case so most implementations override only
//! `resource_and_event` and `fetch_backfill_page`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use tributary_core::column::Column;
use tributary_core::integration::ServiceIntegration;
use tributary_core::partition::Partitioning;
use tributary_core::types::ColumnValue;

use crate::backfill::Backfiller;
use crate::envelope::SyncEnvelope;
use crate::error::EngineResult;
use crate::setup::SetupStep;

mod duration_millis {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    #[allow(clippy::cast_possible_truncation)]
    pub fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// ── Backfill configuration ──────────────────────────────────────────

/// Per-adapter backfill tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    /// Concurrent backfillers when the adapter returns more than one.
    /// 1 means strictly sequential.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Retries per page fetch on transient HTTP errors.
    #[serde(default = "default_page_retries")]
    pub page_retries: u32,

    /// Delay between page-fetch retries.
    #[serde(default = "default_retry_backoff", with = "duration_millis")]
    pub retry_backoff: Duration,

    /// Per-page-fetch timeout. A timed-out fetch counts as a transient
    /// error and is retried.
    #[serde(default = "default_fetch_timeout", with = "duration_millis")]
    pub fetch_timeout: Duration,
}

fn default_parallelism() -> usize {
    1
}

fn default_page_retries() -> u32 {
    2
}

fn default_retry_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            page_retries: default_page_retries(),
            retry_backoff: default_retry_backoff(),
            fetch_timeout: default_fetch_timeout(),
        }
    }
}

// ── Page ────────────────────────────────────────────────────────────

/// One page of backfill items.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Raw items, each fed through the upsert pipeline.
    pub items: Vec<JsonValue>,
    /// Token for the next page; `None` terminates pagination.
    pub next_token: Option<String>,
}

impl Page {
    /// Creates a page.
    #[must_use]
    pub fn new(items: Vec<JsonValue>, next_token: Option<String>) -> Self {
        Self { items, next_token }
    }

    /// Creates a terminal page.
    #[must_use]
    pub fn last(items: Vec<JsonValue>) -> Self {
        Self {
            items,
            next_token: None,
        }
    }
}

// ── Conflict-resolution declarations ────────────────────────────────

/// How one column's value merges on upsert conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Take the incoming value unconditionally.
    TakeIncoming,
    /// Keep the stored value when the incoming value is NULL.
    /// Used for fields only ever set once, like a created-at a later
    /// event payload doesn't carry.
    CoalesceExisting,
}

/// The mandatory predicate gating the conflict UPDATE.
///
/// An adapter must never allow an unconditional overwrite with
/// identical data: it wastes writes and spuriously re-triggers
/// dependent propagation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePredicate {
    /// Update only when the incoming value of the named timestamp
    /// column is strictly newer than the stored one, or the stored one
    /// is NULL.
    TimestampNewer {
        /// The designated timestamp column.
        column: String,
    },
    /// Update only when the incoming `data` payload differs from the
    /// stored one. For resources without a reliable timestamp.
    DataChanged,
}

// ── Adapter trait ───────────────────────────────────────────────────

/// The contract every service adapter implements.
///
/// Required methods describe the table shape and the service's webhook
/// and pagination formats; everything with a default body is an
/// override point for unusual services.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Stable service name, e.g. `"stripe_charge_v1"`.
    fn service_name(&self) -> &'static str;

    /// The unique external-identifier column.
    fn remote_key_column(&self) -> Column;

    /// Columns extracted from the payload into their own physical
    /// columns, in declaration order.
    fn denormalized_columns(&self) -> Vec<Column>;

    /// Additional multi-column indexes beyond per-column `index` flags.
    fn multi_column_indexes(&self) -> Vec<Vec<String>> {
        Vec::new()
    }

    /// The column compared by [`UpdatePredicate::TimestampNewer`].
    /// `None` switches the predicate to [`UpdatePredicate::DataChanged`].
    fn timestamp_column(&self) -> Option<&'static str>;

    /// Whether enrichment payloads are stored in their own column.
    fn store_enrichment(&self) -> bool {
        false
    }

    /// Whether the integration needs an application-database sequence
    /// for synthesizing ids when the payload lacks one.
    fn requires_sequence(&self) -> bool {
        false
    }

    /// Optional physical partitioning declaration.
    fn partitioning(&self) -> Option<Partitioning> {
        None
    }

    /// Computes the partition value for a resource. Must be pure.
    /// Only consulted when [`Adapter::partitioning`] is declared.
    fn partition_value(&self, _resource: &JsonValue) -> ColumnValue {
        ColumnValue::Null
    }

    /// Splits the envelope into a resource map and an optional event
    /// envelope. Returning `Ok(None)` skips the payload entirely, e.g.
    /// an event type this adapter doesn't track.
    ///
    /// # Errors
    ///
    /// Returns an error when the payload is malformed beyond skipping.
    fn resource_and_event(
        &self,
        envelope: &SyncEnvelope,
    ) -> EngineResult<Option<(JsonValue, Option<JsonValue>)>>;

    /// Optional synchronous side-call fetching supplementary data not
    /// present in the payload.
    ///
    /// # Errors
    ///
    /// Transient errors are retried by the caller; permanent HTTP
    /// errors make the row upsert proceed without enrichment.
    async fn fetch_enrichment(
        &self,
        _resource: &JsonValue,
        _event: Option<&JsonValue>,
        _integration: &ServiceIntegration,
    ) -> EngineResult<Option<JsonValue>> {
        Ok(None)
    }

    /// The value stored in the `data` column. Defaults to the raw
    /// resource; override to store a richer or filtered structure.
    fn data_value(&self, resource: &JsonValue) -> JsonValue {
        resource.clone()
    }

    /// Merge policy for one column on upsert conflict.
    fn update_policy(&self, _column: &str) -> UpdatePolicy {
        UpdatePolicy::TakeIncoming
    }

    /// The predicate gating the conflict UPDATE. The default derives
    /// from [`Adapter::timestamp_column`].
    fn update_predicate(&self) -> UpdatePredicate {
        match self.timestamp_column() {
            Some(column) => UpdatePredicate::TimestampNewer {
                column: column.to_string(),
            },
            None => UpdatePredicate::DataChanged,
        }
    }

    /// Fetches one page of the backfill. A `None` token means the
    /// first page; `last_backfilled` is the incremental watermark and
    /// lets implementations stop paginating once items predate it.
    ///
    /// # Errors
    ///
    /// [`crate::error::EngineError::TransientHttp`] is retried per
    /// [`BackfillConfig`]; other errors propagate immediately.
    async fn fetch_backfill_page(
        &self,
        token: Option<String>,
        last_backfilled: Option<DateTime<Utc>>,
        integration: &ServiceIntegration,
    ) -> EngineResult<Page>;

    /// Adapters paging per-parent-entity return one backfiller per
    /// parent here; `None` uses the single default page loop.
    fn custom_backfillers(
        &self,
        _integration: &ServiceIntegration,
    ) -> Option<Vec<Box<dyn Backfiller>>> {
        None
    }

    /// Backfill tuning.
    fn backfill_config(&self) -> BackfillConfig {
        BackfillConfig::default()
    }

    /// Hook invoked when a replicator this one depends on upserts a
    /// row. `changed=false` no-ops are still delivered so dependents
    /// can decide for themselves.
    ///
    /// # Errors
    ///
    /// Errors propagate synchronously and fail the parent upsert.
    async fn on_dependency_upsert(
        &self,
        _source: &ServiceIntegration,
        _row: &crate::storage::Row,
        _changed: bool,
    ) -> EngineResult<()> {
        Ok(())
    }

    /// The next onboarding step for this integration.
    fn next_setup_step(&self, integration: &ServiceIntegration) -> SetupStep {
        SetupStep::default_flow(self.service_name(), integration)
    }

    /// Adapter-specific message for a verification probe failing with
    /// the given HTTP status. `None` falls back to a generic message.
    fn verification_message(&self, _status: u16) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backfill_config_defaults() {
        let c = BackfillConfig::default();
        assert_eq!(c.parallelism, 1);
        assert_eq!(c.page_retries, 2);
        assert_eq!(c.retry_backoff, Duration::from_secs(1));
    }

    #[test]
    fn test_backfill_config_deserializes_with_defaults() {
        let c: BackfillConfig = serde_json::from_str("{\"parallelism\": 4}").unwrap();
        assert_eq!(c.parallelism, 4);
        assert_eq!(c.page_retries, 2);
        assert_eq!(c.fetch_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_page_last_terminates() {
        let p = Page::last(vec![serde_json::json!({"id": 1})]);
        assert!(p.next_token.is_none());
        assert_eq!(p.items.len(), 1);
    }
}
