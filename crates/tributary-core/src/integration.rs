//! Service integration context.
//!
//! A [`ServiceIntegration`] identifies one configured adapter instance:
//! which organization schema and table it writes to, its credentials,
//! and its place in the dependency graph. The engine reads and mutates
//! these fields; persistence is the host application's concern.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One configured adapter instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceIntegration {
    /// Opaque identifier, unique across all integrations. Participates
    /// in derived index and sequence names.
    pub opaque_id: String,

    /// Registered adapter name (e.g., `"github_issue_v1"`).
    pub service_name: String,

    /// Per-organization schema the replicator table lives in.
    pub organization_schema: String,

    /// Table name, unique per integration.
    pub table_name: String,

    /// Secret used to verify inbound webhook signatures.
    pub webhook_secret: Option<String>,

    /// API key used for backfill requests.
    pub backfill_key: Option<String>,

    /// API secret used for backfill requests.
    pub backfill_secret: Option<String>,

    /// Base API URL, for services with per-account hosts.
    pub api_url: Option<String>,

    /// Opaque id of the integration this one derives its data from.
    pub depends_on: Option<String>,

    /// Whether this integration synthesizes ids from a sequence.
    pub requires_sequence: bool,

    /// Watermark advanced after each successful incremental backfill.
    pub last_backfilled_at: Option<DateTime<Utc>>,
}

impl ServiceIntegration {
    /// Creates an integration with the given identity and empty credentials.
    #[must_use]
    pub fn new(
        opaque_id: impl Into<String>,
        service_name: impl Into<String>,
        organization_schema: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            opaque_id: opaque_id.into(),
            service_name: service_name.into(),
            organization_schema: organization_schema.into(),
            table_name: table_name.into(),
            webhook_secret: None,
            backfill_key: None,
            backfill_secret: None,
            api_url: None,
            depends_on: None,
            requires_sequence: false,
            last_backfilled_at: None,
        }
    }

    /// Marks this integration as requiring a synthesized-id sequence.
    #[must_use]
    pub fn with_sequence(mut self) -> Self {
        self.requires_sequence = true;
        self
    }

    /// Sets the dependency link.
    #[must_use]
    pub fn with_depends_on(mut self, opaque_id: impl Into<String>) -> Self {
        self.depends_on = Some(opaque_id.into());
        self
    }

    /// Name of the cross-database sequence for synthesized ids.
    ///
    /// Sequence names must be unique per application database, so the
    /// opaque id participates.
    #[must_use]
    pub fn sequence_name(&self) -> String {
        format!("replicator_seq_{}_seq", self.opaque_id)
    }
}
