//! # Tributary Engine
//!
//! The replication engine of Tributary: service adapters describe an
//! external API's rows declaratively, and the engine handles webhook
//! ingestion, paginated backfills, conditional upserts, schema
//! evolution, and dependency propagation against a relational store.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

/// Service adapter trait and backfill configuration
pub mod adapter;

/// Paginated backfill driver
pub mod backfill;

/// Dependency propagation and subscriber publication
pub mod dependency;

/// Inbound webhook envelope
pub mod envelope;

/// Engine error taxonomy
pub mod error;

/// Per-row mutual exclusion
pub mod lock;

/// Bounded worker pool for parallel backfillers
pub mod pool;

/// Adapter registry
pub mod registry;

/// The replicator: schema derivation and the upsert pipeline
pub mod replicator;

/// Guided setup state machine
pub mod setup;

/// Storage backends
pub mod storage;

/// Credential verification probe
pub mod verify;

pub use adapter::{Adapter, BackfillConfig, Page, UpdatePolicy, UpdatePredicate};
pub use backfill::{BackfillJob, BackfillStats, Backfiller};
pub use dependency::{ChannelPublisher, EventPublisher, RowUpsertEvent};
pub use envelope::SyncEnvelope;
pub use error::{EngineError, EngineResult};
pub use lock::RowLocks;
pub use registry::AdapterRegistry;
pub use replicator::Replicator;
pub use setup::{SetupStep, StateTransition};
pub use storage::{MemoryBackend, Row, StorageBackend, UpsertOutcome, UpsertPlan};
pub use verify::{verify_credentials, CredentialVerification};
