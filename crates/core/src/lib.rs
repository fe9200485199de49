//! # Postgate Core
//!
//! Publishing use case - no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces (traits) for every collaborator the publish flow talks
//!   to: the platform API, credential storage, scheduling, notification and
//!   business records
//! - [`PublishOrchestrator`], which runs one job through admission, the
//!   external call, categorization and retry scheduling
//!
//! ## Architecture Principles
//! - Depends only on `postgate-common` and `postgate-domain`
//! - No HTTP, database or queue code
//! - All external dependencies via traits

pub mod publish;

pub use publish::ports;
pub use publish::ports::{
    CredentialNotifier, CredentialStore, JobQueue, PublishRecords, Publisher, RevocationNotice,
    WorkPauser,
};
pub use publish::{
    DeferReason, OrchestratorConfig, PublishOrchestrator, PublishOutcome, PublishPorts,
};
