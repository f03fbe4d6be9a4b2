//! Change-tracking trigger synthesis
//!
//! Reads an annotated entity model, decides which attributes are tracked and
//! how each change is identified and labeled, and emits database-resident
//! triggers that record every tracked change into two fixed storage tables
//! (`Changes` facts under a per-entity-key `ChangeLog` header).
//!
//! ```text
//! SchemaModel --analyze--> TrackedEntity --plan--> TriggerPlan --generate--> GeneratedTrigger
//! ```
//!
//! Four backends share one plan and one set of value-encoding rules:
//! `sqlite`, `hana`, `h2` and `postgres`. Generated text is never executed
//! here; [`deploy`] describes what a deployment harness runs.
//!
//! With the `pg` feature the crate also builds as a PostgreSQL extension
//! exposing generation and skip flags as SQL functions.

#[cfg(feature = "pg")]
use pgrx::prelude::*;

pub mod config;
pub mod deploy;
pub mod dialect;
pub mod encoding;
pub mod error;
pub mod generator;
pub mod plan;
pub mod schema;
pub mod skip;
pub mod validation;

#[cfg(feature = "pg")]
mod extension;

pub use error::{ChangelogError, ChangelogResult};

#[cfg(feature = "pg")]
pg_module_magic!();
