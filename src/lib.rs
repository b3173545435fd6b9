//! SQL safety policy for LLM-proposed analytics queries.
//!
//! Proposed SQL is validated against an allowlisted catalog and rewritten
//! into a bounded, parameterized, read-only statement before it is handed
//! to the execution layer.

pub mod catalog;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod policy;

pub use catalog::{CatalogAllowlist, CatalogCache, CatalogSnapshot, CatalogTable};
pub use config::{CatalogConfig, PolicyConfig};
pub use error::{PolicyError, Result};
pub use policy::{AppliedTimeWindow, PolicyOutcome, ProposedQuery, SqlPolicy, SqlPolicyResult};
