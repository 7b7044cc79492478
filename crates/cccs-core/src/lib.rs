// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared contract types for the CCCS substrate.
//!
//! Every other `cccs-*` crate depends on this one for the typed data model
//! (actor context and block, policy rules and decisions, config results,
//! budget decisions, receipt records, trace contexts), for canonical JSON
//! hashing, and for semantic-version compatibility checks.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod canonical;
mod types;
mod version;

pub use canonical::{canonical_json, sha256_hex, snapshot_hash};
pub use types::{
    ActorBlock, ActorContext, BudgetDecision, ConfigLayers, ConfigResult, JsonMap, PolicyDecision,
    PolicyRule, PolicySnapshot, ReceiptRecord, TraceContext,
};
pub use version::{ApiVersion, VersionParseError};
