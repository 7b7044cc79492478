// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP facade adapters for the CCCS upstream services.
//!
//! One bounded client per upstream: identity/IAM, policy publisher, budget,
//! signing/KMS, and the receipt indexer. All request/response bodies are
//! JSON; every failure maps to a canonical error with a sanitized,
//! length-capped message. Connect timeouts are capped at 5 s; read/write
//! timeouts come from the adapter config.
//!
//! These adapters are only ever awaited from the background drain worker or
//! from explicit cache-bypass operations — never from the request path.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod budget;
mod http;
mod identity;
mod indexer;
mod policy;
mod signing;

pub use budget::{BudgetAdapter, BudgetAdapterConfig};
pub use http::HttpConfig;
pub use identity::IdentityAdapter;
pub use indexer::IndexerAdapter;
pub use policy::PolicyAdapter;
pub use signing::{SigningAdapter, SigningAdapterConfig};
