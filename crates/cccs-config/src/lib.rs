// SPDX-License-Identifier: MIT OR Apache-2.0
//! Layered configuration merging for CCCS.
//!
//! Lookup precedence is call-time overrides, then local, tenant, and
//! product, first match wins. The canonical hash over all three layers is
//! computed once at construction and stamped into every result.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use cccs_core::{ConfigLayers, ConfigResult, JsonMap, snapshot_hash};
use serde_json::Value;

/// Warning tag attached when a key is absent from every layer.
pub const CONFIG_GAP: &str = "config_gap";

/// Merges local, tenant, and product configurations deterministically.
///
/// Read-only after construction; cheap to share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ConfigService {
    layers: ConfigLayers,
    hash: String,
}

impl ConfigService {
    /// Build a service over the given layers, fixing the snapshot hash.
    #[must_use]
    pub fn new(layers: ConfigLayers) -> Self {
        let hash = snapshot_hash(&layers).unwrap_or_else(|_| "sha256:".to_string());
        Self { layers, hash }
    }

    /// The `sha256:`-prefixed hash over all three layers.
    #[must_use]
    pub fn config_snapshot_hash(&self) -> &str {
        &self.hash
    }

    /// Look up `key`, tracking the source layer and advisory warnings.
    ///
    /// `scope` restricts the search to one named layer (`"local"`,
    /// `"tenant"`, or `"product"`); overrides always apply first. A JSON
    /// `null` counts as missing, so a `null` override cannot shadow a
    /// configured layer value.
    #[must_use]
    pub fn get_config(
        &self,
        key: &str,
        scope: Option<&str>,
        overrides: Option<&JsonMap>,
    ) -> ConfigResult {
        let search_order: [(&str, &JsonMap); 3] = [
            ("local", &self.layers.local),
            ("tenant", &self.layers.tenant),
            ("product", &self.layers.product),
        ];

        let mut value: Option<Value> = overrides
            .and_then(|o| o.get(key))
            .filter(|v| !v.is_null())
            .cloned();
        let mut source_layers = Vec::new();
        let mut warnings = Vec::new();

        if value.is_some() {
            source_layers.push("overrides".to_string());
        } else {
            for (name, layer) in search_order {
                if scope.is_some_and(|s| s != name) {
                    continue;
                }
                match layer.get(key) {
                    Some(v) if !v.is_null() => {
                        value = Some(v.clone());
                        source_layers.push(name.to_string());
                        break;
                    }
                    _ => {}
                }
            }
        }

        if value.is_none() {
            warnings.push(CONFIG_GAP.to_string());
        }

        ConfigResult {
            value,
            source_layers,
            config_snapshot_hash: self.hash.clone(),
            warnings,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
