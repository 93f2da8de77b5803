// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, VcrError};

/// Name of the policy file at the archive root.
pub const POLICY_FILE_NAME: &str = "vcr.json";

/// On-disk schema for `vcr.json`.
///
/// Unknown fields are tolerated on read; endpoints are kept in a BTreeMap so
/// the marshaled form is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    /// Base URL of the upstream server, e.g. `https://api.example.com`.
    #[serde(default)]
    pub upstream: String,
    /// Per-endpoint policy options keyed by endpoint name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub endpoints: BTreeMap<String, EndpointPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<AuthorizationPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<VariantPolicy>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantPolicy {
    /// Whether query strings participate in stub variants.
    /// Absent means enabled, and eligible for auto-tuning by the recorder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<bool>,
    /// Whether route params participate in stub variants.
    /// Absent means disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationPolicy {
    /// Required claim name → required scalar value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub claims: BTreeMap<String, Value>,
}

impl Policy {
    /// Returns `(enabled, explicit)` for `endpoints[name].variant.query`.
    /// When not explicitly set, query variants default to enabled.
    #[must_use]
    pub fn query_variant_enabled(&self, endpoint_name: &str) -> (bool, bool) {
        match self
            .endpoints
            .get(endpoint_name)
            .and_then(|ep| ep.variant.as_ref())
            .and_then(|v| v.query)
        {
            Some(enabled) => (enabled, true),
            None => (true, false),
        }
    }

    /// Returns `(enabled, explicit)` for `endpoints[name].variant.path`.
    /// When not explicitly set, path variants default to disabled.
    #[must_use]
    pub fn path_variant_enabled(&self, endpoint_name: &str) -> (bool, bool) {
        match self
            .endpoints
            .get(endpoint_name)
            .and_then(|ep| ep.variant.as_ref())
            .and_then(|v| v.path)
        {
            Some(enabled) => (enabled, true),
            None => (false, false),
        }
    }

    pub fn set_variant_query(&mut self, endpoint_name: &str, enabled: bool) {
        let ep = self.endpoints.entry(endpoint_name.to_string()).or_default();
        ep.variant.get_or_insert_with(VariantPolicy::default).query = Some(enabled);
    }

    /// Reverts an explicit query setting; drops the endpoint entry entirely
    /// when nothing else remains in it.
    pub fn clear_variant_query(&mut self, endpoint_name: &str) {
        let Some(ep) = self.endpoints.get_mut(endpoint_name) else {
            return;
        };
        if let Some(variant) = ep.variant.as_mut() {
            variant.query = None;
        }
        let empty = ep
            .variant
            .as_ref()
            .is_none_or(|v| v.query.is_none() && v.path.is_none());
        if empty {
            self.endpoints.remove(endpoint_name);
        }
    }

    /// Hostname (including any port) of the upstream base URL.
    #[must_use]
    pub fn host(&self) -> String {
        host_of(&self.upstream)
    }

    /// Checks that `authorization.claims` values are JSON scalars only.
    pub fn validate(&self) -> Result<()> {
        let Some(auth) = self.authorization.as_ref() else {
            return Ok(());
        };
        for (name, value) in &auth.claims {
            if value.is_object() || value.is_array() {
                return Err(VcrError::NotConfigured(format!(
                    "authorization.claims.{name}: value must be a JSON scalar (string, number, bool, null)"
                )));
            }
        }
        Ok(())
    }
}

fn host_of(upstream: &str) -> String {
    let Some((_, rest)) = upstream.split_once("://") else {
        return String::new();
    };
    let authority = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = authority.rsplit('@').next().unwrap_or_default();
    host.to_string()
}
