// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};

/// A named API endpoint registered for recording and playback.
///
/// Collaborators provide these as data; the engine never persists them.
/// `pattern` uses `{name}` placeholders, e.g. `/things/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Identifier used for stub filenames and scenario keys.
    pub name: String,
    /// HTTP method, e.g. `GET`.
    pub method: String,
    /// URL path pattern with `{name}` placeholders.
    pub pattern: String,
}

impl Endpoint {
    pub fn new(
        name: impl Into<String>,
        method: impl Into<String>,
        pattern: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            method: method.into(),
            pattern: pattern.into(),
        }
    }
}
