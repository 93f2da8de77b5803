// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::path::Path;

use http::StatusCode;
use httpvcr_core::{Result, VcrError};
use serde::{Deserialize, Serialize};

/// Request metadata read from a stub.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestSpec {
    pub url: String,
    /// Extracted from the URL for validation; empty when the URL has none.
    pub host: String,
}

impl RequestSpec {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let host = host_of(&url);
        Self { url, host }
    }
}

/// Response metadata persisted in the HAR file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status: u16,
    /// First value per header name.
    pub headers: BTreeMap<String, String>,
    pub mime_type: String,
    pub size: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct Har {
    pub log: HarLog,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct HarLog {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "HarCreator::is_empty")]
    pub creator: HarCreator,
    pub entries: Vec<HarEntry>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct HarCreator {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

impl HarCreator {
    fn is_empty(&self) -> bool {
        self.name.is_empty() && self.version.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct HarEntry {
    pub request: HarRequest,
    pub response: HarResponse,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct HarRequest {
    pub url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct HarResponse {
    #[serde(default)]
    pub status: u16,
    #[serde(rename = "statusText", default, skip_serializing_if = "String::is_empty")]
    pub status_text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HarNameValue>,
    pub content: HarContent,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct HarContent {
    #[serde(default)]
    pub size: usize,
    #[serde(rename = "mimeType", default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct HarNameValue {
    pub name: String,
    pub value: String,
}

pub(crate) fn build_har(req: &RequestSpec, resp: &ResponseMeta) -> Har {
    Har {
        log: HarLog {
            version: "1.2".to_string(),
            creator: HarCreator {
                name: "httpvcr".to_string(),
                version: String::new(),
            },
            entries: vec![HarEntry {
                request: HarRequest {
                    url: req.url.clone(),
                },
                response: HarResponse {
                    status: resp.status,
                    status_text: status_text(resp.status),
                    headers: resp
                        .headers
                        .iter()
                        .map(|(name, value)| HarNameValue {
                            name: name.clone(),
                            value: value.clone(),
                        })
                        .collect(),
                    content: HarContent {
                        size: resp.size,
                        mime_type: resp.mime_type.clone(),
                    },
                },
            }],
        },
    }
}

/// Parses HAR bytes and enforces the exactly-one-entry invariant.
pub(crate) fn parse_single_entry(path: &Path, data: &[u8]) -> Result<(RequestSpec, ResponseMeta)> {
    let har: Har = serde_json::from_slice(data).map_err(|err| VcrError::ArchiveCorrupt {
        path: path.to_path_buf(),
        reason: format!("unreadable HAR: {err}"),
    })?;
    if har.log.entries.len() != 1 {
        return Err(VcrError::ArchiveCorrupt {
            path: path.to_path_buf(),
            reason: format!(
                "HAR must contain exactly one entry, found {}",
                har.log.entries.len()
            ),
        });
    }
    let entry = &har.log.entries[0];
    let meta = ResponseMeta {
        status: entry.response.status,
        headers: entry
            .response
            .headers
            .iter()
            .map(|nv| (nv.name.clone(), nv.value.clone()))
            .collect(),
        mime_type: entry.response.content.mime_type.clone(),
        size: entry.response.content.size,
    };
    Ok((RequestSpec::new(entry.request.url.clone()), meta))
}

fn status_text(status: u16) -> String {
    if status == 0 {
        return String::new();
    }
    StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or_default()
        .to_string()
}

fn host_of(url: &str) -> String {
    let Some((_, rest)) = url.split_once("://") else {
        return String::new();
    };
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    authority.rsplit('@').next().unwrap_or_default().to_string()
}
