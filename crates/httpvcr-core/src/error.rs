// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, VcrError>;

/// Error kinds surfaced by the engine.
///
/// Playback maps `NotFound` and `MatchMiss` to HTTP 501 (a recording gap,
/// not a server fault); everything else that reaches a response maps to 500.
/// `Unauthorized` never leaves the recorder: it only skips persistence.
#[derive(Debug)]
#[non_exhaustive]
pub enum VcrError {
    NotConfigured(String),
    ArchiveCorrupt {
        path: PathBuf,
        reason: String,
    },
    NotFound {
        endpoint: String,
        diversifier: String,
    },
    MatchMiss {
        method: String,
        path: String,
    },
    MissingScenario {
        endpoint: String,
    },
    Unauthorized(String),
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl VcrError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl fmt::Display for VcrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured(reason) => write!(f, "vcr not configured: {reason}"),
            Self::ArchiveCorrupt { path, reason } => {
                write!(f, "archive corrupt at {}: {reason}", path.display())
            }
            Self::NotFound {
                endpoint,
                diversifier,
            } => {
                if diversifier.is_empty() {
                    write!(f, "no stub for endpoint {endpoint}")
                } else {
                    write!(f, "no stub for endpoint {endpoint} (variant {diversifier})")
                }
            }
            Self::MatchMiss { method, path } => {
                write!(f, "no endpoint matches {method} {path}")
            }
            Self::MissingScenario { endpoint } => {
                write!(f, "no scenario handler for {endpoint}")
            }
            Self::Unauthorized(reason) => write!(f, "recording not authorized: {reason}"),
            Self::Io { context, source } => write!(f, "{context}: {source}"),
        }
    }
}

impl std::error::Error for VcrError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display_mentions_variant_only_when_present() {
        let plain = VcrError::NotFound {
            endpoint: "GetThing".to_string(),
            diversifier: String::new(),
        };
        assert_eq!(plain.to_string(), "no stub for endpoint GetThing");

        let diversified = VcrError::NotFound {
            endpoint: "GetThing".to_string(),
            diversifier: "q-0123456789abcdef".to_string(),
        };
        assert!(diversified.to_string().contains("q-0123456789abcdef"));
    }

    #[test]
    fn io_errors_expose_their_source() {
        let err = VcrError::io(
            "read vcr.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(std::error::Error::source(&err).is_some());
    }
}
