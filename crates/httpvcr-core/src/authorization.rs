// SPDX-License-Identifier: Apache-2.0

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde_json::{Map, Value};

use crate::policy::Policy;

impl Policy {
    /// Decides whether a request may be recorded under this policy.
    ///
    /// Rules, in order:
    /// 1. no `authorization.claims` configured → allow;
    /// 2. no `Authorization` header → allow (absence of auth implies a
    ///    public request safe to record);
    /// 3. header is not `Bearer <token>` (case-insensitive prefix) → allow,
    ///    non-bearer auth is unclassified;
    /// 4. bearer token whose JWT payload cannot be decoded → deny;
    /// 5. any required claim missing or mismatched → deny.
    ///
    /// No signature verification is performed.
    #[must_use]
    pub fn allow_record(&self, authorization_header: Option<&str>) -> bool {
        let claims_required = match self.authorization.as_ref() {
            Some(auth) if !auth.claims.is_empty() => &auth.claims,
            _ => return true,
        };

        let Some(header) = authorization_header else {
            return true;
        };
        let Some(token) = bearer_token(header) else {
            return true;
        };

        let Ok(claims) = decode_jwt_claims(token) else {
            return false;
        };

        claims_required.iter().all(|(name, required)| {
            claims
                .get(name)
                .is_some_and(|actual| claims_match(required, actual))
        })
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    const PREFIX: &str = "Bearer ";
    if header.len() < PREFIX.len() || !header[..PREFIX.len()].eq_ignore_ascii_case(PREFIX) {
        return None;
    }
    let token = header[PREFIX.len()..].trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Decodes the payload (second segment) of a JWT into a claims map.
fn decode_jwt_claims(token: &str) -> Result<Map<String, Value>, JwtDecodeError> {
    let mut segments = token.split('.');
    let _header = segments.next();
    let payload = segments.next().ok_or(JwtDecodeError::TooFewSegments)?;

    // Re-pad to a 4-byte boundary; tokens strip base64 padding.
    let mut padded = payload.to_string();
    let rem = padded.len() % 4;
    if rem != 0 {
        padded.extend(std::iter::repeat_n('=', 4 - rem));
    }

    let decoded = URL_SAFE
        .decode(padded.as_bytes())
        .map_err(|_| JwtDecodeError::Base64)?;
    match serde_json::from_slice::<Value>(&decoded) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(JwtDecodeError::Json),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum JwtDecodeError {
    TooFewSegments,
    Base64,
    Json,
}

/// Structural equality with numeric coercion: integer and floating claim
/// values compare as f64, matching how JSON numbers arrive from a token.
fn claims_match(required: &Value, actual: &Value) -> bool {
    if required == actual {
        return true;
    }
    match (required.as_f64(), actual.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
