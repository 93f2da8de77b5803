// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use httpvcr_core::Endpoint;

/// Maps live requests to registered endpoint identities.
///
/// Patterns use `{name}` placeholders, e.g. `/things/{id}`. The matcher sits
/// on the hot path of every recorded and replayed request: it is compiled
/// once, stateless across requests, and allocates nothing on the miss path.
#[derive(Debug)]
pub struct RouteMatcher {
    routes: Vec<CompiledRoute>,
}

#[derive(Debug)]
struct CompiledRoute {
    name: String,
    method: String,
    segments: Vec<Segment>,
    literal_count: usize,
}

#[derive(Debug)]
enum Segment {
    Literal(String),
    Param(String),
}

impl RouteMatcher {
    #[must_use]
    pub fn new(endpoints: &[Endpoint]) -> Self {
        let routes = endpoints
            .iter()
            .map(|ep| {
                let segments: Vec<Segment> = split_path(&ep.pattern)
                    .into_iter()
                    .map(|segment| {
                        segment
                            .strip_prefix('{')
                            .and_then(|s| s.strip_suffix('}'))
                            .map_or_else(
                                || Segment::Literal(segment.to_string()),
                                |name| Segment::Param(name.to_string()),
                            )
                    })
                    .collect();
                let literal_count = segments
                    .iter()
                    .filter(|s| matches!(s, Segment::Literal(_)))
                    .count();
                CompiledRoute {
                    name: ep.name.clone(),
                    method: ep.method.to_ascii_uppercase(),
                    segments,
                    literal_count,
                }
            })
            .collect();
        Self { routes }
    }

    /// Returns the endpoint name and extracted path variables, or `None` on
    /// a miss. When several routes match, the one with the most literal
    /// segments wins; remaining ties go to the first registered.
    #[must_use]
    pub fn match_request(
        &self,
        method: &str,
        path: &str,
    ) -> Option<(&str, BTreeMap<String, String>)> {
        let segments = split_path(path);
        let mut best: Option<&CompiledRoute> = None;
        for route in &self.routes {
            if !route.method.eq_ignore_ascii_case(method) {
                continue;
            }
            if !route_matches(route, &segments) {
                continue;
            }
            let better = best.is_none_or(|current| route.literal_count > current.literal_count);
            if better {
                best = Some(route);
            }
        }
        let route = best?;
        let mut vars = BTreeMap::new();
        for (segment, value) in route.segments.iter().zip(&segments) {
            if let Segment::Param(name) = segment {
                vars.insert(name.clone(), (*value).to_string());
            }
        }
        Some((route.name.as_str(), vars))
    }
}

fn route_matches(route: &CompiledRoute, segments: &[&str]) -> bool {
    if route.segments.len() != segments.len() {
        return false;
    }
    route
        .segments
        .iter()
        .zip(segments)
        .all(|(pattern, actual)| match pattern {
            Segment::Literal(lit) => lit == actual,
            Segment::Param(_) => !actual.is_empty(),
        })
}

fn split_path(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split('/').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(routes: &[(&str, &str, &str)]) -> RouteMatcher {
        let endpoints: Vec<Endpoint> = routes
            .iter()
            .map(|(name, method, pattern)| Endpoint::new(*name, *method, *pattern))
            .collect();
        RouteMatcher::new(&endpoints)
    }

    #[test]
    fn matches_pattern_and_extracts_vars() {
        let m = matcher(&[("GetThing", "GET", "/things/{id}")]);
        let (name, vars) = m.match_request("GET", "/things/123").expect("match");
        assert_eq!(name, "GetThing");
        assert_eq!(vars.get("id").map(String::as_str), Some("123"));
    }

    #[test]
    fn miss_returns_none() {
        let m = matcher(&[("GetThing", "GET", "/things/{id}")]);
        assert!(m.match_request("GET", "/other/123").is_none());
        assert!(m.match_request("GET", "/things").is_none());
        assert!(m.match_request("GET", "/things/1/extra").is_none());
    }

    #[test]
    fn method_must_match_case_insensitively() {
        let m = matcher(&[("CreateThing", "POST", "/things")]);
        assert!(m.match_request("GET", "/things").is_none());
        assert!(m.match_request("post", "/things").is_some());
    }

    #[test]
    fn longest_literal_route_wins() {
        let m = matcher(&[
            ("GetThing", "GET", "/things/{id}"),
            ("GetThingSchema", "GET", "/things/schema"),
        ]);
        let (name, _) = m.match_request("GET", "/things/schema").expect("match");
        assert_eq!(name, "GetThingSchema");
        let (name, _) = m.match_request("GET", "/things/42").expect("match");
        assert_eq!(name, "GetThing");
    }

    #[test]
    fn first_registered_wins_remaining_ties() {
        let m = matcher(&[
            ("ById", "GET", "/things/{id}"),
            ("ByName", "GET", "/things/{name}"),
        ]);
        let (name, _) = m.match_request("GET", "/things/x").expect("match");
        assert_eq!(name, "ById");
    }

    #[test]
    fn multiple_params_are_all_captured() {
        let m = matcher(&[("GetPart", "GET", "/things/{id}/parts/{part}")]);
        let (_, vars) = m.match_request("GET", "/things/7/parts/leg").expect("match");
        assert_eq!(vars.get("id").map(String::as_str), Some("7"));
        assert_eq!(vars.get("part").map(String::as_str), Some("leg"));
    }

    #[test]
    fn empty_segment_does_not_bind_a_param() {
        let m = matcher(&[("GetThing", "GET", "/things/{id}")]);
        assert!(m.match_request("GET", "/things/").is_none());
    }
}
