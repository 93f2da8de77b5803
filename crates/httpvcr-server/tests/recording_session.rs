// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use httpvcr_archive::{Archive, PolicyRequirement};
use httpvcr_core::diversifier::request_diversifier;
use httpvcr_core::{Endpoint, Policy, Result};
use httpvcr_server::{ProxyRequest, RecordingTransport, UpstreamResponse, UpstreamTransport};

struct StaticUpstream {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

#[async_trait]
impl UpstreamTransport for StaticUpstream {
    async fn round_trip(&self, _req: &ProxyRequest) -> Result<UpstreamResponse> {
        Ok(UpstreamResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
        })
    }
}

fn json_upstream(status: StatusCode, body: &[u8]) -> Arc<StaticUpstream> {
    let mut headers = HeaderMap::new();
    headers.insert("content-type", "application/json".parse().expect("header"));
    Arc::new(StaticUpstream {
        status,
        headers,
        body: Bytes::from(body.to_vec()),
    })
}

fn seeded_archive(dir: &Path) -> Archive {
    fs::write(
        dir.join("vcr.json"),
        b"{\"upstream\":\"https://example.com\"}\n",
    )
    .expect("write policy");
    Archive::open(dir, PolicyRequirement::Required).expect("open archive")
}

fn thing_endpoints() -> Vec<Endpoint> {
    vec![Endpoint::new("GetThing", "GET", "/things/{id}")]
}

fn get_request(url: &str) -> ProxyRequest {
    ProxyRequest::new(Method::GET, url.parse::<Uri>().expect("uri"))
}

fn reopen(dir: &Path) -> Archive {
    Archive::open(dir, PolicyRequirement::Required).expect("reopen archive")
}

#[tokio::test]
async fn records_get_200_json_as_pretty_stub() {
    let dir = tempfile::tempdir().expect("tempdir");
    let archive = seeded_archive(dir.path());
    let transport = RecordingTransport::new(
        archive,
        &thing_endpoints(),
        json_upstream(StatusCode::OK, b"{\"ok\":true,\"n\":1}"),
        10,
    );

    let req = get_request("https://example.com/things/123?a=1");
    let resp = transport.round_trip(&req).await.expect("round trip");
    assert_eq!(resp.status, StatusCode::OK);

    let archive = reopen(dir.path());
    let div = request_diversifier(
        &archive.policy,
        "GetThing",
        &[("a".to_string(), "1".to_string())],
        &BTreeMap::new(),
    );
    assert!(archive.has_stub("GetThing", &div).expect("has_stub"));

    let (meta, body) = archive
        .read_response("GetThing", &div)
        .expect("read response");
    assert_eq!(meta.status, 200);
    assert_eq!(meta.mime_type, "application/json");
    assert_eq!(body, b"{\n  \"ok\": true,\n  \"n\": 1\n}\n");
    assert_eq!(meta.size, body.len());

    let req_spec = archive.read_request("GetThing", &div).expect("read request");
    assert_eq!(req_spec.url, "https://example.com/things/123?a=1");
    assert_eq!(req_spec.host, "example.com");
}

#[tokio::test]
async fn response_bytes_are_untouched_even_when_gzipped() {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"{\"ok\":true}").expect("gzip write");
    let gzipped = encoder.finish().expect("gzip finish");

    let mut headers = HeaderMap::new();
    headers.insert("content-type", "application/json".parse().expect("header"));
    headers.insert("content-encoding", "gzip".parse().expect("header"));
    let upstream = Arc::new(StaticUpstream {
        status: StatusCode::OK,
        headers,
        body: Bytes::from(gzipped.clone()),
    });

    let dir = tempfile::tempdir().expect("tempdir");
    let transport =
        RecordingTransport::new(seeded_archive(dir.path()), &thing_endpoints(), upstream, 10);

    let resp = transport
        .round_trip(&get_request("https://example.com/things/123"))
        .await
        .expect("round trip");

    // The caller sees the original encoded bytes; the archive gets the
    // decoded pretty form.
    assert_eq!(resp.body, Bytes::from(gzipped));
    let archive = reopen(dir.path());
    let (_, stored) = archive.read_response("GetThing", "").expect("read stub");
    assert_eq!(stored, b"{\n  \"ok\": true\n}\n");
}

#[tokio::test]
async fn skips_non_get_non_200_non_json_and_unmatched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = RecordingTransport::new(
        seeded_archive(dir.path()),
        &thing_endpoints(),
        json_upstream(StatusCode::OK, b"{\"ok\":true}"),
        10,
    );

    // Unmatched path.
    transport
        .round_trip(&get_request("https://example.com/elsewhere"))
        .await
        .expect("round trip");
    // Non-GET.
    let mut post = get_request("https://example.com/things/123");
    post.method = Method::POST;
    transport.round_trip(&post).await.expect("round trip");
    assert_stub_count(dir.path(), 0);

    // Non-200.
    let transport = RecordingTransport::new(
        seeded_archive(dir.path()),
        &thing_endpoints(),
        json_upstream(StatusCode::NOT_FOUND, b"{\"err\":\"gone\"}"),
        10,
    );
    transport
        .round_trip(&get_request("https://example.com/things/123"))
        .await
        .expect("round trip");
    assert_stub_count(dir.path(), 0);

    // Non-JSON body still reaches the caller unchanged.
    let transport = RecordingTransport::new(
        seeded_archive(dir.path()),
        &thing_endpoints(),
        json_upstream(StatusCode::OK, b"<html>hi</html>"),
        10,
    );
    let resp = transport
        .round_trip(&get_request("https://example.com/things/123"))
        .await
        .expect("round trip");
    assert_eq!(resp.body, Bytes::from_static(b"<html>hi</html>"));
    assert_stub_count(dir.path(), 0);
}

#[tokio::test]
async fn variant_explosion_flips_policy_and_rebuilds_canonical_stub() {
    let dir = tempfile::tempdir().expect("tempdir");
    let transport = RecordingTransport::new(
        seeded_archive(dir.path()),
        &thing_endpoints(),
        json_upstream(StatusCode::OK, b"{\"ok\":true}"),
        1,
    );

    // First distinct variant records normally.
    transport
        .round_trip(&get_request("https://example.com/things/123?a=1"))
        .await
        .expect("round trip");
    let archive = reopen(dir.path());
    let div1 = request_diversifier(
        &archive.policy,
        "GetThing",
        &[("a".to_string(), "1".to_string())],
        &BTreeMap::new(),
    );
    assert!(!div1.is_empty());
    assert!(archive.has_stub("GetThing", &div1).expect("has_stub"));

    // Second distinct variant exceeds maxVariants=1: the policy flips, all
    // stubs are deleted, and this response is deliberately not recorded.
    transport
        .round_trip(&get_request("https://example.com/things/123?a=2"))
        .await
        .expect("round trip");
    let policy: Policy = serde_json::from_slice(
        &fs::read(dir.path().join("vcr.json")).expect("read policy file"),
    )
    .expect("parse policy file");
    assert_eq!(policy.query_variant_enabled("GetThing"), (false, true));
    assert_stub_count(dir.path(), 0);

    // Third request lands the canonical undiversified stub.
    transport
        .round_trip(&get_request("https://example.com/things/123?a=999"))
        .await
        .expect("round trip");
    let archive = reopen(dir.path());
    assert!(archive.has_stub("GetThing", "").expect("has_stub"));
    assert_stub_count(dir.path(), 1);
}

#[tokio::test]
async fn explicit_query_setting_disables_the_heuristic() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join("vcr.json"),
        b"{\"upstream\":\"https://example.com\",\"endpoints\":{\"GetThing\":{\"variant\":{\"query\":true}}}}\n",
    )
    .expect("write policy");
    let archive = Archive::open(dir.path(), PolicyRequirement::Required).expect("open");
    let transport = RecordingTransport::new(
        archive,
        &thing_endpoints(),
        json_upstream(StatusCode::OK, b"{\"ok\":true}"),
        1,
    );

    for query in ["a=1", "a=2", "a=3"] {
        transport
            .round_trip(&get_request(&format!(
                "https://example.com/things/123?{query}"
            )))
            .await
            .expect("round trip");
    }

    // All three variants recorded; nothing flipped.
    assert_stub_count(dir.path(), 3);
    let archive = reopen(dir.path());
    assert_eq!(archive.policy.query_variant_enabled("GetThing"), (true, true));
}

#[tokio::test]
async fn auth_gate_mismatch_skips_persistence_but_answers_the_caller() {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;

    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join("vcr.json"),
        b"{\"upstream\":\"https://example.com\",\"authorization\":{\"claims\":{\"sub\":\"deadbeef\"}}}\n",
    )
    .expect("write policy");
    let archive = Archive::open(dir.path(), PolicyRequirement::Required).expect("open");
    let transport = RecordingTransport::new(
        archive,
        &thing_endpoints(),
        json_upstream(StatusCode::OK, b"{\"ok\":true}"),
        10,
    );

    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none"}"#);
    let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"other"}"#);
    let mut req = get_request("https://example.com/things/123");
    req.headers.insert(
        "authorization",
        format!("Bearer {header}.{payload}.sig")
            .parse()
            .expect("header"),
    );

    let resp = transport.round_trip(&req).await.expect("round trip");
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.body, Bytes::from_static(b"{\"ok\":true}"));
    assert_stub_count(dir.path(), 0);

    // A matching subject records as usual.
    let payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"deadbeef"}"#);
    let mut req = get_request("https://example.com/things/123");
    req.headers.insert(
        "authorization",
        format!("Bearer {header}.{payload}.sig")
            .parse()
            .expect("header"),
    );
    transport.round_trip(&req).await.expect("round trip");
    assert_stub_count(dir.path(), 1);
}

/// Counts stub pairs (HAR files) under the archive root.
fn assert_stub_count(root: &Path, expected: usize) {
    let count = fs::read_dir(root)
        .expect("read dir")
        .filter_map(std::result::Result::ok)
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.ends_with(".vcr.har"))
        })
        .count();
    assert_eq!(count, expected, "unexpected stub count under {root:?}");
}
