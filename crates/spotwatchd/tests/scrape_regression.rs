//! Scrape regression tests.
//!
//! Drives the real metadata client against a local stub of the metadata
//! service and reads the result back through the exporter's own metrics
//! endpoint, covering the full scrape path end to end.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::routing::{get, put};
use chrono::Utc;
use http_body_util::BodyExt;
use tower::ServiceExt;

use spotwatch_collector::{CollectorConfig, TerminationCollector};
use spotwatch_labels::{ClusterAccess, ClusterAuth, fetch_node_labels};
use spotwatch_metadata::MetadataClient;

async fn spawn_stub(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

fn exporter_for(addr: SocketAddr, use_imdsv2: bool, extra_labels: BTreeMap<String, String>) -> Router {
    let client = MetadataClient::new(
        &format!("http://{addr}/latest/meta-data/"),
        &format!("http://{addr}/latest/api/token"),
    )
    .unwrap();
    let collector = Arc::new(TerminationCollector::new(
        client,
        CollectorConfig {
            use_imdsv2,
            extra_labels,
        },
    ));
    spotwatch_api::build_router(collector, "/metrics")
}

async fn scrape(router: Router) -> String {
    let req = Request::builder()
        .uri("/metrics")
        .body(Body::empty())
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(body.to_vec()).unwrap()
}

fn sample_value(text: &str, prefix: &str) -> Option<f64> {
    text.lines()
        .find(|line| line.starts_with(prefix))
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}

async fn stub_instance_id() -> &'static str {
    "i-1234"
}

async fn stub_instance_type() -> &'static str {
    "m5.large"
}

async fn stub_rebalance() -> &'static str {
    "{\"noticeTime\":\"2026-08-08T12:00:00Z\"}"
}

async fn instance_action_in_120s() -> String {
    let time = Utc::now() + chrono::Duration::seconds(120);
    format!(
        "{{\"action\":\"terminate\",\"time\":\"{}\"}}",
        time.to_rfc3339()
    )
}

#[tokio::test]
async fn scrape_reports_termination_notice() {
    let stub = Router::new()
        .route("/latest/meta-data/instance-id", get(stub_instance_id))
        .route("/latest/meta-data/instance-type", get(stub_instance_type))
        .route(
            "/latest/meta-data/spot/instance-action",
            get(instance_action_in_120s),
        )
        .route(
            "/latest/meta-data/events/recommendations/rebalance",
            get(stub_rebalance),
        );
    let addr = spawn_stub(stub).await;

    let text = scrape(exporter_for(addr, false, BTreeMap::new())).await;

    assert_eq!(
        sample_value(&text, "aws_instance_metadata_service_available{instance_id=\"i-1234\"}"),
        Some(1.0)
    );
    assert_eq!(
        sample_value(
            &text,
            "aws_instance_termination_imminent{instance_action=\"terminate\",instance_id=\"i-1234\",instance_type=\"m5.large\"}"
        ),
        Some(1.0)
    );

    let eta = sample_value(&text, "aws_instance_termination_in{").unwrap();
    assert!((eta - 120.0).abs() < 5.0, "eta was {eta}");

    assert_eq!(
        sample_value(
            &text,
            "aws_instance_metadata_service_events_available{instance_id=\"i-1234\"}"
        ),
        Some(1.0)
    );
    assert_eq!(
        sample_value(
            &text,
            "aws_instance_rebalance_recommended{instance_id=\"i-1234\",instance_type=\"m5.large\"}"
        ),
        Some(1.0)
    );
}

#[tokio::test]
async fn scrape_degrades_when_optional_endpoints_missing() {
    // Only the identity endpoints exist; everything else 404s.
    let stub = Router::new()
        .route("/latest/meta-data/instance-id", get(stub_instance_id))
        .route("/latest/meta-data/instance-type", get(stub_instance_type));
    let addr = spawn_stub(stub).await;

    let text = scrape(exporter_for(addr, false, BTreeMap::new())).await;

    assert_eq!(
        sample_value(&text, "aws_instance_metadata_service_available{instance_id=\"i-1234\"}"),
        Some(1.0)
    );
    assert_eq!(
        sample_value(
            &text,
            "aws_instance_termination_imminent{instance_action=\"\",instance_id=\"i-1234\",instance_type=\"m5.large\"}"
        ),
        Some(0.0)
    );
    assert!(sample_value(&text, "aws_instance_termination_in{").is_none());
    assert_eq!(
        sample_value(
            &text,
            "aws_instance_rebalance_recommended{instance_id=\"i-1234\",instance_type=\"m5.large\"}"
        ),
        Some(0.0)
    );
}

/// Stub that hides the metadata behind an IMDSv2 session token.
fn tokened_stub() -> Router {
    async fn token(headers: HeaderMap) -> Result<String, StatusCode> {
        if headers.get("x-aws-ec2-metadata-token-ttl-seconds").is_none() {
            return Err(StatusCode::BAD_REQUEST);
        }
        Ok("stub-token".to_string())
    }

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("x-aws-ec2-metadata-token")
            .and_then(|v| v.to_str().ok())
            == Some("stub-token")
    }

    async fn instance_id(headers: HeaderMap) -> Result<String, StatusCode> {
        if !authorized(&headers) {
            return Err(StatusCode::NOT_FOUND);
        }
        Ok("i-1234".to_string())
    }

    async fn instance_type(headers: HeaderMap) -> Result<String, StatusCode> {
        if !authorized(&headers) {
            return Err(StatusCode::NOT_FOUND);
        }
        Ok("m5.large".to_string())
    }

    Router::new()
        .route("/latest/api/token", put(token))
        .route("/latest/meta-data/instance-id", get(instance_id))
        .route("/latest/meta-data/instance-type", get(instance_type))
}

#[tokio::test]
async fn imdsv2_scrape_negotiates_and_attaches_the_token() {
    let addr = spawn_stub(tokened_stub()).await;

    let text = scrape(exporter_for(addr, true, BTreeMap::new())).await;
    assert_eq!(
        sample_value(&text, "aws_instance_metadata_service_available{instance_id=\"i-1234\"}"),
        Some(1.0)
    );
}

#[tokio::test]
async fn tokenless_scrape_against_imdsv2_service_emits_nothing() {
    let addr = spawn_stub(tokened_stub()).await;

    // Without the token the identity lookup 404s, aborting the scrape.
    let text = scrape(exporter_for(addr, false, BTreeMap::new())).await;
    for line in text.lines() {
        assert!(line.starts_with('#'), "unexpected sample: {line}");
    }
}

#[tokio::test]
async fn node_labels_attach_to_exported_gauges() {
    async fn node(headers: HeaderMap) -> Result<String, StatusCode> {
        if headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            != Some("Bearer node-reader")
        {
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(
            "{\"metadata\":{\"name\":\"worker-1\",\"labels\":{\"topology.kubernetes.io/zone\":\"eu-west-1a\"}}}"
                .to_string(),
        )
    }

    let cluster_stub = Router::new().route("/api/v1/nodes/worker-1", get(node));
    let cluster_addr = spawn_stub(cluster_stub).await;

    let access = ClusterAccess {
        server: format!("http://{cluster_addr}"),
        ca_pem: None,
        auth: ClusterAuth::Token("node-reader".to_string()),
    };
    let labels = fetch_node_labels(&access, "worker-1").await.unwrap();
    assert_eq!(
        labels.get("topology_kubernetes_io_zone").map(String::as_str),
        Some("eu-west-1a")
    );

    let imds_stub = Router::new()
        .route("/latest/meta-data/instance-id", get(stub_instance_id))
        .route("/latest/meta-data/instance-type", get(stub_instance_type));
    let imds_addr = spawn_stub(imds_stub).await;

    let text = scrape(exporter_for(imds_addr, false, labels)).await;
    assert_eq!(
        sample_value(
            &text,
            "aws_instance_metadata_service_available{instance_id=\"i-1234\",topology_kubernetes_io_zone=\"eu-west-1a\"}"
        ),
        Some(1.0)
    );
}
