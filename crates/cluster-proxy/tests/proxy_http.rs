//! End-to-end HTTP behaviour: a real proxy in front of real upstreams

mod common;

use std::sync::Arc;

use axum::http::{HeaderValue, StatusCode};
use axum::routing::get;
use axum::Router;
use serde_json::Value;

use cluster_proxy::{ClusterDetails, PermissionEvaluator, StaticPermissionEvaluator};
use common::{
    serve, start_proxy, CountingStrategy, RecordingUpstream, StrategyOutcome, CLUSTER_HEADER,
    OVERRIDE_HEADER,
};

fn allow_all() -> Arc<dyn PermissionEvaluator> {
    Arc::new(StaticPermissionEvaluator::allow_all())
}

async fn json(response: reqwest::Response) -> Value {
    response.json().await.unwrap()
}

#[tokio::test]
async fn zero_clusters_is_not_found_with_or_without_selector() {
    let proxy = start_proxy(
        vec![],
        CountingStrategy::new(StrategyOutcome::Anonymous),
        allow_all(),
    )
    .await;
    let client = reqwest::Client::new();

    for selector in [None, Some("anything")] {
        let mut request = client.get(format!("{}/api/v1/namespaces", proxy));
        if let Some(name) = selector {
            request = request.header(CLUSTER_HEADER, name);
        }
        let response = request.send().await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = json(response).await;
        assert_eq!(body["kind"], "Status");
        assert_eq!(body["code"], 404);
    }
}

#[tokio::test]
async fn selector_required_when_several_clusters_exist() {
    let a = RecordingUpstream::start().await;
    let b = RecordingUpstream::start().await;
    let proxy = start_proxy(
        vec![ClusterDetails::new("a", a.url()), ClusterDetails::new("b", b.url())],
        CountingStrategy::new(StrategyOutcome::Anonymous),
        allow_all(),
    )
    .await;
    let client = reqwest::Client::new();

    let response = client.get(format!("{}/api", proxy)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .get(format!("{}/api", proxy))
        .header(CLUSTER_HEADER, "b")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(a.hits(), 0);
    assert_eq!(b.hits(), 1);
}

#[tokio::test]
async fn single_cluster_selected_without_selector() {
    let upstream = RecordingUpstream::start().await;
    let proxy = start_proxy(
        vec![ClusterDetails::new("only", upstream.url())],
        CountingStrategy::new(StrategyOutcome::Anonymous),
        allow_all(),
    )
    .await;

    let response = reqwest::get(format!("{}/version", proxy)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json(response).await["path"], "/version");
}

#[tokio::test]
async fn unknown_selector_is_not_found_even_with_one_cluster() {
    let upstream = RecordingUpstream::start().await;
    let proxy = start_proxy(
        vec![ClusterDetails::new("only", upstream.url())],
        CountingStrategy::new(StrategyOutcome::Anonymous),
        allow_all(),
    )
    .await;

    let response = reqwest::Client::new()
        .get(format!("{}/api", proxy))
        .header(CLUSTER_HEADER, "missing")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(upstream.hits(), 0);
}

#[tokio::test]
async fn unconventional_status_and_body_pass_through() {
    const BODY: &str = r#"{"items":[],"note":"status 299"}"#;
    let app = Router::new().route(
        "/api/v1/namespaces",
        get(|| async {
            (
                StatusCode::from_u16(299).unwrap(),
                [("content-type", "application/json")],
                BODY,
            )
        }),
    );
    let addr = serve(app).await;
    let proxy = start_proxy(
        vec![ClusterDetails::new("c", format!("http://{}", addr))],
        CountingStrategy::new(StrategyOutcome::Anonymous),
        allow_all(),
    )
    .await;

    let response = reqwest::get(format!("{}/api/v1/namespaces", proxy))
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 299);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(response.text().await.unwrap(), BODY);
}

#[tokio::test]
async fn override_header_is_sent_verbatim_and_skips_strategy() {
    let upstream = RecordingUpstream::start().await;
    let strategy = CountingStrategy::new(StrategyOutcome::Bearer("strategy-token"));
    let proxy = start_proxy(
        vec![ClusterDetails::new("c", upstream.url())],
        strategy.clone(),
        allow_all(),
    )
    .await;

    let response = reqwest::Client::new()
        .get(format!("{}/api", proxy))
        .header(OVERRIDE_HEADER, "Bearer override-token")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let seen = json(response).await;
    assert_eq!(seen["authorization"], "Bearer override-token");
    assert_eq!(strategy.calls(), 0);

    let headers: Vec<String> = serde_json::from_value(seen["headers"].clone()).unwrap();
    assert!(!headers.iter().any(|h| h == "backstage-kubernetes-authorization"));
}

#[tokio::test]
async fn override_with_non_ascii_bytes_is_forwarded_exactly() {
    let upstream = RecordingUpstream::start().await;
    let strategy = CountingStrategy::new(StrategyOutcome::Bearer("strategy-token"));
    let proxy = start_proxy(
        vec![ClusterDetails::new("c", upstream.url())],
        strategy.clone(),
        allow_all(),
    )
    .await;

    let response = reqwest::Client::new()
        .get(format!("{}/api", proxy))
        .header(
            OVERRIDE_HEADER,
            HeaderValue::from_bytes(b"Bearer t\xe9k").unwrap(),
        )
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let seen = json(response).await;
    let sent: Vec<u8> = serde_json::from_value(seen["authorization_bytes"].clone()).unwrap();
    assert_eq!(sent, b"Bearer t\xe9k");
    assert_eq!(strategy.calls(), 0);
}

#[tokio::test]
async fn strategy_credential_is_attached() {
    let upstream = RecordingUpstream::start().await;
    let strategy = CountingStrategy::new(StrategyOutcome::Bearer("T"));
    let proxy = start_proxy(
        vec![ClusterDetails::new("c", upstream.url())],
        strategy.clone(),
        allow_all(),
    )
    .await;

    let response = reqwest::Client::new()
        .get(format!("{}/api", proxy))
        .header("Authorization", "Bearer caller-token")
        .header("Backstage-Kubernetes-Authorization-google", "google-token")
        .send()
        .await
        .unwrap();

    let seen = json(response).await;
    assert_eq!(seen["authorization"], "Bearer T");
    assert_eq!(strategy.calls(), 1);

    let headers: Vec<String> = serde_json::from_value(seen["headers"].clone()).unwrap();
    assert!(!headers.iter().any(|h| h.starts_with("backstage-kubernetes")));
}

#[tokio::test]
async fn anonymous_credential_sends_no_authorization() {
    let upstream = RecordingUpstream::start().await;
    let proxy = start_proxy(
        vec![ClusterDetails::new("c", upstream.url())],
        CountingStrategy::new(StrategyOutcome::Anonymous),
        allow_all(),
    )
    .await;

    let response = reqwest::Client::new()
        .get(format!("{}/api", proxy))
        .header("Authorization", "Bearer caller-token")
        .send()
        .await
        .unwrap();

    assert_eq!(json(response).await["authorization"], Value::Null);
}

#[tokio::test]
async fn host_header_matches_cluster_url() {
    let upstream = RecordingUpstream::start().await;
    let proxy = start_proxy(
        vec![ClusterDetails::new("c", upstream.url())],
        CountingStrategy::new(StrategyOutcome::Anonymous),
        allow_all(),
    )
    .await;

    let response = reqwest::Client::new()
        .get(format!("{}/api", proxy))
        .header("Host", "proxy.example.com")
        .send()
        .await
        .unwrap();

    assert_eq!(json(response).await["host"], upstream.addr.to_string());
}

#[tokio::test]
async fn cluster_sub_path_is_preserved() {
    let upstream = RecordingUpstream::start().await;
    let proxy = start_proxy(
        vec![ClusterDetails::new("c", format!("{}/subpath", upstream.url()))],
        CountingStrategy::new(StrategyOutcome::Anonymous),
        allow_all(),
    )
    .await;

    let response = reqwest::get(format!("{}/api/v1/namespaces?limit=10", proxy))
        .await
        .unwrap();

    let seen = json(response).await;
    assert_eq!(seen["path"], "/subpath/api/v1/namespaces");
    assert_eq!(seen["query"], "limit=10");
}

#[tokio::test]
async fn request_body_reaches_upstream() {
    let upstream = RecordingUpstream::start().await;
    let proxy = start_proxy(
        vec![ClusterDetails::new("c", upstream.url())],
        CountingStrategy::new(StrategyOutcome::Anonymous),
        allow_all(),
    )
    .await;

    let response = reqwest::Client::new()
        .post(format!("{}/api/v1/namespaces", proxy))
        .header("content-type", "application/json")
        .body(r#"{"metadata":{"name":"demo"}}"#)
        .send()
        .await
        .unwrap();

    let seen = json(response).await;
    assert_eq!(seen["method"], "POST");
    assert_eq!(seen["body"], r#"{"metadata":{"name":"demo"}}"#);
}

#[tokio::test]
async fn strategy_failure_is_500_without_upstream_call() {
    let upstream = RecordingUpstream::start().await;
    let proxy = start_proxy(
        vec![ClusterDetails::new("c", upstream.url())],
        CountingStrategy::new(StrategyOutcome::Fail),
        allow_all(),
    )
    .await;

    let response = reqwest::get(format!("{}/api", proxy)).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(upstream.hits(), 0);
}

#[tokio::test]
async fn permission_denied_is_403_without_upstream_call() {
    let upstream = RecordingUpstream::start().await;
    let strategy = CountingStrategy::new(StrategyOutcome::Bearer("T"));
    let proxy = start_proxy(
        vec![ClusterDetails::new("c", upstream.url())],
        strategy.clone(),
        Arc::new(StaticPermissionEvaluator::deny_all()),
    )
    .await;

    let response = reqwest::get(format!("{}/api", proxy)).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(upstream.hits(), 0);
    assert_eq!(strategy.calls(), 0);
}

#[tokio::test]
async fn unreachable_cluster_is_bad_gateway() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let proxy = start_proxy(
        vec![ClusterDetails::new("down", format!("http://{}", addr))],
        CountingStrategy::new(StrategyOutcome::Anonymous),
        allow_all(),
    )
    .await;

    let response = reqwest::get(format!("{}/api", proxy)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}
