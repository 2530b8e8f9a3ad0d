//! API domain against a loopback server.

use cairn_domains::testing::{spawn, Route};
use cairn_domains::{ApiDomain, ApiSpec};
use cairn_model::{CancellationToken, CollectionError, Domain};
use serde_json::json;

fn domain(yaml: &str) -> ApiDomain {
    let spec: ApiSpec = serde_yaml::from_str(yaml).unwrap();
    ApiDomain::new(spec).unwrap()
}

#[tokio::test]
async fn test_results_keyed_by_request_name() {
    let server = spawn(vec![
        Route::json("/healthz", 200, json!({"healthy": true})),
        Route::json("/version", 200, json!({"major": "1", "minor": "29"})),
    ])
    .await;

    let d = domain(&format!(
        "requests:\n  - name: health\n    url: {}\n  - name: version\n    url: {}\n",
        server.url("/healthz"),
        server.url("/version")
    ));
    let res = d.get_resources(&CancellationToken::new()).await.unwrap();

    assert_eq!(res["health"], json!({"status": 200, "response": {"healthy": true}}));
    assert_eq!(res["version"]["response"]["minor"], "29");
}

#[tokio::test]
async fn test_parameters_headers_and_body_are_sent() {
    let server = spawn(vec![Route::json("/search", 200, json!([]))]).await;
    let d = domain(&format!(
        r#"
options:
  headers:
    Authorization: Bearer t0ken
requests:
  - name: search
    url: {}
    method: POST
    body: '{{"q": "pods"}}'
    parameters:
      limit: "10"
"#,
        server.url("/search")
    ));
    assert!(d.is_executable());
    d.get_resources(&CancellationToken::new()).await.unwrap();

    let seen = server.seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].method, "POST");
    assert_eq!(seen[0].target, "/search?limit=10");
    assert_eq!(seen[0].header("authorization"), Some("Bearer t0ken"));
    assert_eq!(seen[0].header("content-type"), Some("application/json"));
    assert_eq!(seen[0].body, r#"{"q": "pods"}"#);
}

#[tokio::test]
async fn test_non_success_status_aborts_collection() {
    let server = spawn(vec![
        Route::json("/ok", 200, json!({})),
        Route::json("/broken", 503, json!({"error": "down"})),
    ])
    .await;
    let d = domain(&format!(
        "requests:\n  - name: ok\n    url: {}\n  - name: broken\n    url: {}\n",
        server.url("/ok"),
        server.url("/broken")
    ));
    let err = d.get_resources(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, CollectionError::HttpStatus { status: 503, .. }));
}

#[tokio::test]
async fn test_undecodable_body_aborts_collection() {
    let server = spawn(vec![Route::raw("/html", 200, "<html>nope</html>")]).await;
    let d = domain(&format!(
        "requests:\n  - name: page\n    url: {}\n",
        server.url("/html")
    ));
    let err = d.get_resources(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, CollectionError::Decode { .. }));
}
