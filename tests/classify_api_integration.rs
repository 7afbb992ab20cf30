//! Integration tests for the classification HTTP API.
//!
//! Each test spins up the real router on a random port and talks to it
//! over HTTP with reqwest.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::net::TcpListener;

use mail_router::api::{self, AppState};
use mail_router::classify::{ClassificationGateway, LexicalBackend};
use mail_router::config::DEFAULT_LABELS;

/// Maximum time any request may take before the test counts as hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

async fn start_server() -> String {
    let gateway = ClassificationGateway::new(
        Arc::new(LexicalBackend::new()),
        DEFAULT_LABELS.iter().map(|s| s.to_string()).collect(),
    );
    let app = api::router(AppState {
        gateway: Arc::new(gateway),
        app_name: "AI Email Router API".into(),
    });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    format!("http://{addr}")
}

fn client() -> reqwest::Client {
    reqwest::Client::builder().timeout(TEST_TIMEOUT).build().unwrap()
}

async fn post_classify(base: &str, body: Value) -> (u16, Value) {
    let response = client()
        .post(format!("{base}/api/v1/classify"))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn login_trouble_is_routed_with_full_ranking() {
    let base = start_server().await;
    let text = "I can't log into my account, please help reset my password.";

    let (status, body) = post_classify(&base, json!({ "email_text": text })).await;

    assert_eq!(status, 200);
    assert_eq!(body["sequence"], text);
    let labels = body["labels"].as_array().unwrap();
    let scores = body["scores"].as_array().unwrap();
    assert_eq!(labels.len(), scores.len());
    assert!(["customer support", "billing issue", "complaint"].contains(&labels[0].as_str().unwrap()));

    let scores: Vec<f64> = scores.iter().map(|s| s.as_f64().unwrap()).collect();
    assert!(scores.iter().all(|s| (0.0..=1.0).contains(s)));
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    assert!((scores.iter().sum::<f64>() - 1.0).abs() < 1e-3);
}

#[tokio::test]
async fn whitespace_text_is_rejected() {
    let base = start_server().await;

    let (status, body) = post_classify(&base, json!({ "email_text": "   " })).await;

    assert_eq!(status, 400);
    assert!(!body["detail"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let base = start_server().await;

    let (status, body) = post_classify(&base, json!({ "body": "hello" })).await;
    assert_eq!(status, 400);
    assert!(body["detail"].is_string());

    let response = client()
        .post(format!("{base}/api/v1/classify"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn root_and_health_respond() {
    let base = start_server().await;

    let root: Value = client().get(&base).send().await.unwrap().json().await.unwrap();
    assert_eq!(root, json!({ "message": "AI Email Router API is running." }));

    let health: Value = client()
        .get(format!("{base}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health, json!({ "status": "healthy" }));
}

#[tokio::test]
async fn concurrent_requests_share_the_gateway() {
    let base = start_server().await;

    let requests = (0..8).map(|i| {
        let base = base.clone();
        async move {
            post_classify(&base, json!({ "email_text": format!("Refund my invoice #{i}") })).await
        }
    });
    for (status, body) in futures::future::join_all(requests).await {
        assert_eq!(status, 200);
        assert_eq!(body["labels"][0], "billing issue");
    }
}
