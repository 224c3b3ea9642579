// tests/load_balancer_tests.rs
//
// End-to-end behaviour of the balancer against real sockets: mockito
// upstreams for live backends, closed ports for dead ones.

mod common;

use common::*;
use failover_lb::config::{HealthCheckConfig, ServerConfig};
use failover_lb::health::HealthChecker;
use failover_lb::load_balancer::UNAVAILABLE_BODY;
use failover_lb::server::{RequestHandler, ServerBuilder};
use hyper::header::CONTENT_LENGTH;
use hyper::{Body, StatusCode};
use std::time::Duration;
use tower::ServiceExt;

#[tokio::test]
async fn forwards_upstream_response_and_rewrites_host() {
    let mut upstream = mockito::Server::new_async().await;
    let mock = upstream
        .mock("GET", "/hello")
        .match_header("host", upstream.host_with_port().as_str())
        .with_status(200)
        .with_body("\"hello from port 8081\"")
        .create_async()
        .await;

    let handler = handler(balancer(&[upstream.url()]));
    let response = handler.oneshot(get("/hello")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "\"hello from port 8081\"");
    mock.assert_async().await;
}

#[tokio::test]
async fn round_robin_alternates_between_live_backends() {
    let mut first = mockito::Server::new_async().await;
    let mut second = mockito::Server::new_async().await;
    let a = first
        .mock("GET", "/hello")
        .with_body("first")
        .expect(2)
        .create_async()
        .await;
    let b = second
        .mock("GET", "/hello")
        .with_body("second")
        .expect(2)
        .create_async()
        .await;

    let handler = handler(balancer(&[first.url(), second.url()]));
    let mut bodies = Vec::new();
    for _ in 0..4 {
        let response = handler.clone().oneshot(get("/hello")).await.unwrap();
        bodies.push(body_string(response).await);
    }

    assert_eq!(bodies, vec!["second", "first", "second", "first"]);
    a.assert_async().await;
    b.assert_async().await;
}

#[tokio::test]
async fn fails_over_from_unreachable_backend() {
    let mut upstream = mockito::Server::new_async().await;
    let mock = upstream
        .mock("GET", "/hello")
        .with_body("survivor")
        .expect(1)
        .create_async()
        .await;

    // the fresh cursor picks index 1 first
    let balancer = balancer(&[upstream.url(), dead_url().await]);
    let response = handler(balancer.clone())
        .oneshot(get("/hello"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "survivor");
    assert!(!balancer.pool().backends()[1].is_alive().await);
    assert_eq!(balancer.pool().alive_count().await, 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn upstream_error_status_is_not_a_transport_failure() {
    let mut upstream = mockito::Server::new_async().await;
    let mock = upstream
        .mock("GET", "/hello")
        .with_status(500)
        .with_body("boom")
        .expect(1)
        .create_async()
        .await;

    let balancer = balancer(&[upstream.url()]);
    let response = handler(balancer.clone())
        .oneshot(get("/hello"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await, "boom");
    assert!(balancer.pool().backends()[0].is_alive().await);
    mock.assert_async().await;
}

#[tokio::test]
async fn all_backends_down_returns_single_503() {
    let balancer = balancer(&[dead_url().await, dead_url().await]);

    let response = handler(balancer.clone())
        .oneshot(get("/hello"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_string(response).await, UNAVAILABLE_BODY);
    assert_eq!(balancer.pool().alive_count().await, 0);

    // no live peer left: rejected without touching the network
    let response = handler(balancer).oneshot(get("/hello")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_string(response).await, UNAVAILABLE_BODY);
}

#[tokio::test]
async fn health_check_brings_dead_backend_back() {
    let mut upstream = mockito::Server::new_async().await;
    let _mock = upstream
        .mock("GET", "/hello")
        .with_body("back again")
        .create_async()
        .await;

    let balancer = balancer(&[upstream.url()]);
    let backend = balancer.pool().backends()[0].clone();
    backend.set_alive(false).await;

    let response = handler(balancer.clone())
        .oneshot(get("/hello"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let checker = HealthChecker::new(
        HealthCheckConfig {
            interval_secs: 20,
            timeout_secs: 1,
            simulated_failure_rate: 0.0,
        },
        balancer.pool().clone(),
        None,
    );
    let report = checker.check_all().await;
    assert_eq!(report.alive, 1);

    let response = handler(balancer).oneshot(get("/hello")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "back again");
}

#[tokio::test]
async fn status_endpoint_reports_pool() {
    let balancer = balancer(&["http://127.0.0.1:1".to_string(), dead_url().await]);
    balancer.pool().backends()[0].set_alive(false).await;

    let response = handler(balancer).oneshot(get("/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status: serde_json::Value =
        serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(status["total"], 2);
    assert_eq!(status["alive"], 1);
    assert_eq!(status["backends"][0]["id"], "127.0.0.1:1");
    assert_eq!(status["backends"][0]["alive"], false);
}

#[tokio::test]
async fn unknown_path_is_not_balanced() {
    let balancer = balancer(&[dead_url().await]);

    let response = handler(balancer.clone())
        .oneshot(get("/elsewhere"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(balancer.pool().backends()[0].is_alive().await);
}

#[tokio::test]
async fn oversized_content_length_gets_413_without_forwarding() {
    let mut upstream = mockito::Server::new_async().await;
    let mock = upstream
        .mock("POST", "/hello")
        .expect(0)
        .create_async()
        .await;

    let balancer = balancer(&[upstream.url()]);
    let mut req = post("/hello", Body::empty());
    req.headers_mut()
        .insert(CONTENT_LENGTH, (64 * 1024 * 1024).to_string().parse().unwrap());

    let response = handler(balancer.clone()).oneshot(req).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(balancer.pool().backends()[0].is_alive().await);
    mock.assert_async().await;
}

#[tokio::test]
async fn chunked_body_past_limit_gets_413() {
    let mut upstream = mockito::Server::new_async().await;
    let mock = upstream
        .mock("POST", "/hello")
        .expect(0)
        .create_async()
        .await;

    let chunks = (0..64).map(|_| Ok::<_, std::io::Error>(vec![b'x'; 1024]));
    let body = Body::wrap_stream(futures::stream::iter(chunks));
    let balancer = balancer_with_body_limit(&[upstream.url()], 4096);

    let response = handler(balancer).oneshot(post("/hello", body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    mock.assert_async().await;
}

#[tokio::test]
async fn body_within_limit_is_forwarded() {
    let payload = "x".repeat(4096);
    let mut upstream = mockito::Server::new_async().await;
    let mock = upstream
        .mock("POST", "/hello")
        .match_body(payload.as_str())
        .with_body("accepted")
        .expect(1)
        .create_async()
        .await;

    let balancer = balancer_with_body_limit(&[upstream.url()], 4096);
    let response = handler(balancer)
        .oneshot(post("/hello", Body::from(payload.clone())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "accepted");
    mock.assert_async().await;
}

#[tokio::test]
async fn server_serves_until_shutdown() {
    let mut upstream = mockito::Server::new_async().await;
    let _mock = upstream
        .mock("GET", "/hello")
        .with_body("over the wire")
        .create_async()
        .await;

    let listen = {
        let spare = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        spare.local_addr().unwrap()
    };
    let config = ServerConfig {
        listen_addr: listen,
        ..ServerConfig::default()
    };
    let handler = RequestHandler::new(balancer(&[upstream.url()]), &config);

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(
        ServerBuilder::new(listen)
            .with_handler(handler)
            .serve_with_shutdown(async {
                let _ = stop_rx.await;
            }),
    );

    let client = hyper::Client::new();
    let uri: hyper::Uri = format!("http://{}/hello", listen).parse().unwrap();
    let mut response = None;
    for _ in 0..50 {
        match client.get(uri.clone()).await {
            Ok(r) => {
                response = Some(r);
                break;
            }
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    let response = response.expect("server did not come up");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "over the wire");

    stop_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}
