//! Shared helpers for the integration tests.

#![allow(dead_code)]

use failover_lb::config::{BackendConfig, RetryConfig, ServerConfig};
use failover_lb::load_balancer::Balancer;
use failover_lb::proxy::{BackendPool, HttpForwarder};
use failover_lb::retry::RetryStrategy;
use failover_lb::server::RequestHandler;
use hyper::{Body, Request, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;

pub fn fast_retries() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        backoff_ms: 1,
        max_failover_attempts: 3,
    }
}

pub fn balancer(urls: &[String]) -> Arc<Balancer> {
    Arc::new(build_balancer(urls))
}

pub fn balancer_with_body_limit(urls: &[String], limit: usize) -> Arc<Balancer> {
    Arc::new(build_balancer(urls).with_max_body_bytes(limit))
}

fn build_balancer(urls: &[String]) -> Balancer {
    let configs: Vec<BackendConfig> = urls
        .iter()
        .map(|u| BackendConfig {
            url: Url::parse(u).expect("backend url"),
        })
        .collect();
    let forwarder = Arc::new(HttpForwarder::new(Duration::from_secs(5)));
    let pool = Arc::new(
        BackendPool::new(&configs, forwarder, Duration::from_millis(500)).expect("pool"),
    );
    Balancer::new(pool, RetryStrategy::new(&fast_retries()), None)
}

pub fn handler(balancer: Arc<Balancer>) -> RequestHandler {
    RequestHandler::new(balancer, &ServerConfig::default())
}

/// Address on which nothing is listening.
pub async fn dead_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    format!("http://{}", listener.local_addr().unwrap())
}

pub fn get(path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("host", "balancer.test")
        .body(Body::empty())
        .unwrap()
}

pub fn post(path: &str, body: Body) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("host", "balancer.test")
        .body(body)
        .unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
