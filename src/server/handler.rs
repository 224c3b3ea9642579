// src/server/handler.rs
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, StatusCode};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::Service;

use crate::config::ServerConfig;
use crate::load_balancer::{text_response, Balancer};
use crate::server::builder::PerConnection;

#[derive(Debug)]
struct Routes {
    balanced: String,
    status: Option<String>,
}

/// Routes inbound requests: the balanced path goes to the dispatcher,
/// the status path reports the pool, everything else is a 404.
#[derive(Clone)]
pub struct RequestHandler {
    balancer: Arc<Balancer>,
    routes: Arc<Routes>,
    peer: Option<SocketAddr>,
}

impl RequestHandler {
    pub fn new(balancer: Arc<Balancer>, config: &ServerConfig) -> Self {
        Self {
            balancer,
            routes: Arc::new(Routes {
                balanced: config.route.clone(),
                status: config.status_path.clone(),
            }),
            peer: None,
        }
    }

    async fn route(
        balancer: Arc<Balancer>,
        routes: Arc<Routes>,
        peer: Option<SocketAddr>,
        req: Request<Body>,
    ) -> Response<Body> {
        let path = req.uri().path();

        if path == routes.balanced {
            return balancer.handle(req, peer).await;
        }
        if routes.status.as_deref() == Some(path) {
            return status_response(&balancer).await;
        }

        text_response(StatusCode::NOT_FOUND, "Not Found")
    }
}

impl PerConnection for RequestHandler {
    fn for_connection(&self, peer: SocketAddr) -> Self {
        Self {
            peer: Some(peer),
            ..self.clone()
        }
    }
}

impl Service<Request<Body>> for RequestHandler {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let balancer = self.balancer.clone();
        let routes = self.routes.clone();
        let peer = self.peer;
        Box::pin(async move { Ok(Self::route(balancer, routes, peer, req).await) })
    }
}

async fn status_response(balancer: &Balancer) -> Response<Body> {
    let pool = balancer.pool();
    let backends = pool.snapshot().await;
    let alive = backends.iter().filter(|b| b.alive).count();

    let payload = json!({
        "alive": alive,
        "total": backends.len(),
        "backends": backends,
    });

    match serde_json::to_vec(&payload) {
        Ok(body) => {
            let mut response = Response::new(Body::from(body));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            tracing::error!("Failed to encode pool status: {}", e);
            text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}
