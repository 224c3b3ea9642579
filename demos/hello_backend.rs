//! demos/hello_backend.rs
//! Toy upstream for local runs.
//! Run: cargo run --bin hello_backend -- <port> [<port> ...]

use hyper::{
    header::{HeaderValue, CONTENT_TYPE},
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server,
};
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tracing::{debug, error, info};

async fn handle(
    _req: Request<Body>,
    port: u16,
    served: Arc<AtomicU64>,
) -> Result<Response<Body>, Infallible> {
    let n = served.fetch_add(1, Ordering::Relaxed) + 1;
    debug!("Request #{} on port {}", n, port);

    let body = serde_json::to_string(&format!("hello from port {}", port))
        .unwrap_or_default();
    let mut response = Response::new(Body::from(body + "\n"));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

async fn run(port: u16) -> anyhow::Result<()> {
    let served = Arc::new(AtomicU64::new(0));
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    let make_svc = make_service_fn(move |_conn| {
        let served = served.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| handle(req, port, served.clone())))
        }
    });

    info!("Starting backend server on port {}", port);
    Server::try_bind(&addr)?.serve(make_svc).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hello_backend=debug".parse()?),
        )
        .init();

    let mut ports = std::env::args()
        .skip(1)
        .map(|arg| arg.parse::<u16>())
        .collect::<Result<Vec<_>, _>>()?;
    if ports.is_empty() {
        ports = (8081..=8084).collect();
    }

    let servers = ports.into_iter().map(|port| {
        tokio::spawn(async move {
            if let Err(e) = run(port).await {
                error!("Backend on port {} stopped: {}", port, e);
            }
        })
    });
    futures::future::join_all(servers).await;

    Ok(())
}
