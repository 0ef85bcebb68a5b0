//! HTTP exposition of the natasha registry
//!
//! Routes:
//! - `<metrics path>`: text exposition format, gathered on a blocking thread
//! - `/ready`: readiness probe
//! - anything else: `301` to the metrics path

use crate::config::ServerConfig;
use crate::{ExporterError, Result};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE, LOCATION};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{Encoder, Registry, TextEncoder};
use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info, warn};

pub const READY_PATH: &str = "/ready";

pub struct Router {
    metrics_path: String,
    location: HeaderValue,
    registry: Arc<Registry>,
}

impl Router {
    pub fn new(metrics_path: &str, registry: Registry) -> Result<Self> {
        let location = HeaderValue::from_str(metrics_path).map_err(|e| {
            ExporterError::ConfigError(format!("invalid metrics path {:?}: {}", metrics_path, e))
        })?;

        Ok(Self {
            metrics_path: metrics_path.to_string(),
            location,
            registry: Arc::new(registry),
        })
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<Full<Bytes>> {
        let path = req.uri().path();
        debug!("{} {}", req.method(), path);

        if path == self.metrics_path {
            self.metrics().await
        } else if path == READY_PATH {
            text_response(StatusCode::OK, "OK")
        } else {
            let mut response = text_response(StatusCode::MOVED_PERMANENTLY, "");
            response
                .headers_mut()
                .insert(LOCATION, self.location.clone());
            response
        }
    }

    async fn metrics(&self) -> Response<Full<Bytes>> {
        let registry = self.registry.clone();
        let encoder = TextEncoder::new();
        let content_type = encoder.format_type().to_string();

        // Collectors block on the natasha control channel.
        let encoded = tokio::task::spawn_blocking(move || {
            let families = registry.gather();
            let mut buffer = Vec::new();
            encoder.encode(&families, &mut buffer).map(|_| buffer)
        })
        .await;

        match encoded {
            Ok(Ok(buffer)) => {
                let mut response = Response::new(Full::new(Bytes::from(buffer)));
                if let Ok(value) = HeaderValue::from_str(&content_type) {
                    response.headers_mut().insert(CONTENT_TYPE, value);
                }
                response
            }
            Ok(Err(e)) => {
                error!("Failed to encode metrics: {}", e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics")
            }
            Err(e) => {
                error!("Metrics gathering task failed: {}", e);
                text_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to gather metrics")
            }
        }
    }
}

fn text_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(body.as_bytes())));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

/// Binds the configured address and serves until SIGINT or SIGTERM.
pub async fn run(cfg: &ServerConfig, registry: Registry) -> Result<()> {
    let router = Arc::new(Router::new(&cfg.path, registry)?);
    let listener = TcpListener::bind(&cfg.addr).await?;

    info!(
        "Starting metrics server on {} (path {})",
        listener.local_addr()?,
        cfg.path
    );

    serve(listener, router, shutdown_signal()).await;

    info!("Metrics server shut down");
    Ok(())
}

/// Accepts connections on `listener` until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, router: Arc<Router>, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                };

                let router = router.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let router = router.clone();
                        async move { Ok::<_, Infallible>(router.handle(req).await) }
                    });

                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!("Connection from {} ended with error: {}", peer, e);
                    }
                });
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
