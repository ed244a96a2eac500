//! HTTP front end for the metrics exporter: hyper http1 on tokio.
//!
//! Routes:
//! - `GET|HEAD <telemetry path>`: exposition text
//! - `GET|HEAD /`: landing page linking to the telemetry path
//! - any other path: 404; any other method on a known path: 405

#![allow(missing_docs)]

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::header::{ALLOW, CONTENT_TYPE, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::core::errors::{DclError, Result};
use crate::exporter::metrics::MetricsExporter;

static NOT_FOUND: &[u8] = b"Not found";
static METHOD_NOT_ALLOWED: &[u8] = b"Method not allowed";
static SCRAPE_FAILED: &[u8] = b"Failed to encode metrics";
const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

pub type ResponseBody = BoxBody<Bytes, std::io::Error>;

/// Server settings taken from the exporter config section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub telemetry_path: String,
    /// Upper bound on one connection's lifetime.
    pub timeout: Duration,
}

/// Bind the metrics listener. Called before any thread is spawned so a busy
/// port fails startup.
pub fn bind(addr: SocketAddr) -> Result<std::net::TcpListener> {
    let listener =
        std::net::TcpListener::bind(addr).map_err(|source| DclError::Bind { addr, source })?;
    listener
        .set_nonblocking(true)
        .map_err(|source| DclError::Bind { addr, source })?;
    Ok(listener)
}

/// Request router. Holds no lock; every scrape copies state through
/// [`MetricsExporter::render`].
#[derive(Debug)]
pub struct Routes {
    exporter: MetricsExporter,
    telemetry_path: String,
    landing_page: Bytes,
}

impl Routes {
    #[must_use]
    pub fn new(exporter: MetricsExporter, telemetry_path: &str) -> Self {
        Self {
            exporter,
            telemetry_path: telemetry_path.to_string(),
            landing_page: Bytes::from(landing_page(telemetry_path)),
        }
    }

    #[must_use]
    pub fn handle<B>(&self, req: &Request<B>) -> Response<ResponseBody> {
        let path = req.uri().path();
        let readable = matches!(*req.method(), Method::GET | Method::HEAD);
        if path == self.telemetry_path {
            if !readable {
                return method_not_allowed();
            }
            self.scrape()
        } else if path == "/" {
            if !readable {
                return method_not_allowed();
            }
            respond(
                StatusCode::OK,
                HeaderValue::from_static("text/html; charset=utf-8"),
                self.landing_page.clone(),
            )
        } else {
            tracing::debug!(method = %req.method(), path, "request to unknown endpoint");
            respond(
                StatusCode::NOT_FOUND,
                HeaderValue::from_static(TEXT_PLAIN),
                Bytes::from_static(NOT_FOUND),
            )
        }
    }

    fn scrape(&self) -> Response<ResponseBody> {
        let rendered = self.exporter.render().and_then(|body| {
            let content_type = HeaderValue::from_str(self.exporter.content_type())
                .map_err(|e| DclError::Serialization {
                    context: "metrics content type",
                    details: e.to_string(),
                })?;
            Ok((content_type, body))
        });
        match rendered {
            Ok((content_type, body)) => respond(StatusCode::OK, content_type, Bytes::from(body)),
            Err(error) => {
                tracing::error!(code = error.code(), %error, "metrics scrape failed");
                respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    HeaderValue::from_static(TEXT_PLAIN),
                    Bytes::from_static(SCRAPE_FAILED),
                )
            }
        }
    }
}

/// Serve scrapes until `shutdown` resolves.
pub async fn serve<F>(
    listener: std::net::TcpListener,
    exporter: MetricsExporter,
    config: ServerConfig,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()>,
{
    let listener = TcpListener::from_std(listener).map_err(|source| DclError::Runtime {
        details: format!("failed to register metrics listener: {source}"),
    })?;
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, path = %config.telemetry_path, "metrics exporter listening");
    }

    let routes = Arc::new(Routes::new(exporter, &config.telemetry_path));
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        tracing::warn!(%error, "failed to accept metrics connection");
                        continue;
                    }
                };
                let routes = Arc::clone(&routes);
                let timeout = config.timeout;
                tokio::task::spawn(async move {
                    let service = service_fn(move |req| {
                        let response = routes.handle(&req);
                        async move { Ok::<_, Infallible>(response) }
                    });
                    let connection = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service);
                    match tokio::time::timeout(timeout, connection).await {
                        Ok(Ok(())) => {}
                        Ok(Err(error)) => tracing::debug!(%peer, %error, "metrics connection error"),
                        Err(_) => tracing::debug!(%peer, "metrics connection timed out"),
                    }
                });
            }
            () = &mut shutdown => {
                tracing::info!("metrics exporter stopped");
                return Ok(());
            }
        }
    }
}

fn landing_page(telemetry_path: &str) -> String {
    format!(
        "<html>\n\
         <head><title>Docker cleaner Exporter</title></head>\n\
         <body>\n\
         <h1>Docker cleaner Exporter</h1>\n\
         <p><a href='{telemetry_path}'>Metrics</a></p>\n\
         </body>\n\
         </html>\n"
    )
}

fn respond(status: StatusCode, content_type: HeaderValue, body: Bytes) -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(body).map_err(|e| match e {}).boxed());
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, content_type);
    response
}

fn method_not_allowed() -> Response<ResponseBody> {
    let mut response = respond(
        StatusCode::METHOD_NOT_ALLOWED,
        HeaderValue::from_static(TEXT_PLAIN),
        Bytes::from_static(METHOD_NOT_ALLOWED),
    );
    response
        .headers_mut()
        .insert(ALLOW, HeaderValue::from_static("GET, HEAD"));
    response
}
