//! HTTP surface of the exporter
//!
//! Serves the scrape endpoint, a small HTML landing page and an empty
//! favicon. Every request is logged once at info level in Common Log Format.

use std::{
    future::Future,
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use http::{HeaderValue, Method, Request, Response, StatusCode, Uri, Version, header};
use http_body_util::combinators::BoxBody;
use hyper::{
    body::{Body, Incoming},
    service::service_fn,
};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::{conn::auto, graceful::GracefulShutdown},
};
use time::{OffsetDateTime, macros::format_description};
use tokio::{net::TcpListener, pin};
use tracing::{debug, error, info, warn};

use crate::collector::Exporter;

/// Time in-flight connections get to finish once shutdown is signalled.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(thiserror::Error, Debug)]
/// Errors produced by [`run`] and [`serve`]
pub enum Error {
    /// Wrapper for [`std::io::Error`].
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Routes requests to the exporter or the static pages.
#[derive(Debug, Clone)]
struct Handler {
    exporter: Arc<Exporter>,
    metrics_path: Arc<str>,
}

impl Handler {
    async fn respond(&self, method: &Method, uri: &Uri) -> Response<BoxBody<Bytes, hyper::Error>> {
        let path = uri.path();
        if path == &*self.metrics_path {
            let body = self.exporter.collect().await;
            return response(StatusCode::OK, METRICS_CONTENT_TYPE, body);
        }
        if path == "/favicon.ico" {
            let mut response = Response::new(crate::full(Bytes::new()));
            *response.status_mut() = StatusCode::NO_CONTENT;
            return response;
        }

        debug!("landing page requested, method={method} path={path}");
        let page = format!(
            "<html><head><title>Monit Exporter</title></head><body><h1>Monit Exporter</h1><p><a href=\"{path}\">Metrics</a></p></body></html>",
            path = self.metrics_path
        );
        response(StatusCode::OK, "text/html; charset=utf-8", page)
    }

    async fn handle(
        &self,
        request: &Request<Incoming>,
        peer: SocketAddr,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, hyper::Error> {
        let start = Instant::now();
        let received = OffsetDateTime::now_utc();
        let method = request.method().clone();
        let uri = request.uri().clone();
        let version = request.version();
        let referer = header_text(request, header::REFERER);
        let user_agent = header_text(request, header::USER_AGENT);

        let response = self.respond(&method, &uri).await;

        let size = response.body().size_hint().exact().unwrap_or(0);
        info!(
            "{peer} - - [{timestamp}] \"{method} {uri} {version}\" {status} {size} \"{referer}\" \"{user_agent}\" {elapsed:.6}",
            timestamp = log_timestamp(received),
            version = protocol(version),
            status = response.status().as_u16(),
            elapsed = start.elapsed().as_secs_f64(),
        );
        Ok(response)
    }
}

fn response<T: Into<Bytes>>(
    status: StatusCode,
    content_type: &'static str,
    body: T,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let mut response = Response::new(crate::full(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn header_text(request: &Request<Incoming>, name: header::HeaderName) -> String {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-")
        .to_string()
}

/// Format `at` the way Common Log Format expects, e.g. `05/Mar/2024:14:07:09 +0000`.
fn log_timestamp(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[day]/[month repr:short]/[year]:[hour]:[minute]:[second] [offset_hour sign:mandatory][offset_minute]"
    ))
    .unwrap_or_else(|_| "-".to_string())
}

fn protocol(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

/// Bind `listen_address` and serve until `shutdown` resolves.
///
/// Host names in `listen_address` are resolved, the first address that binds
/// is used.
///
/// # Errors
///
/// Returns [`Error::Io`] if the listener cannot be bound.
pub async fn run<F>(
    listen_address: &str,
    metrics_path: &str,
    exporter: Arc<Exporter>,
    shutdown: F,
) -> Result<(), Error>
where
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(listen_address).await.map_err(|err| {
        error!("failed to bind {listen_address}: {err}");
        Error::Io(err)
    })?;
    info!(
        "Monit exporter listening on {addr}, metrics at {metrics_path}",
        addr = listener.local_addr()?
    );
    serve(listener, metrics_path, exporter, shutdown).await;
    Ok(())
}

/// Serve connections accepted on `listener` until `shutdown` resolves.
///
/// Once `shutdown` resolves no new connections are accepted. Connections
/// already open get [`SHUTDOWN_GRACE`] to finish before they are abandoned.
pub async fn serve<F>(listener: TcpListener, metrics_path: &str, exporter: Arc<Exporter>, shutdown: F)
where
    F: Future<Output = ()>,
{
    let handler = Handler {
        exporter,
        metrics_path: Arc::from(metrics_path),
    };
    let builder = auto::Builder::new(TokioExecutor::new());
    let graceful = GracefulShutdown::new();

    pin!(shutdown);
    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("Shutdown signal received, stopping accept loop.");
                break;
            }

            incoming = listener.accept() => {
                let (stream, peer) = match incoming {
                    Ok(sa) => sa,
                    Err(e) => {
                        error!("Error accepting connection: {e}");
                        continue;
                    }
                };
                debug!("Accepted connection from {peer}");

                let handler = handler.clone();
                let service = service_fn(move |request| {
                    let handler = handler.clone();
                    async move { handler.handle(&request, peer).await }
                });
                let connection = builder
                    .serve_connection_with_upgrades(TokioIo::new(stream), service)
                    .into_owned();
                let connection = graceful.watch(connection);

                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        error!("Error serving {peer}: {e}");
                    }
                });
            }
        }
    }

    drop(listener);
    tokio::select! {
        () = graceful.shutdown() => {
            info!("All connections closed, HTTP server stopped.");
        }
        () = tokio::time::sleep(SHUTDOWN_GRACE) => {
            warn!("Connections still open after {SHUTDOWN_GRACE:?}, stopping anyway.");
        }
    }
}
