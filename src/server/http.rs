//! HTTP/1.1 transport for the RPC service.
//!
//! `POST /rpc` carries one JSON-RPC request per body. `GET /health` answers
//! without touching the host.

use super::RpcService;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Accept connections until `cancel` fires. One task per connection.
pub async fn serve(listener: TcpListener, service: RpcService, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("RPC server shutting down");
                break;
            }
            res = listener.accept() => {
                let (stream, remote) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        continue;
                    }
                };
                debug!(remote = %remote, "RPC connection");
                let service = service.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let conn = http1::Builder::new().serve_connection(
                        io,
                        service_fn(move |req| {
                            let service = service.clone();
                            async move { Ok::<_, Infallible>(route(&service, req).await) }
                        }),
                    );
                    if let Err(err) = conn.await {
                        debug!(error = %err, "RPC connection closed with error");
                    }
                });
            }
        }
    }
}

async fn route(service: &RpcService, req: Request<Incoming>) -> Response<Full<Bytes>> {
    match (req.method(), req.uri().path()) {
        (&Method::POST, "/rpc") => {
            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!(error = %e, "Failed to read request body");
                    return empty(StatusCode::BAD_REQUEST);
                }
            };
            let response = service.handle_body(&body).await;
            json_response(&response)
        }
        (&Method::GET, "/health") => json_response(&json!({
            "status": "ok",
            "content_hash": service.identity().content_hash,
            "port": service.identity().rpc_port,
        })),
        (_, "/rpc") | (_, "/health") => empty(StatusCode::METHOD_NOT_ALLOWED),
        _ => empty(StatusCode::NOT_FOUND),
    }
}

fn json_response<T: Serialize>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(Full::new(Bytes::from(body)));
            response.headers_mut().insert(
                CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(e) => {
            warn!(error = %e, "Failed to encode response");
            empty(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn empty(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
