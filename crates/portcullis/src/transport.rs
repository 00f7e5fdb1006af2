//! hyper HTTP/1 adapter around [`HttpRouter::dispatch`].

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;

use crate::dispatcher::HttpRouter;
use crate::request::{BoxError, RawBody, RawRequest};
use crate::response::SerializedResponse;
use crate::transaction::OneshotSink;

/// Accept connections until `shutdown` resolves or the router's fatal signal is raised.
pub async fn serve<S>(listener: TcpListener, router: HttpRouter, shutdown: S) -> std::io::Result<()>
where
    S: Future<Output = ()>,
{
    let fatal = router.fatal_signal().clone();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                portcullis_telemetry::log_shutdown!(reason = "requested", "no longer accepting connections");
                break;
            }
            reason = fatal.raised() => {
                portcullis_telemetry::log_shutdown!(reason = %reason, "fatal error, no longer accepting connections");
                break;
            }
            accepted = listener.accept() => {
                let (stream, remote_addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        portcullis_telemetry::log_transport_error!(error = %e, "accept failed");
                        continue;
                    }
                };

                let router = router.clone();
                let io = TokioIo::new(stream);

                tokio::spawn(async move {
                    let service = service_fn(move |req| {
                        let router = router.clone();
                        async move { Ok::<_, Infallible>(handle(router, req, remote_addr).await) }
                    });

                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        portcullis_telemetry::log_transport_error!(
                            error = %e,
                            remote_addr = %remote_addr,
                            "connection error"
                        );
                    }
                });
            }
        }
    }

    Ok(())
}

async fn handle(
    router: HttpRouter,
    req: hyper::Request<Incoming>,
    remote_addr: SocketAddr,
) -> hyper::Response<Full<Bytes>> {
    let request = into_raw_request(req, Some(remote_addr));
    let fatal = router.fatal_signal().clone();
    let (sink, receiver) = OneshotSink::channel();

    let task = tokio::spawn(async move { router.dispatch(request, Box::new(sink)).await });

    match receiver.await {
        Ok(response) => into_hyper_response(response),
        Err(_) => {
            let reason = match task.await {
                Err(e) => format!("dispatch task failed: {}", e),
                Ok(()) => "dispatch finished without a response".to_string(),
            };
            fatal.raise(reason);
            into_hyper_response(SerializedResponse::internal_error())
        }
    }
}

/// Convert a hyper request into the transport-agnostic shape.
pub fn into_raw_request(req: hyper::Request<Incoming>, remote_addr: Option<SocketAddr>) -> RawRequest {
    let (parts, body) = req.into_parts();
    let url = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    RawRequest {
        method: parts.method.as_str().to_ascii_uppercase(),
        url,
        headers: parts.headers,
        remote_addr,
        body: RawBody::Stream(body.map_err(|e| -> BoxError { Box::new(e) }).boxed_unsync()),
    }
}

pub fn into_hyper_response(serialized: SerializedResponse) -> hyper::Response<Full<Bytes>> {
    let mut response = hyper::Response::new(Full::new(serialized.body));
    *response.status_mut() = serialized.status;
    *response.headers_mut() = serialized.headers;
    response
}
