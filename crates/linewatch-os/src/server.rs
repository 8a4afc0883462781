use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{Method as HttpMethod, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response as HttpResponse};

use linewatch::node::{Routes, Service};
use linewatch::response::{Method, Request, Response};

use tokio::sync::{mpsc, oneshot};

use tracing::{debug, warn};

/// Number of requests that can wait for the node.
pub const DEFAULT_QUEUE_SIZE: usize = 16;

// Maximum number of requests served in a single tick.
const MAX_REQUESTS_PER_TICK: usize = 4;

/// A request waiting to be served by the node.
#[derive(Debug)]
pub struct PendingRequest {
    method: HttpMethod,
    path: String,
    query: String,
    reply: oneshot::Sender<Response>,
}

/// Hands the requests received by the `HTTP` front end over to the node.
///
/// The front end runs on its own task; the node only sees the requests when
/// the bridge is polled as a [`Service`] during its tick.
#[derive(Debug)]
pub struct RequestBridge {
    receiver: mpsc::Receiver<PendingRequest>,
}

impl Service for RequestBridge {
    fn poll(&mut self, routes: &mut dyn Routes, now: Duration) {
        for _ in 0..MAX_REQUESTS_PER_TICK {
            let Ok(pending) = self.receiver.try_recv() else {
                return;
            };

            let request = Request {
                method: Method::from_name(pending.method.as_str()),
                path: &pending.path,
                query: &pending.query,
            };
            let response = routes.handle(&request, now);

            if pending.reply.send(response).is_err() {
                debug!("Client gone before `{}` was answered", pending.path);
            }
        }
    }
}

/// Creates the `HTTP` front end and the bridge feeding its requests to the
/// node.
///
/// Every route is answered by the node, so the router only has a fallback
/// handler.
#[must_use]
pub fn router(queue_size: usize) -> (Router, RequestBridge) {
    let (sender, receiver) = mpsc::channel(queue_size.max(1));
    let router = Router::new().fallback(forward).with_state(sender);
    (router, RequestBridge { receiver })
}

async fn forward(
    State(sender): State<mpsc::Sender<PendingRequest>>,
    method: HttpMethod,
    uri: Uri,
) -> HttpResponse {
    let (reply, response) = oneshot::channel();
    let pending = PendingRequest {
        method,
        path: uri.path().to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        reply,
    };

    if sender.send(pending).await.is_err() {
        warn!("Node stopped, `{uri}` not served");
        return (StatusCode::SERVICE_UNAVAILABLE, "Node stopped\n").into_response();
    }

    match response.await {
        Ok(response) => into_http(response),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "Node restarting\n").into_response(),
    }
}

fn into_http(response: Response) -> HttpResponse {
    let status =
        StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        [(header::CONTENT_TYPE, response.content_type)],
        response.body,
    )
        .into_response()
}
