//! axum adapter for the reactive handler.
//!
//! Installed with `middleware::from_fn_with_state`, so it sits in front of the
//! application router and only consumes the WebSocket path and action POSTs.
//! Every other request reaches `next` untouched.

use std::sync::Arc;

use axum::{
    Json,
    body::{Body, to_bytes},
    extract::{
        FromRequestParts, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    application::error::ErrorReport,
    reactive::{ActionReply, Outbound, ReactiveHandler, ServerFrame},
};

const SOURCE: &str = "infra::http::reactive";

pub async fn reactive_layer(
    State(handler): State<Arc<ReactiveHandler>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path();

    if handler.is_websocket_path(path) {
        return upgrade(handler, request).await;
    }

    if handler.is_action_request(request.method(), path) {
        return http_action(&handler, request).await;
    }

    next.run(request).await
}

async fn upgrade(handler: Arc<ReactiveHandler>, request: Request<Body>) -> Response {
    let (mut parts, _body) = request.into_parts();
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            let mut response = rejection.into_response();
            ErrorReport::from_message(SOURCE, response.status(), "websocket upgrade rejected")
                .attach(&mut response);
            return response;
        }
    };

    let max_payload = handler.config().max_payload_bytes;
    upgrade
        .max_message_size(max_payload)
        .on_upgrade(move |socket| run_session(handler, socket))
}

async fn http_action(handler: &ReactiveHandler, request: Request<Body>) -> Response {
    let limit = handler.config().max_payload_bytes;
    let body: Bytes = match to_bytes(request.into_body(), limit).await {
        Ok(body) => body,
        Err(err) => {
            let status = StatusCode::PAYLOAD_TOO_LARGE;
            let mut response =
                (status, Json(ActionReply::failure("Payload too large"))).into_response();
            ErrorReport::from_message(SOURCE, status, err.to_string()).attach(&mut response);
            return response;
        }
    };

    let (status, reply) = handler.handle_http_action(&body).await;
    let detail = reply.error.clone();
    let mut response = (status, Json(reply)).into_response();
    if let Some(detail) = detail {
        ErrorReport::from_message(SOURCE, status, detail).attach(&mut response);
    }
    response
}

/// Drive one socket: a writer task drains the session's outbound queue while
/// this task reads frames and dispatches them one at a time.
async fn run_session(handler: Arc<ReactiveHandler>, socket: WebSocket) {
    let (session, outbound) = handler.open_session();
    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_outbound(sink, outbound));

    session
        .send_message(&ServerFrame::Connected {
            session_id: session.id(),
        })
        .await;

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let reply = handler.handle_frame(&session, text.as_str()).await;
                session.send_message(&reply).await;
            }
            Ok(Message::Binary(bytes)) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    let reply = handler.handle_frame(&session, text).await;
                    session.send_message(&reply).await;
                }
                Err(_) => {
                    session
                        .send_message(&ActionReply::failure(
                            "Invalid action payload: frame is not UTF-8",
                        ))
                        .await;
                }
            },
            Ok(Message::Close(_)) => break,
            // axum answers pings itself.
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(err) => {
                debug!(session_id = %session.id(), error = %err, "websocket read failed");
                break;
            }
        }
    }

    session.close().await;
    handler.close_session(&session);
    if let Err(err) = writer.await {
        warn!(session_id = %session.id(), error = %err, "websocket writer task failed");
    }
}

async fn write_outbound<S>(mut sink: S, mut outbound: mpsc::Receiver<Outbound>)
where
    S: futures::Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(message) = outbound.recv().await {
        let result = match message {
            Outbound::Text(text) => sink.send(Message::Text(text.into())).await,
            Outbound::Close => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        };
        if let Err(err) = result {
            debug!(error = %err, "websocket write failed");
            break;
        }
    }
    outbound.close();
}
