//! WebSocket channel for the connection manager
//!
//! Frames are JSON `{"event", "data"}` objects. `chat` asks for a completion,
//! `ping` is answered with `pong`, anything else is ignored.

use super::AppState;
use crate::chat::{completion_content, validate_message, ChatMessage};
use crate::config::{ValidationMode, MAX_MESSAGE_CHARS};
use crate::connection::Frame;
use crate::errors::ApiError;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use uuid::Uuid;

pub(super) async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let client = Uuid::new_v4();
    tracing::info!(client = %client, "WebSocket client connected");

    let (mut sink, mut stream) = socket.split();
    let (replies, mut outbound) = mpsc::unbounded_channel::<Frame>();

    // Single writer so slow completions never hold up other replies
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(client = %client, error = %e, "Failed to encode frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(client = %client, error = %e, "WebSocket read failed");
                break;
            }
        };

        let frame: Frame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(client = %client, error = %e, "Ignoring malformed frame");
                continue;
            }
        };

        let Frame { event, data } = frame;
        match event.as_str() {
            "ping" => {
                let _ = replies.send(Frame::new("pong", data));
            }
            "chat" => {
                let state = state.clone();
                let replies = replies.clone();
                tokio::spawn(async move {
                    let reply = chat_frame(&state, &data).await;
                    let _ = replies.send(reply);
                });
            }
            other => {
                tracing::debug!(client = %client, event = other, "Ignoring unknown event");
            }
        }
    }

    writer.abort();
    tracing::info!(client = %client, "WebSocket client disconnected");
}

async fn chat_frame(state: &AppState, data: &Value) -> Frame {
    let result = match data.get("message").and_then(Value::as_str) {
        Some(message) => {
            match validate_message(message, ValidationMode::Strict, MAX_MESSAGE_CHARS) {
                Ok(()) => complete(state, message).await,
                Err(err) => Err(err),
            }
        }
        None => Err(ApiError::validation("message must be a string")),
    };

    match result {
        Ok(response) => Frame::new("chat_response", json!({ "response": response })),
        Err(err) => Frame::new(
            "chat_error",
            json!({
                "kind": err.kind().as_str(),
                "message": err.user_message(),
            }),
        ),
    }
}

async fn complete(state: &AppState, message: &str) -> Result<String, ApiError> {
    let body = state.upstream.complete(&[ChatMessage::user(message)]).await?;
    completion_content(&body)
        .map(str::to_string)
        .ok_or_else(|| ApiError::invalid_response("invalid response format"))
}
