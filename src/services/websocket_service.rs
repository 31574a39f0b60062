use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    dto::ws::ClientCommand,
    services::coordinator,
    state::SharedState,
};

/// Handle the full lifecycle of an operator or viewer WebSocket connection.
///
/// Every client receives the full state on connect and after each accepted command.
/// Bad frames are logged and skipped; only a close or transport error ends the session.
pub async fn handle_socket(state: SharedState, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task so broadcasts never wait on a slow socket.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let session_id = coordinator::connect_client(&state, outbound_tx.clone()).await;

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!(session_id = %session_id, payload = %text, "received client message");
                handle_text(&state, text.as_str()).await;
            }
            Ok(Message::Close(frame)) => {
                info!(session_id = %session_id, "client closed");
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {
                debug!(session_id = %session_id, "ignoring binary frame");
            }
            // The transport answers pings on its own.
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "websocket error");
                break;
            }
        }
    }

    coordinator::disconnect_client(&state, &session_id);
    finalize(writer_task, outbound_tx).await;
}

/// Decode one frame and run it through the coordinator.
async fn handle_text(state: &SharedState, text: &str) {
    let command = match ClientCommand::from_json_str(text) {
        Ok(command) => command,
        Err(err) => {
            warn!(error = %err, "dropping client message");
            return;
        }
    };

    let kind = command.kind();
    if let Err(rejected) = coordinator::dispatch(state, command).await {
        info!(command = kind, reason = %rejected, "command ignored");
    }
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
