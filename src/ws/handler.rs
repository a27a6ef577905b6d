//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::PlayerInput;
use crate::util::rate_limit::PlayerRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Messages buffered per session before the match starts dropping snapshots
const OUTBOUND_BUFFER: usize = 64;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let player_id = Uuid::new_v4();
    info!(player_id = %player_id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        player_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(player_id = %player_id, error = %e, "Failed to send welcome");
        return;
    }

    let (outbound_tx, outbound_rx) = mpsc::channel::<ServerMsg>(OUTBOUND_BUFFER);
    state
        .matchmaking
        .register_session(player_id, outbound_tx.clone());

    run_session(player_id, &state, ws_sink, ws_stream, outbound_tx, outbound_rx).await;

    // Cleanup on disconnect
    state.matchmaking.unregister_session(player_id).await;

    info!(player_id = %player_id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    player_id: Uuid,
    state: &AppState,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut ws_stream: SplitStream<WebSocket>,
    outbound_tx: mpsc::Sender<ServerMsg>,
    mut outbound_rx: mpsc::Receiver<ServerMsg>,
) {
    let rate_limiter = PlayerRateLimiter::new();

    // Spawn writer task: session queue -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(player_id = %player_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> matchmaking / match
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(player_id = %player_id, "Rate limited input message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => {
                        handle_client_msg(player_id, client_msg, state, &outbound_tx).await;
                    }
                    Err(e) => {
                        warn!(player_id = %player_id, error = %e, "Failed to parse client message");
                        reply(
                            &outbound_tx,
                            ServerMsg::Error {
                                code: "bad_message".to_string(),
                                message: "Could not parse message".to_string(),
                            },
                        );
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(player_id = %player_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(player_id = %player_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(player_id = %player_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    writer_handle.abort();
}

async fn handle_client_msg(
    player_id: Uuid,
    msg: ClientMsg,
    state: &AppState,
    outbound_tx: &mpsc::Sender<ServerMsg>,
) {
    match msg {
        ClientMsg::JoinMatch { name } => {
            if let Err(e) = state.matchmaking.join_queue(player_id, name).await {
                reply(
                    outbound_tx,
                    ServerMsg::Error {
                        code: "join_failed".to_string(),
                        message: e.to_string(),
                    },
                );
            }
        }
        ClientMsg::Ping { t } => reply(outbound_tx, ServerMsg::Pong { t }),
        ClientMsg::LeaveMatch => {
            state.matchmaking.leave(player_id).await;
        }
        msg => {
            state
                .matchmaking
                .route_input(PlayerInput { player_id, msg })
                .await;
        }
    }
}

fn reply(outbound_tx: &mpsc::Sender<ServerMsg>, msg: ServerMsg) {
    if outbound_tx.try_send(msg).is_err() {
        debug!("Session queue unavailable, reply dropped");
    }
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
