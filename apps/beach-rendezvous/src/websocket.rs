use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

use crate::registry::SessionRegistry;
use crate::server::AppState;
use crate::signals::{ClientEvent, ConnectQuery};

/// WebSocket upgrade handler. The `connect` parameters ride on the query
/// string of the upgrade request.
pub async fn websocket_handler(
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
    Query(pairs): Query<Vec<(String, String)>>,
    State(state): State<AppState>,
) -> Response {
    let query = ConnectQuery::from_pairs(pairs);
    ws.on_upgrade(move |socket| handle_socket(socket, query, state.registry, remote_addr))
}

async fn handle_socket(
    socket: WebSocket,
    query: ConnectQuery,
    registry: SessionRegistry,
    remote_addr: SocketAddr,
) {
    let conn_id = query.conn_id.clone().unwrap_or_default();
    let (channel, mut outbound) = registry.open_channel(&conn_id);
    let (mut sender, mut receiver) = socket.split();

    // Ends once the registry forgets the channel or sends a closing event.
    // Either way the client gets a close frame.
    let writer_label = channel.to_string();
    tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    error!(channel = %writer_label, error = %err, "failed to encode server event");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
            if event.ends_channel() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
        debug!(channel = %writer_label, "writer task ended");
    });

    info!(
        conn_id = %conn_id,
        channel = %channel,
        stage = query.stage.as_deref().unwrap_or("-"),
        %remote_addr,
        "channel connected"
    );
    let attached = match registry.attach(&channel, &query).await {
        Ok(outcome) => {
            debug!(channel = %channel, ?outcome, "connect handled");
            true
        }
        Err(rejection) => {
            info!(channel = %channel, reason = rejection.as_str(), "connect rejected");
            false
        }
    };

    // A rejected connect leaves the channel with nothing to do.
    while attached {
        let Some(frame) = receiver.next().await else {
            break;
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!(channel = %channel, error = %err, "websocket error");
                break;
            }
        };
        let text = match frame {
            Message::Text(text) => text,
            // Binary frames carrying UTF-8 JSON are accepted too.
            Message::Binary(data) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    registry.reject_frame(&channel);
                    continue;
                }
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };

        match serde_json::from_str::<ClientEvent>(&text) {
            Ok(event) => {
                let name = event.name();
                match registry.handle_event(&channel, event).await {
                    Ok(outcome) => debug!(channel = %channel, event = name, ?outcome, "event handled"),
                    Err(rejection) => debug!(
                        channel = %channel,
                        event = name,
                        reason = rejection.as_str(),
                        "event rejected"
                    ),
                }
            }
            Err(err) => {
                warn!(channel = %channel, error = %err, "unparseable client frame");
                registry.reject_frame(&channel);
            }
        }
    }

    registry.close_channel(&channel).await;
    info!(conn_id = %conn_id, channel = %channel, "channel disconnected");
}
