//! Generic WebSocket proxy for non-VNC upgrades.
//!
//! Dials `ws://dst:port{path}`, performs the upstream handshake over a plain
//! TCP stream and then relays frames in both directions. Message kinds are
//! preserved so protocols layered on text or binary frames work unchanged.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;

use crate::errors::{GatewayError, GatewayResult};
use crate::validate::Target;

/// Bridges an accepted client socket to the upstream WebSocket endpoint.
/// Returns once either side closes or fails; dropping the halves tears down
/// whatever is left.
pub async fn proxy_websocket(
    client_socket: axum::extract::ws::WebSocket,
    target: &Target,
    path: &str,
) -> GatewayResult<()> {
    let addr = target.authority();
    let url = format!("ws://{}{}", addr, path);
    tracing::debug!("connecting to upstream websocket {url}");

    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| GatewayError::Upstream(format!("dial {addr}: {e}")))?;
    stream.set_nodelay(true)?;

    let (upstream_ws, _) = tokio_tungstenite::client_async(&url, stream)
        .await
        .map_err(|e| GatewayError::Upstream(format!("websocket handshake with {addr}: {e}")))?;
    let (mut upstream_sink, mut upstream_stream) = upstream_ws.split();
    let (mut client_sink, mut client_stream) = client_socket.split();

    // Client -> upstream runs on its own task so both directions pump
    // concurrently.
    let client_to_upstream = tokio::spawn(async move {
        while let Some(msg_result) = client_stream.next().await {
            match msg_result {
                Ok(axum::extract::ws::Message::Binary(data)) => {
                    if upstream_sink
                        .send(TungsteniteMessage::Binary(data.to_vec()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(axum::extract::ws::Message::Text(text)) => {
                    if upstream_sink
                        .send(TungsteniteMessage::Text(text.to_string()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(axum::extract::ws::Message::Close(_)) => break,
                Ok(axum::extract::ws::Message::Ping(data)) => {
                    if upstream_sink
                        .send(TungsteniteMessage::Ping(data.to_vec()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(axum::extract::ws::Message::Pong(data)) => {
                    if upstream_sink
                        .send(TungsteniteMessage::Pong(data.to_vec()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    // Upstream -> client on this task; returning drops the client socket.
    while let Some(msg_result) = upstream_stream.next().await {
        match msg_result {
            Ok(TungsteniteMessage::Binary(data)) => {
                if client_sink
                    .send(axum::extract::ws::Message::Binary(data.into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(TungsteniteMessage::Text(text)) => {
                if client_sink
                    .send(axum::extract::ws::Message::Text(text.into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(TungsteniteMessage::Close(_)) => break,
            Ok(TungsteniteMessage::Ping(data)) => {
                if client_sink
                    .send(axum::extract::ws::Message::Ping(data.into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            Ok(TungsteniteMessage::Pong(data)) => {
                if client_sink
                    .send(axum::extract::ws::Message::Pong(data.into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
            // Raw frames only appear when the client asks for them.
            Ok(_) => {}
            Err(_) => break,
        }
    }

    client_to_upstream.abort();
    let _ = client_sink.close().await;
    Ok(())
}
