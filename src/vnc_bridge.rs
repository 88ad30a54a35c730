//! WebSocket-to-TCP bridge for VNC sessions.
//!
//! noVNC clients speak RFB wrapped in binary WebSocket frames; the servers
//! behind the gateway speak RFB over raw TCP. The bridge unwraps client
//! frames onto the TCP socket and wraps TCP reads into binary frames, byte
//! for byte, in arrival order. It never parses or re-frames RFB: handshake,
//! security negotiation and framebuffer traffic pass through untouched.

use std::time::Instant;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::errors::{GatewayError, GatewayResult};
use crate::validate::Target;

/// Read chunk for the TCP side. Framebuffer updates arrive in bursts well
/// above this size and get split across frames, which noVNC reassembles.
const TCP_READ_BUF_BYTES: usize = 16 * 1024;

/// One live client-to-VNC-server bridge. Owns both sockets; when `run`
/// returns, both are gone.
pub struct BridgeSession {
    id: Uuid,
    target: Target,
    created_at: Instant,
    socket: WebSocket,
    tcp: TcpStream,
}

impl BridgeSession {
    /// Dials the VNC server. The client socket is already upgraded at this
    /// point; a failed dial drops it, which closes the WebSocket.
    pub async fn connect(socket: WebSocket, target: Target) -> GatewayResult<Self> {
        let tcp = TcpStream::connect(target.authority())
            .await
            .map_err(|e| GatewayError::Upstream(format!("dial {}: {e}", target.authority())))?;
        tcp.set_nodelay(true)?;
        Ok(Self {
            id: Uuid::new_v4(),
            target,
            created_at: Instant::now(),
            socket,
            tcp,
        })
    }

    /// Shuttles bytes until either side closes or fails. The first
    /// completion wins the select and the losing direction is dropped, so
    /// the session always tears down as a pair.
    pub async fn run(self) {
        let BridgeSession {
            id,
            target,
            created_at,
            socket,
            tcp,
        } = self;
        tracing::info!(%id, target = %target, "vnc bridge open");

        let (mut tcp_read, mut tcp_write) = tcp.into_split();
        let (mut ws_sink, mut ws_stream) = socket.split();

        let reason = tokio::select! {
            reason = pump_ws_to_tcp(&mut ws_stream, &mut tcp_write) => reason,
            reason = pump_tcp_to_ws(&mut tcp_read, &mut ws_sink) => reason,
        };

        let _ = ws_sink.close().await;
        tracing::info!(
            %id,
            target = %target,
            reason,
            elapsed_ms = created_at.elapsed().as_millis() as u64,
            "vnc bridge closed"
        );
    }
}

/// Client frames onto the TCP socket. Binary payloads are written verbatim;
/// RFB has no text frames, so any are dropped. Pings are answered upstream
/// by axum before they reach this loop.
async fn pump_ws_to_tcp(
    ws_stream: &mut SplitStream<WebSocket>,
    tcp_write: &mut OwnedWriteHalf,
) -> &'static str {
    while let Some(msg_result) = ws_stream.next().await {
        match msg_result {
            Ok(Message::Binary(data)) => {
                if tcp_write.write_all(&data).await.is_err() {
                    return "tcp write failed";
                }
            }
            Ok(Message::Close(_)) => return "client closed",
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Text(_)) => {}
            Err(_) => return "client socket error",
        }
    }
    "client stream ended"
}

/// TCP bytes into binary frames, chunked at the read size.
async fn pump_tcp_to_ws(
    tcp_read: &mut OwnedReadHalf,
    ws_sink: &mut SplitSink<WebSocket, Message>,
) -> &'static str {
    let mut buf = vec![0u8; TCP_READ_BUF_BYTES];
    loop {
        match tcp_read.read(&mut buf).await {
            Ok(0) => return "server closed",
            Ok(n) => {
                if ws_sink
                    .send(Message::Binary(buf[..n].to_vec().into()))
                    .await
                    .is_err()
                {
                    return "client send failed";
                }
            }
            Err(_) => return "tcp read error",
        }
    }
}
