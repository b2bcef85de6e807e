//! WebSocket front end
//!
//! Each connection gets a fresh actor id and its own channel on the
//! transport. Client messages are JSON [`ClientMessage`]s; everything the
//! engine sends back is a JSON [`ServerMessage`].

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use realm_core::ActorId;
use realm_engine::Engine;
use realm_stream::{ChannelTransport, ClientMessage, ServerMessage, Transport};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Accept connections until the listener fails or `token` is cancelled
pub async fn accept_loop(
    listener: TcpListener,
    engine: Arc<Engine>,
    transport: Arc<ChannelTransport>,
    token: CancellationToken,
) -> Result<()> {
    loop {
        let (stream, addr) = tokio::select! {
            accepted = listener.accept() => accepted.context("Failed to accept connection")?,
            _ = token.cancelled() => return Ok(()),
        };
        let engine = engine.clone();
        let transport = transport.clone();
        let token = token.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, engine, transport, token).await {
                warn!("Connection {} closed with error: {:#}", addr, e);
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    engine: Arc<Engine>,
    transport: Arc<ChannelTransport>,
    token: CancellationToken,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .context("WebSocket handshake failed")?;
    let (mut sink, mut source) = ws.split();

    let actor = ActorId::new();
    let mut outbound = transport.connect(actor);
    transport.send(actor, ServerMessage::Welcome { actor });
    info!("Actor {} connected from {}", actor, addr);

    let result: Result<()> = loop {
        tokio::select! {
            Some(message) = outbound.recv() => {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => break Err(e.into()),
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    break Err(e.into());
                }
            }
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => match decode(&text) {
                    Ok(message) => {
                        // Engine calls may touch the store, so keep them off the reactor
                        let engine = engine.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || engine.dispatch(actor, message)).await {
                            break Err(e.into());
                        }
                    }
                    Err(reply) => {
                        transport.send(actor, reply);
                    }
                },
                Some(Ok(Message::Binary(_))) => {
                    transport.send(actor, ServerMessage::error("Binary frames are not supported", false));
                }
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(e.into()),
            },
            _ = token.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break Ok(());
            }
        }
    };

    transport.disconnect(actor);
    tokio::task::spawn_blocking(move || engine.disconnect(actor)).await?;
    info!("Actor {} disconnected", actor);
    result
}

/// Parse one text frame, or build the error reply for a malformed one
fn decode(text: &str) -> Result<ClientMessage, ServerMessage> {
    serde_json::from_str(text).map_err(|e| {
        debug!("Malformed client message: {}", e);
        ServerMessage::error(format!("Malformed message: {}", e), false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_valid_message() {
        let message = decode(r#"{"type":"move","position":[1.0,2.0,3.0]}"#).unwrap();
        assert_eq!(
            message,
            ClientMessage::Move {
                position: [1.0, 2.0, 3.0]
            }
        );
    }

    #[test]
    fn test_decode_reports_malformed_message() {
        match decode(r#"{"type":"teleport"}"#) {
            Err(ServerMessage::Error { retryable, message }) => {
                assert!(!retryable);
                assert!(message.starts_with("Malformed message"));
            }
            other => panic!("expected an error reply, got {:?}", other),
        }
    }
}
