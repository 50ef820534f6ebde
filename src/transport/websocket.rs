use std::collections::HashSet;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, info, warn};
use tungstenite::protocol::Message as WsMessage;

use crate::broker::Broker;
use crate::protocol::{Message, META_HANDSHAKE};

/// Accept loop: one task per connection, each driving its own batches
/// through the broker.
pub async fn start_websocket_server(addr: &str, broker: Arc<Broker>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "websocket server listening");

    while let Ok((stream, peer)) = listener.accept().await {
        debug!(%peer, "connection accepted");
        let broker = broker.clone();
        tokio::spawn(async move {
            handle_connection(stream, broker).await;
        });
    }
    Ok(())
}

/// A frame is either a single message object or an array batch.
pub fn parse_batch(text: &str) -> Result<Vec<Message>, serde_json::Error> {
    if text.trim_start().starts_with('[') {
        serde_json::from_str::<Vec<Message>>(text)
    } else {
        serde_json::from_str::<Message>(text).map(|m| vec![m])
    }
}

async fn handle_connection(stream: TcpStream, broker: Arc<Broker>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "websocket handshake failed");
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    // Replies and pushed deliveries funnel through one outgoing channel so
    // frames never interleave mid-write.
    let (tx, mut rx) = mpsc::unbounded_channel::<WsMessage>();
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Err(e) = ws_sender.send(msg).await {
                debug!(error = %e, "send loop closed");
                break;
            }
        }
    });

    // Sessions established over this connection; a re-handshake on the same
    // socket adds a second one.
    let mut established: HashSet<String> = HashSet::new();

    while let Some(Ok(msg)) = ws_receiver.next().await {
        if !msg.is_text() {
            continue;
        }
        let Ok(text) = msg.to_text() else { continue };
        let batch = match parse_batch(text) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "dropping unparseable frame");
                continue;
            }
        };

        let replies = broker.process(batch);

        for reply in &replies {
            if reply.channel == META_HANDSHAKE && reply.successful == Some(true) {
                if let Some(client_id) = reply.client_id.clone() {
                    if established.insert(client_id.clone()) {
                        spawn_forwarder(broker.clone(), client_id, tx.clone());
                    }
                }
            }
        }

        if replies.is_empty() {
            continue;
        }
        match serde_json::to_string(&replies) {
            Ok(json) => {
                if tx.send(WsMessage::text(json)).is_err() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "reply serialization failed"),
        }
    }

    for client_id in established {
        debug!(session = %client_id, "connection closed, destroying session");
        broker.destroy_session(&client_id);
    }
}

/// Pushes queued deliveries to the socket as they arrive. The poll re-arms
/// on every empty hold and stops when the session is destroyed, which also
/// covers server-side expiry sweeps.
fn spawn_forwarder(broker: Arc<Broker>, client_id: String, tx: mpsc::UnboundedSender<WsMessage>) {
    tokio::spawn(async move {
        let hold = broker.hold_timeout();
        loop {
            match broker.poll(&client_id, hold).await {
                Ok(batch) => {
                    if batch.is_empty() {
                        continue;
                    }
                    match serde_json::to_string(&batch) {
                        Ok(json) => {
                            if tx.send(WsMessage::text(json)).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "delivery serialization failed"),
                    }
                }
                Err(_) => break,
            }
        }
        debug!(session = %client_id, "delivery forwarder stopped");
    });
}
