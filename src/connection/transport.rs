//! WebSocket transport
//!
//! Each dial spawns one I/O task that owns the socket. The task reports
//! lifecycle events back to the manager through an mpsc channel and
//! writes the frames it is handed through a [`LinkHandle`]. It never
//! touches manager state.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tracing::{debug, trace, warn};

use super::state::{LinkEnvelope, LinkEvent, LinkId, Payload};
use crate::error::{Error, Result};

/// Instructions from the manager to a link's I/O task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    /// Write a text frame
    Send(String),
    /// Send a close frame and stop; no further events are reported
    Close,
}

/// The manager's end of a single connection
#[derive(Debug)]
pub struct LinkHandle {
    id: LinkId,
    commands: mpsc::UnboundedSender<LinkCommand>,
    task: Option<JoinHandle<()>>,
}

impl LinkHandle {
    pub fn new(
        id: LinkId,
        commands: mpsc::UnboundedSender<LinkCommand>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self { id, commands, task }
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Queue a text frame for the socket
    pub fn send_text(&self, text: String) -> Result<()> {
        self.commands
            .send(LinkCommand::Send(text))
            .map_err(|_| Error::ConnectionLost {
                message: format!("link {} is no longer running", self.id),
            })
    }

    /// Ask the I/O task to close the socket.
    ///
    /// Returns the task so the caller can wait for the close frame to go out.
    pub fn close(mut self) -> Option<JoinHandle<()>> {
        let _ = self.commands.send(LinkCommand::Close);
        self.task.take()
    }
}

/// Opens connections on behalf of the manager
pub trait Dialer {
    /// Start connecting to `url` without waiting for the handshake.
    ///
    /// Every event of the new connection is sent to `events` tagged with `id`,
    /// ending with exactly one [`LinkEvent::Closed`] unless the link is closed
    /// through its handle.
    fn dial(&mut self, id: LinkId, url: &str, events: mpsc::Sender<LinkEnvelope>) -> LinkHandle;
}

/// Dialer backed by tokio-tungstenite
#[derive(Debug, Default, Clone, Copy)]
pub struct WsDialer;

impl Dialer for WsDialer {
    fn dial(&mut self, id: LinkId, url: &str, events: mpsc::Sender<LinkEnvelope>) -> LinkHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_link(id, url.to_string(), events, command_rx));
        LinkHandle::new(id, command_tx, Some(task))
    }
}

/// Forwards one event; a closed receiver means the manager is gone
async fn report(events: &mpsc::Sender<LinkEnvelope>, id: LinkId, event: LinkEvent) -> bool {
    events.send(LinkEnvelope::new(id, event)).await.is_ok()
}

/// Drive one connection from dial to close
async fn run_link(
    id: LinkId,
    url: String,
    events: mpsc::Sender<LinkEnvelope>,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
) {
    debug!(link = id, "Dialing");

    // A close requested during the handshake wins over the handshake
    let connected = tokio::select! {
        result = connect_async(url.as_str()) => result,
        _ = commands.recv() => {
            debug!(link = id, "Dial abandoned");
            return;
        }
    };

    let ws_stream = match connected {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            let error = Error::connection_failed(url.as_str(), e.to_string());
            if report(&events, id, LinkEvent::Error(error.to_string())).await {
                report(&events, id, LinkEvent::Closed { reason: Some(e.to_string()) }).await;
            }
            return;
        }
    };

    if !report(&events, id, LinkEvent::Opened).await {
        return;
    }

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            frame = read.next() => {
                let event = match frame {
                    Some(Ok(WsMessage::Text(text))) => LinkEvent::Message(Payload::Text(text)),
                    Some(Ok(WsMessage::Binary(data))) => LinkEvent::Message(Payload::Binary(data)),
                    // Pongs to pings are queued by tungstenite itself
                    Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) | Some(Ok(WsMessage::Frame(_))) => continue,
                    Some(Ok(WsMessage::Close(frame))) => {
                        let reason = frame.map(|f| format!("{} {}", u16::from(f.code), f.reason));
                        // Writes the close reply tungstenite queued
                        if let Err(e) = write.flush().await {
                            debug!(link = id, error = %e, "Close reply not delivered");
                        }
                        report(&events, id, LinkEvent::Closed { reason }).await;
                        return;
                    }
                    Some(Err(e)) => {
                        if report(&events, id, LinkEvent::Error(e.to_string())).await {
                            report(&events, id, LinkEvent::Closed { reason: Some(e.to_string()) }).await;
                        }
                        return;
                    }
                    None => {
                        report(&events, id, LinkEvent::Closed { reason: None }).await;
                        return;
                    }
                };

                if !report(&events, id, event).await {
                    return;
                }
            }

            command = commands.recv() => {
                match command {
                    Some(LinkCommand::Send(text)) => {
                        trace!(link = id, bytes = text.len(), "Writing frame");
                        if let Err(e) = write.send(WsMessage::Text(text)).await {
                            // The read half reports the failure and the close
                            warn!(link = id, error = %e, "Failed to write frame");
                        }
                    }
                    Some(LinkCommand::Close) | None => {
                        if let Err(e) = write.send(WsMessage::Close(None)).await {
                            debug!(link = id, error = %e, "Close frame not delivered");
                        }
                        debug!(link = id, "Link closed locally");
                        return;
                    }
                }
            }
        }
    }
}
