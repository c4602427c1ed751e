//! WebSocket transport over tokio-tungstenite.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::{EventSink, TransportEvent, TransportFactory, TransportLink, close_code};
use crate::auth::Credential;
use crate::error::SyncError;

enum Outgoing {
    Text(String),
    Close(u16, String),
}

/// Opens one tokio task per link. The credential travels as a bearer token
/// in the upgrade request.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsTransport;

impl WsTransport {
    pub fn new() -> Self {
        Self
    }
}

struct WsLink {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl TransportLink for WsLink {
    fn send(&mut self, text: String) -> Result<(), SyncError> {
        self.tx
            .send(Outgoing::Text(text))
            .map_err(|_| SyncError::Transport("socket task has exited".to_string()))
    }

    fn close(&mut self, code: u16, reason: &str) {
        let _ = self.tx.send(Outgoing::Close(code, reason.to_string()));
    }
}

impl TransportFactory for WsTransport {
    fn open(
        &self,
        endpoint: &str,
        credential: &Credential,
        events: EventSink,
    ) -> Box<dyn TransportLink> {
        let (tx, rx) = mpsc::unbounded_channel();
        let endpoint = endpoint.to_string();
        let token = credential.token.clone();
        tokio::spawn(run_link(endpoint, token, events, rx));
        Box::new(WsLink { tx })
    }
}

async fn fail(events: &EventSink, error: String) {
    events.emit(TransportEvent::Error(error.clone())).await;
    events
        .emit(TransportEvent::Closed {
            code: close_code::ABNORMAL,
            reason: error,
        })
        .await;
}

async fn run_link(
    endpoint: String,
    token: String,
    events: EventSink,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
) {
    let mut request = match endpoint.as_str().into_client_request() {
        Ok(request) => request,
        Err(e) => return fail(&events, format!("invalid endpoint: {e}")).await,
    };
    match HeaderValue::from_str(&format!("Bearer {token}")) {
        Ok(value) => {
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Err(_) => return fail(&events, "credential is not a valid header value".into()).await,
    }

    let socket = tokio::select! {
        result = tokio_tungstenite::connect_async(request) => match result {
            Ok((socket, _response)) => socket,
            Err(e) => return fail(&events, e.to_string()).await,
        },
        // Closed before the handshake finished.
        _ = outgoing.recv() => return,
    };

    debug!(generation = events.generation(), %endpoint, "websocket open");
    if !events.emit(TransportEvent::Opened).await {
        return;
    }

    let (mut write, mut read) = socket.split();
    loop {
        tokio::select! {
            out = outgoing.recv() => match out {
                Some(Outgoing::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        warn!(error = %e, "websocket send failed");
                        events.emit(TransportEvent::Error(e.to_string())).await;
                    }
                }
                Some(Outgoing::Close(code, reason)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    events.emit(TransportEvent::Closed { code, reason }).await;
                    break;
                }
                None => {
                    let _ = write.close().await;
                    break;
                }
            },
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if !events.emit(TransportEvent::Message(text.as_str().to_owned())).await {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (u16::from(frame.code), frame.reason.as_str().to_owned()),
                        None => (1005, String::new()),
                    };
                    events.emit(TransportEvent::Closed { code, reason }).await;
                    break;
                }
                // Ping/pong is answered by tungstenite; binary frames are not
                // part of the protocol.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    fail(&events, e.to_string()).await;
                    break;
                }
                None => {
                    events
                        .emit(TransportEvent::Closed {
                            code: close_code::ABNORMAL,
                            reason: "connection dropped".to_string(),
                        })
                        .await;
                    break;
                }
            },
        }
    }
}
