//! Transport seam for the push channel.
//!
//! The client only ever sees a [`TransportLink`]: a pair of channels carrying
//! text frames. Production uses a websocket pump task; tests inject fake
//! links to drive the connection state machine deterministically.

use std::{future::Future, pin::Pin};

use futures_util::{SinkExt, StreamExt};
use log::warn;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::PushError;

/// One established channel to the hub. The link is closed when `incoming`
/// yields `None`; dropping `outgoing` requests a close.
pub struct TransportLink {
    pub incoming: mpsc::Receiver<String>,
    pub outgoing: mpsc::Sender<String>,
}

pub type ConnectFuture = Pin<Box<dyn Future<Output = Result<TransportLink, PushError>> + Send>>;

pub trait Transport: Send + Sync + 'static {
    fn connect(&self, url: &str) -> ConnectFuture;
}

/// Websocket transport backed by `tokio-tungstenite`.
pub struct WebSocketTransport;

impl Transport for WebSocketTransport {
    fn connect(&self, url: &str) -> ConnectFuture {
        let url = url.to_string();
        Box::pin(async move {
            let (stream, _) = connect_async(&url)
                .await
                .map_err(|err| PushError::Connect(err.to_string()))?;
            let (mut sink, mut source) = stream.split();

            let (incoming_tx, incoming_rx) = mpsc::channel::<String>(256);
            let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<String>(64);

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        frame = source.next() => match frame {
                            Some(Ok(Message::Text(text))) => {
                                if incoming_tx.send(text).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(err)) => {
                                warn!("websocket frame error: {err}");
                                break;
                            }
                        },
                        command = outgoing_rx.recv() => match command {
                            Some(text) => {
                                if sink.send(Message::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                            // Sender dropped: the client asked to close.
                            None => {
                                let _ = sink.send(Message::Close(None)).await;
                                break;
                            }
                        },
                    }
                }
                // incoming_tx drops here, which surfaces the close upstream
            });

            Ok(TransportLink {
                incoming: incoming_rx,
                outgoing: outgoing_tx,
            })
        })
    }
}
