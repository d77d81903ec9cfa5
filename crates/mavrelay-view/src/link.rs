//! Client side of the relay WebSocket.
//!
//! A link is opened once and never reconnects by itself: when the relay goes
//! away the state becomes `Disconnected`, the navigation cache is marked
//! stale, and it is up to the owner to open a new link.

use std::sync::Arc;

use futures::StreamExt;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::nav::NavHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    Disconnected,
}

impl LinkState {
    pub fn as_str(self) -> &'static str {
        match self {
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Disconnected => "disconnected",
        }
    }
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("relay at {0} unreachable")]
    Unreachable(String),
    #[error("relay link task ended")]
    Gone,
}

pub struct RelayLink {
    url: String,
    state: Arc<watch::Sender<LinkState>>,
    rx: watch::Receiver<LinkState>,
    nav: NavHandle,
    task: JoinHandle<()>,
}

impl RelayLink {
    /// Starts connecting in the background. Every text frame received is
    /// applied to `nav`.
    pub fn open(url: impl Into<String>, nav: NavHandle) -> Self {
        let url = url.into();
        let (tx, rx) = watch::channel(LinkState::Connecting);
        let state = Arc::new(tx);
        let task = tokio::spawn(pump(url.clone(), nav.clone(), state.clone()));
        Self { url, state, rx, nav, task }
    }

    /// Opens and waits for the handshake.
    pub async fn connect(url: impl Into<String>, nav: NavHandle) -> Result<Self, LinkError> {
        let mut link = Self::open(url, nav);
        link.established().await?;
        Ok(link)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> LinkState {
        *self.rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.rx.clone()
    }

    /// Waits until the handshake either completes or fails.
    pub async fn established(&mut self) -> Result<(), LinkError> {
        let state = *self
            .rx
            .wait_for(|s| *s != LinkState::Connecting)
            .await
            .map_err(|_| LinkError::Gone)?;
        match state {
            LinkState::Connected => Ok(()),
            _ => Err(LinkError::Unreachable(self.url.clone())),
        }
    }

    /// Waits for the relay to go away.
    pub async fn closed(&mut self) {
        let _ = self.rx.wait_for(|s| *s == LinkState::Disconnected).await;
    }
}

impl Drop for RelayLink {
    fn drop(&mut self) {
        self.task.abort();
        self.state.send_replace(LinkState::Disconnected);
        self.nav.set_stale(true);
    }
}

async fn pump(url: String, nav: NavHandle, state: Arc<watch::Sender<LinkState>>) {
    let socket = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((socket, _)) => socket,
        Err(e) => {
            warn!("relay: unable to connect to {}: {}", url, e);
            state.send_replace(LinkState::Disconnected);
            return;
        }
    };
    info!("relay: connected to {}", url);
    nav.set_stale(false);
    state.send_replace(LinkState::Connected);

    let (_tx, mut rx) = socket.split();
    while let Some(msg) = rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                nav.apply_text(&text);
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("relay: read failed: {}", e);
                break;
            }
        }
    }

    nav.set_stale(true);
    state.send_replace(LinkState::Disconnected);
    info!("relay: disconnected from {}", url);
}
