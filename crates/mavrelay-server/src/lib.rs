pub mod api;
pub mod hub;
pub mod maps;
pub mod ws;

use std::future::{Future, IntoFuture};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

pub use api::{api_router, ApiError, AppState};
pub use hub::{spawn_hub, Hub, HubHandle, PublishReport, ViewerConnection};
pub use maps::MapsParams;
pub use ws::ws_router;

pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_WS_PORT: u16 = 8081;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address both listeners bind. Default 0.0.0.0
    pub bind: Option<IpAddr>,
    pub http_port: u16,
    pub ws_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: None, http_port: DEFAULT_HTTP_PORT, ws_port: DEFAULT_WS_PORT }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> IpAddr {
        self.bind.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("unable to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("server failed: {0}")]
    Io(#[from] io::Error),
}

/// The HTTP and WebSocket listeners, bound but not yet serving.
pub struct Listeners {
    http: TcpListener,
    ws: TcpListener,
}

impl Listeners {
    pub async fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let ip = config.bind_addr();
        Ok(Self {
            http: bind_tcp(SocketAddr::new(ip, config.http_port)).await?,
            ws: bind_tcp(SocketAddr::new(ip, config.ws_port)).await?,
        })
    }

    pub fn http_addr(&self) -> io::Result<SocketAddr> {
        self.http.local_addr()
    }

    pub fn ws_addr(&self) -> io::Result<SocketAddr> {
        self.ws.local_addr()
    }

    /// Serves both routers until `shutdown` fires (or its sender is dropped).
    pub async fn serve(self, state: AppState, shutdown: watch::Receiver<()>) -> Result<(), ServerError> {
        info!("http api on http://{}", self.http.local_addr()?);
        info!("viewer endpoint on ws://{}/", self.ws.local_addr()?);

        let hub = state.hub.clone();
        let http = axum::serve(self.http, api_router(state))
            .with_graceful_shutdown(signalled(shutdown.clone()))
            .into_future();
        let ws = axum::serve(self.ws, ws_router(hub))
            .with_graceful_shutdown(signalled(shutdown))
            .into_future();
        tokio::try_join!(http, ws)?;
        Ok(())
    }
}

async fn bind_tcp(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr).await.map_err(|source| ServerError::Bind { addr, source })
}

fn signalled(mut rx: watch::Receiver<()>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let _ = rx.changed().await;
    }
}
