//! Control server
//!
//! Runs on a background thread with its own single-threaded tokio runtime so
//! it works the same from synchronous and async callers.

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;

use crate::codec::TokenAuthenticator;
use crate::config::ControlConfig;
use crate::control::handlers;
use crate::control::StreamControl;
use crate::error::{NetworkError, Result};
use crate::network::resolve;

/// Shared handler state
pub struct AppState {
    pub control: Arc<dyn StreamControl>,
    pub auth: TokenAuthenticator,
}

pub struct ControlServer {
    config: ControlConfig,
    state: Arc<AppState>,
}

impl ControlServer {
    pub fn new(
        config: ControlConfig,
        control: Arc<dyn StreamControl>,
        auth: TokenAuthenticator,
    ) -> Self {
        Self {
            config,
            state: Arc::new(AppState { control, auth }),
        }
    }

    /// Create the router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/status", get(handlers::get_status))
            .route("/api/stats", get(handlers::get_stats))
            .route("/api/levels", get(handlers::get_levels))
            .route("/api/processing", post(handlers::set_processing))
            .route("/api/stop", post(handlers::stop_stream))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind now, serve on a background thread until the handle is stopped
    pub fn start_background(self) -> Result<ControlHandle> {
        let addr = resolve(&self.config.bind_address, self.config.http_port)?;
        let listener = std::net::TcpListener::bind(addr)
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let router = self.router();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let thread = thread::Builder::new()
            .name("control-http".into())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            tracing::error!("Control server socket error: {}", e);
                            return;
                        }
                    };
                    let shutdown = async {
                        let _ = shutdown_rx.await;
                    };
                    if let Err(e) = axum::serve(listener, router)
                        .with_graceful_shutdown(shutdown)
                        .await
                    {
                        tracing::error!("Control server error: {}", e);
                    }
                });
            })?;

        tracing::info!("Control API available at http://{}", local_addr);
        Ok(ControlHandle {
            local_addr,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

/// Running control server
pub struct ControlHandle {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ControlHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for ControlHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
