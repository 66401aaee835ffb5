//! WebSocket signaling server
//!
//! Owns the registry, the lifecycle monitor, the WebSocket accept loop and
//! the optional health endpoint. Everything stops on one broadcast signal.

use crate::config::SignalingServerConfig;
use crate::handler::{handle_connection, SharedState};
use crate::health;
use std::net::SocketAddr;
use std::sync::Arc;
use tandem_core::{LifecycleMonitor, MonitorHandle, Registry};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// WebSocket signaling server
pub struct SignalingServer {
    config: Arc<SignalingServerConfig>,
    registry: Arc<Registry>,
}

impl SignalingServer {
    /// Create a new server with a fresh registry
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` if the configuration does not validate.
    pub fn new(config: SignalingServerConfig) -> crate::Result<Self> {
        config.validate()?;
        let registry = Arc::new(Registry::new(config.matchmaking.clone())?);
        Ok(Self {
            config: Arc::new(config),
            registry,
        })
    }

    /// Shared registry (for external inspection)
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Bind the listeners and start serving
    ///
    /// Returns once both listeners are bound; serving continues on spawned
    /// tasks until [`SignalingServerHandle::shutdown`] is called.
    pub async fn start(self) -> crate::Result<SignalingServerHandle> {
        let listener = TcpListener::bind(self.config.bind_addr()?).await?;
        let local_addr = listener.local_addr()?;

        let health_listener = match self.config.health_addr()? {
            Some(addr) => Some(TcpListener::bind(addr).await?),
            None => None,
        };
        let health_addr = match &health_listener {
            Some(l) => Some(l.local_addr()?),
            None => None,
        };

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let monitor = LifecycleMonitor::spawn(Arc::clone(&self.registry));

        let health_task = health_listener.map(|listener| {
            let registry = Arc::clone(&self.registry);
            let shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                if let Err(e) = health::serve(listener, registry, shutdown_rx).await {
                    error!("{}", e);
                }
            })
        });

        let state = Arc::new(SharedState::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
        ));
        let accept_shutdown = shutdown_tx.clone();
        let accept_task = tokio::spawn(async move {
            let mut shutdown_rx = accept_shutdown.subscribe();
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                info!("Accepted WebSocket connection from {}", peer_addr);
                                let state = Arc::clone(&state);
                                let conn_shutdown = accept_shutdown.subscribe();
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, state, conn_shutdown).await {
                                        error!("WebSocket connection error from {}: {}", peer_addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept WebSocket connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Signaling server received shutdown signal");
                        break;
                    }
                }
            }
            info!("Signaling server accept loop exited");
        });

        info!("Signaling server listening on ws://{}", local_addr);

        Ok(SignalingServerHandle {
            local_addr,
            health_addr,
            registry: self.registry,
            shutdown_tx,
            accept_task,
            health_task,
            monitor,
        })
    }
}

/// Handle for controlling a running server
pub struct SignalingServerHandle {
    local_addr: SocketAddr,
    health_addr: Option<SocketAddr>,
    registry: Arc<Registry>,
    shutdown_tx: broadcast::Sender<()>,
    accept_task: JoinHandle<()>,
    health_task: Option<JoinHandle<()>>,
    monitor: MonitorHandle,
}

impl SignalingServerHandle {
    /// Bound WebSocket address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bound health address, if enabled
    pub fn health_addr(&self) -> Option<SocketAddr> {
        self.health_addr
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Stop accepting, close every connection and stop the monitor
    pub async fn shutdown(self) {
        info!("Sending shutdown signal to signaling server");
        let _ = self.shutdown_tx.send(());

        let _ = self.accept_task.await;
        if let Some(task) = self.health_task {
            let _ = task.await;
        }
        self.monitor.shutdown().await;
        info!("Signaling server stopped");
    }
}
