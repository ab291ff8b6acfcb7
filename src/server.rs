// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Boat server core implementation.

use crate::config::{ConfigError, ServerConfig};
use crate::repository::RepositoryLayout;
use crate::tls;
use std::io;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

pub mod connection;
pub mod framing;
pub mod protocol;
pub mod registry;

pub use connection::ConnectionSupervisor;
pub use registry::{User, UserRegistry};

/// Shared, read-only state handed to every connection supervisor.
#[derive(Debug)]
pub struct ServerContext {
    pub registry: UserRegistry,
    pub layout: RepositoryLayout,
}

/// Boat server: TLS listener plus shared context.
#[derive(Clone)]
pub struct BoatServer {
    config: Arc<ServerConfig>,
    ctx: Arc<ServerContext>,
    acceptor: TlsAcceptor,
    shutdown: Arc<tokio::sync::Notify>,
}

impl BoatServer {
    /// Create a new server from a validated configuration.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let registry = UserRegistry::from_config(&config.users);
        let layout = RepositoryLayout::new(&config.repository_root);
        let acceptor = tls::load_acceptor(&config.tls_cert_path, &config.tls_key_path)?;

        Ok(Self {
            config: Arc::new(config),
            ctx: Arc::new(ServerContext { registry, layout }),
            acceptor,
            shutdown: Arc::new(tokio::sync::Notify::new()),
        })
    }

    /// Bootstrap the repository tree and accept connections until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        self.ctx.layout.bootstrap(&self.ctx.registry).await?;

        let addr = format!("{}:{}", self.config.listen_address, self.config.listen_port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        info!("boat server listening on {}", addr);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            info!("new connection from {}", peer_addr);

                            let acceptor = self.acceptor.clone();
                            let ctx = self.ctx.clone();

                            tokio::spawn(async move {
                                // the protocol starts only on a secured stream
                                let tls_stream = match acceptor.accept(stream).await {
                                    Ok(tls_stream) => tls_stream,
                                    Err(e) => {
                                        warn!("TLS handshake failed for {}: {}", peer_addr, e);
                                        return;
                                    }
                                };

                                let supervisor =
                                    ConnectionSupervisor::new(tls_stream, peer_addr, ctx);
                                if let Err(e) = supervisor.run().await {
                                    warn!("connection error from {}: {}", peer_addr, e);
                                }
                                debug!("connection finished: {}", peer_addr);
                            });
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Signal the accept loop to stop.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Number of configured users.
    pub fn user_count(&self) -> usize {
        self.ctx.registry.len()
    }
}

/// Server error types.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("bind error: {0}")]
    Bind(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
