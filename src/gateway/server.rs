//! Gateway server

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use super::admin::create_admin_router;
use super::filter::ConnectionFilter;
use super::listener::{ConnectionHandler, serve_connections};
use crate::authorize::{Authorizer, DecisionCache, HttpAuthorizer};
use crate::config::Config;
use crate::mtls::build_tls_config;
use crate::stats::StatsRegistry;
use crate::{Error, Result};

/// Connect authorization gateway
pub struct Gateway {
    /// Configuration
    config: Config,
    /// Shared allow/deny counters
    stats: Arc<StatsRegistry>,
    /// Verdict cache, when enabled
    cache: Option<Arc<DecisionCache>>,
    /// Per-connection state shared by every task
    handler: Arc<ConnectionHandler>,
}

impl Gateway {
    /// Create a gateway calling the configured Authorize endpoint over HTTP.
    ///
    /// # Errors
    ///
    /// Returns a fatal error for invalid configuration or unreadable TLS
    /// material.
    pub fn new(config: Config) -> Result<Self> {
        let authorizer = HttpAuthorizer::new(&config.gateway_config()?)?;
        Self::with_authorizer(config, Arc::new(authorizer))
    }

    /// Create a gateway with a custom verdict source.
    ///
    /// # Errors
    ///
    /// Same as [`Gateway::new`].
    pub fn with_authorizer(config: Config, authorizer: Arc<dyn Authorizer>) -> Result<Self> {
        config.validate()?;
        let gateway_config = Arc::new(config.gateway_config()?);

        let tls_config = build_tls_config(&config.tls)?;
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));

        let stats = Arc::new(StatsRegistry::new(config.admin.stat_prefix.clone()));
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(DecisionCache::from_config(&config.cache)));

        let mut filter = ConnectionFilter::new(
            Arc::clone(&gateway_config),
            authorizer,
            Arc::clone(&stats),
        );
        if let Some(cache) = &cache {
            filter = filter.with_cache(Arc::clone(cache));
        }

        let handler = Arc::new(ConnectionHandler {
            acceptor,
            filter: Arc::new(filter),
            upstream: config.upstream.socket_addr()?,
            handshake_timeout: config.listener.handshake_timeout,
            connect_timeout: config.upstream.connect_timeout,
        });

        info!(
            target_service = %gateway_config.target,
            authorize_url = %gateway_config.authorize_url,
            upstream = %config.upstream.address,
            cache = config.cache.enabled,
            "Gateway configured"
        );

        Ok(Self {
            config,
            stats,
            cache,
            handler,
        })
    }

    /// Shared allow/deny counters
    #[must_use]
    pub fn stats(&self) -> Arc<StatsRegistry> {
        Arc::clone(&self.stats)
    }

    /// Bind the configured addresses and run until SIGINT/SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if a listener cannot be bound.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listener.socket_addr()?).await?;
        let admin = if self.config.admin.enabled {
            Some(TcpListener::bind(self.config.admin.socket_addr()?).await?)
        } else {
            None
        };

        self.serve(listener, admin, shutdown_signal()).await
    }

    /// Serve on already-bound listeners until `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if a listener address cannot be read.
    pub async fn serve<F>(
        self,
        listener: TcpListener,
        admin: Option<TcpListener>,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, _) = broadcast::channel(1);

        info!(address = %listener.local_addr()?, "Accepting TLS connections");

        let admin_task = match admin {
            Some(admin) => {
                info!(address = %admin.local_addr()?, "Admin listener started");
                let app = create_admin_router(Arc::clone(&self.stats));
                let mut shutdown_rx = shutdown_tx.subscribe();
                Some(tokio::spawn(async move {
                    axum::serve(admin, app)
                        .with_graceful_shutdown(async move {
                            let _ = shutdown_rx.recv().await;
                        })
                        .await
                }))
            }
            None => None,
        };

        // Start cache maintenance task
        if let Some(cache) = &self.cache {
            let cache = Arc::clone(cache);
            let mut shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(cache.ttl());
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            cache.evict_expired();
                            debug!(entries = cache.len(), evictions = cache.evictions(), "Decision cache swept");
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            });
        }

        let accept_rx = shutdown_tx.subscribe();
        let trigger = shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown.await;
            let _ = trigger.send(());
        });

        serve_connections(listener, Arc::clone(&self.handler), accept_rx).await;

        if let Some(task) = admin_task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Admin listener failed"),
                Err(e) => return Err(Error::Internal(format!("Admin task panicked: {e}"))),
            }
        }

        let stats = self.stats.snapshot();
        info!(
            allowed = stats.allowed,
            denied = stats.denied,
            "Gateway stopped"
        );
        Ok(())
    }
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
