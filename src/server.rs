//! HTTP server and graceful shutdown.
//!
//! On SIGTERM or Ctrl-C the server stops accepting, lets every in-flight
//! connection finish, then returns from [`Server::serve`]. Set the pod's
//! `terminationGracePeriodSeconds` above your slowest request.

use std::net::SocketAddr;

use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::Error;
use crate::mux::Mux;

/// The HTTP server.
pub struct Server {
    addr: String,
}

impl Server {
    /// Configures the server to bind to `addr` (`host:port`) when
    /// [`serve`](Server::serve) is called.
    ///
    /// ```rust,no_run
    /// use trellis::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Accept connections and run each request through `mux`.
    ///
    /// Returns after a full graceful shutdown.
    pub async fn serve(self, mux: Mux) -> Result<(), Error> {
        let addr: SocketAddr = self
            .addr
            .parse()
            .map_err(|source| Error::InvalidAddr { addr: self.addr.clone(), source })?;
        let listener = TcpListener::bind(addr).await?;
        let service = mux.into_service();

        info!(addr = %addr, "trellis listening");

        let mut tasks = tokio::task::JoinSet::new();
        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Shutdown first, so a queued accept never wins over SIGTERM.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, peer) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let svc = TowerToHyperService::new(service.clone());
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %peer, "connection error: {e}");
                        }
                    });
                }

                // Reap finished connections so the set stays bounded.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("trellis stopped");
        Ok(())
    }
}

/// Resolves on the first SIGTERM or Ctrl-C. Windows only has Ctrl-C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
