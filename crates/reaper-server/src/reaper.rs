//! Reaper orchestration.
//!
//! Wires the session manager, controller, and pruner together: bootstrap
//! (negotiate, ping, bind), the run loop, and the final best-effort report.

use crate::controller::Controller;
use crate::error::{ReaperError, Result};
use crate::pruner::Pruner;
use crate::session::SessionManager;
use reaper_core::{Config, FilterStore};
use reaper_runtime::{RuntimeClient, RuntimeError};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Listens for harness connections and prunes matching runtime resources
/// once a prune condition is met.
pub struct Reaper {
    cfg: Config,
    client: Arc<dyn RuntimeClient>,
    filters: FilterStore,
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
}

impl Reaper {
    /// Creates a reaper: negotiates the API version, verifies the runtime is
    /// reachable, and binds the listening socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime cannot be pinged within the request
    /// timeout or the socket cannot be bound.
    pub async fn new(cfg: Config, client: Arc<dyn RuntimeClient>) -> Result<Self> {
        client.negotiate_api_version().await;

        timeout(cfg.request_timeout, client.ping())
            .await
            .map_err(|_| RuntimeError::timeout("ping"))??;

        info!(
            port = cfg.port,
            connection_timeout = ?cfg.connection_timeout,
            reconnection_timeout = ?cfg.reconnection_timeout,
            request_timeout = ?cfg.request_timeout,
            shutdown_timeout = ?cfg.shutdown_timeout,
            remove_retries = cfg.remove_retries,
            retry_offset = %cfg.retry_offset,
            verbose = cfg.verbose,
            "starting"
        );

        let listener = TcpListener::bind(("0.0.0.0", cfg.port)).await?;
        let local_addr = listener.local_addr()?;

        // Harness libraries grep for this exact message; keep it stable.
        info!(address = %local_addr, "Started");

        Ok(Self {
            cfg,
            client,
            filters: FilterStore::new(),
            listener,
            local_addr,
            shutdown: CancellationToken::new(),
        })
    }

    /// The address the reaper is listening on, for when the port was
    /// OS-assigned.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the reaper until a prune completes or a fatal condition occurs.
    ///
    /// Cancelling `signal` starts the shutdown sequence; the prune itself is
    /// never interrupted, cleanup must complete.
    ///
    /// # Errors
    ///
    /// Fatal errors (see [`ReaperError::is_fatal`]) mean the reaper could not
    /// do its job; anything else is the joined report of an incomplete
    /// best-effort cleanup.
    pub async fn run(self, signal: CancellationToken) -> Result<()> {
        let (connected_tx, connected_rx) = mpsc::channel(1);
        let (disconnected_tx, disconnected_rx) = mpsc::channel(16);

        let manager = SessionManager::new(
            self.filters.clone(),
            connected_tx,
            disconnected_tx,
            self.shutdown.clone(),
        );
        tokio::spawn(manager.run(self.listener));

        let pruner = Pruner::new(self.cfg.clone(), Arc::clone(&self.client));
        let controller = Controller::new(
            self.cfg.clone(),
            self.filters.clone(),
            pruner.clone(),
            connected_rx,
            disconnected_rx,
            self.shutdown.clone(),
        );

        let waited = controller.prune_wait(signal).await;
        // Whatever the outcome, no further client is accepted or ACKed.
        self.shutdown.cancel();

        let result = match waited {
            Err(err) => Err(err),
            Ok((plan, mut errors)) => {
                errors.extend(pruner.execute(plan).await);
                ReaperError::join(errors).map_or(Ok(()), Err)
            }
        };

        info!("done");
        result
    }
}
