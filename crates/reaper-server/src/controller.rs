//! Lifecycle controller.
//!
//! A single decision loop that tracks live clients and decides when the
//! prune may run. It suspends only on its event channels, the signal, and
//! one timer; the prune conditions are:
//!
//! - no client connects within the connection timeout (fatal),
//! - no client reconnects within the reconnection timeout after the last
//!   one left,
//! - a shutdown signal, immediately with no clients and after the grace
//!   period otherwise.

use crate::error::ReaperError;
use crate::pruner::{Pruner, ResourcePlan};
use crate::session::Registration;
use crate::state::{ControllerState, TimerCmd};
use chrono::Utc;
use reaper_core::{Config, FilterStore};
use std::net::SocketAddr;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub(crate) struct Controller {
    cfg: Config,
    filters: FilterStore,
    pruner: Pruner,
    connected: mpsc::Receiver<Registration>,
    disconnected: mpsc::Receiver<SocketAddr>,
    shutdown: CancellationToken,
}

impl Controller {
    pub(crate) const fn new(
        cfg: Config,
        filters: FilterStore,
        pruner: Pruner,
        connected: mpsc::Receiver<Registration>,
        disconnected: mpsc::Receiver<SocketAddr>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            filters,
            pruner,
            connected,
            disconnected,
            shutdown,
        }
    }

    /// Waits for a prune condition and returns the plan to execute together
    /// with the errors collected while computing it.
    ///
    /// # Errors
    ///
    /// Returns an error if no client ever connected within the connection
    /// timeout, or if the filter store is unusable.
    pub(crate) async fn prune_wait(
        mut self,
        signal: CancellationToken,
    ) -> Result<(ResourcePlan, Vec<ReaperError>), ReaperError> {
        let mut state = ControllerState::new(
            self.cfg.reconnection_timeout,
            self.cfg.shutdown_timeout,
        );
        let mut armed = true;
        let prune_check = time::sleep(self.cfg.connection_timeout);
        tokio::pin!(prune_check);

        loop {
            tokio::select! {
                Some(registration) = self.connected.recv() => {
                    let addr = registration.addr;
                    if let Some(cmd) = state.connected() {
                        // The session reads nothing until this ack arrives.
                        let _ = registration.ack.send(());
                        info!(address = %addr, clients = state.clients(), "client connected");
                        apply_timer(cmd, &mut armed, prune_check.as_mut());
                    } else {
                        // Dropping the registration closes the client
                        // without an ACK.
                        warn!(address = %addr, "shutdown, rejecting client");
                    }
                }
                Some(addr) = self.disconnected.recv() => {
                    let cmd = state.disconnected();
                    info!(address = %addr, clients = state.clients(), "client disconnected");
                    apply_timer(cmd, &mut armed, prune_check.as_mut());
                }
                () = signal.cancelled(), if !state.shutting_down() => {
                    info!(
                        clients = state.clients(),
                        shutdown_timeout = ?self.cfg.shutdown_timeout,
                        "signal received"
                    );
                    // Close the listener so retrying clients go elsewhere.
                    self.shutdown.cancel();
                    let cmd = state.signalled(Instant::now());
                    apply_timer(cmd, &mut armed, prune_check.as_mut());
                }
                () = &mut prune_check, if armed => {
                    if state.never_connected() {
                        return Err(ReaperError::FirstConnection(self.cfg.connection_timeout));
                    }
                    if state.clients() > 0 {
                        warn!(clients = state.clients(), "prune check");
                    } else {
                        info!(clients = state.clients(), "prune check");
                    }

                    let since = Utc::now() + self.cfg.retry_offset;
                    let snapshot = self.filters.snapshot()?;
                    let (plan, errors) = self.pruner.plan(since, &snapshot).await;

                    let changes: Vec<String> = errors
                        .iter()
                        .filter(|err| err.is_changes_detected())
                        .map(ToString::to_string)
                        .collect();
                    if !changes.is_empty() {
                        if state.before_deadline(Instant::now()) {
                            warn!(error = %changes.join("; "), "change detected, waiting again");
                            prune_check
                                .as_mut()
                                .reset(Instant::now() + self.cfg.changes_retry_interval);
                            continue;
                        }
                        warn!("shutdown timeout reached, forcing prune");
                    }

                    return Ok((plan, errors));
                }
                else => {
                    // Both event channels are gone; drive the next loop
                    // iteration straight into a prune check.
                    warn!("event sources closed, forcing prune check");
                    armed = true;
                    prune_check.as_mut().reset(Instant::now());
                }
            }
        }
    }
}

fn apply_timer(cmd: TimerCmd, armed: &mut bool, timer: Pin<&mut Sleep>) {
    match cmd {
        TimerCmd::Keep => {}
        TimerCmd::Disarm => *armed = false,
        TimerCmd::Arm(delay) => {
            *armed = true;
            timer.reset(Instant::now() + delay);
        }
    }
}
