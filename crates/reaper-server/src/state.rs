//! Controller state tracking.
//!
//! The transition bookkeeping is kept separate from the event loop so it can
//! be exercised directly in tests. The event loop owns the single prune-check
//! timer; transitions tell it what to do with that timer via [`TimerCmd`].

use std::time::Duration;
use tokio::time::Instant;

/// Phase of the controller lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// No client has connected yet; the first-connection window is running.
    WaitingFirst,
    /// At least one client is connected.
    Active,
    /// All clients have left; the reconnection window is running.
    Idle,
    /// A shutdown signal arrived; the prune is forced at `deadline`.
    Shutdown {
        /// Instant after which waiting for changes to settle is abandoned.
        deadline: Instant,
    },
}

/// What the event loop should do with the prune-check timer after a
/// transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerCmd {
    /// Leave the timer as it is.
    Keep,
    /// Stop the timer.
    Disarm,
    /// (Re)start the timer with the given delay.
    Arm(Duration),
}

/// Connection bookkeeping for the lifecycle controller.
///
/// The live-client counter always equals connections accepted minus
/// disconnections observed and never goes negative.
#[derive(Debug)]
pub(crate) struct ControllerState {
    phase: Phase,
    clients: usize,
    reconnection_timeout: Duration,
    shutdown_timeout: Duration,
}

impl ControllerState {
    pub(crate) const fn new(reconnection_timeout: Duration, shutdown_timeout: Duration) -> Self {
        Self {
            phase: Phase::WaitingFirst,
            clients: 0,
            reconnection_timeout,
            shutdown_timeout,
        }
    }

    pub(crate) const fn clients(&self) -> usize {
        self.clients
    }

    pub(crate) const fn shutting_down(&self) -> bool {
        matches!(self.phase, Phase::Shutdown { .. })
    }

    /// Whether the prune-check firing means nobody ever connected.
    pub(crate) const fn never_connected(&self) -> bool {
        matches!(self.phase, Phase::WaitingFirst)
    }

    /// Whether a prune may still be postponed waiting for changes to settle.
    pub(crate) fn before_deadline(&self, now: Instant) -> bool {
        match self.phase {
            Phase::Shutdown { deadline } => now < deadline,
            _ => true,
        }
    }

    /// A client connected. Returns `None` when the connection must be
    /// rejected because shutdown is in progress.
    pub(crate) fn connected(&mut self) -> Option<TimerCmd> {
        match self.phase {
            Phase::Shutdown { .. } => None,
            Phase::WaitingFirst | Phase::Idle => {
                self.phase = Phase::Active;
                self.clients += 1;
                Some(TimerCmd::Disarm)
            }
            Phase::Active => {
                self.clients += 1;
                Some(TimerCmd::Keep)
            }
        }
    }

    /// A client disconnected.
    pub(crate) fn disconnected(&mut self) -> TimerCmd {
        self.clients = self.clients.saturating_sub(1);
        if self.clients > 0 {
            return TimerCmd::Keep;
        }

        match self.phase {
            Phase::Active => {
                self.phase = Phase::Idle;
                TimerCmd::Arm(self.reconnection_timeout)
            }
            // All clients left early: prune after the reconnection window
            // instead of sitting out the rest of the shutdown grace period.
            Phase::Shutdown { .. } => TimerCmd::Arm(self.reconnection_timeout),
            Phase::WaitingFirst | Phase::Idle => TimerCmd::Keep,
        }
    }

    /// The shutdown signal arrived. With no clients connected the prune runs
    /// immediately, otherwise after the grace period.
    pub(crate) fn signalled(&mut self, now: Instant) -> TimerCmd {
        self.phase = Phase::Shutdown {
            deadline: now + self.shutdown_timeout,
        };
        if self.clients == 0 {
            TimerCmd::Arm(Duration::ZERO)
        } else {
            TimerCmd::Arm(self.shutdown_timeout)
        }
    }
}
