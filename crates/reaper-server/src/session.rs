//! Client session handling.
//!
//! Owns the listening socket, translates the line protocol into filter-store
//! updates, and reports connection events to the controller.

use reaper_core::FilterStore;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reply sent for every non-empty filter line, whether or not it parsed.
const ACK: &[u8] = b"ACK\n";

/// A freshly accepted connection waiting for the controller to account for
/// it.
///
/// The accept loop does not read a byte from the socket until the controller
/// acknowledges the registration, which keeps the client counter ahead of any
/// disconnect the session could produce.
#[derive(Debug)]
pub(crate) struct Registration {
    pub(crate) addr: SocketAddr,
    pub(crate) ack: oneshot::Sender<()>,
}

/// Accept loop plus per-connection protocol handling.
pub(crate) struct SessionManager {
    filters: FilterStore,
    connected: mpsc::Sender<Registration>,
    disconnected: mpsc::Sender<SocketAddr>,
    shutdown: CancellationToken,
}

impl SessionManager {
    pub(crate) const fn new(
        filters: FilterStore,
        connected: mpsc::Sender<Registration>,
        disconnected: mpsc::Sender<SocketAddr>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            filters,
            connected,
            disconnected,
            shutdown,
        }
    }

    /// Accepts connections until shutdown, registering each with the
    /// controller before any bytes are read. Dropping out of this function
    /// closes the listener.
    pub(crate) async fn run(self, listener: TcpListener) {
        info!("client processing started");

        loop {
            let (stream, addr) = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        error!(error = %err, "accept");
                        continue;
                    }
                },
            };

            let (ack_tx, ack_rx) = oneshot::channel();
            let registration = Registration { addr, ack: ack_tx };
            let registered = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => false,
                sent = self.connected.send(registration) => {
                    sent.is_ok() && ack_rx.await.is_ok()
                }
            };
            if !registered {
                // Closing without an ACK makes a retrying client reconnect
                // to a freshly launched reaper instead of one about to exit.
                warn!(address = %addr, "shutdown, aborting client");
                drop(stream);
                continue;
            }

            let filters = self.filters.clone();
            let disconnected = self.disconnected.clone();
            tokio::spawn(handle(stream, addr, filters, disconnected));
        }

        info!("client processing stopped");
    }
}

/// Reads newline-delimited filter lines from one client until the connection
/// closes, acknowledging each attempt.
async fn handle(
    stream: TcpStream,
    addr: SocketAddr,
    filters: FilterStore,
    disconnected: mpsc::Sender<SocketAddr>,
) {
    let (read_half, write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut writer = write_half;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => process_line(&line, addr, &filters, &mut writer).await,
            Ok(None) => break,
            Err(err) => {
                error!(address = %addr, error = %err, "read");
                break;
            }
        }
    }

    // Fully close the socket before the disconnect is observed.
    drop(lines);
    drop(writer);
    let _ = disconnected.send(addr).await;
}

async fn process_line(
    line: &str,
    addr: SocketAddr,
    filters: &FilterStore,
    writer: &mut OwnedWriteHalf,
) {
    if line.is_empty() {
        warn!(address = %addr, "empty filter received");
        return;
    }

    match filters.add(line) {
        Ok(true) => {}
        Ok(false) => debug!(address = %addr, "duplicate filter"),
        Err(err) => error!(address = %addr, error = %err, "add filter"),
    }

    if let Err(err) = writer.write_all(ACK).await {
        error!(address = %addr, error = %err, "ack write");
    }
}
