//! Event-driven transport on a tokio runtime.
//!
//! The caller supplies a runtime [`Handle`]; nothing here blocks the owner
//! thread. Each connection attempt spawns a connector task that becomes the
//! reader once the socket is up, plus a writer task fed by a bounded
//! channel. A full channel means the peer stopped reading, and the link is
//! closed instead of queueing without limit. Reads return whatever the socket holds and go through a
//! [`FrameAssembler`], so a read that spans frame boundaries loses nothing.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::framing::FrameAssembler;
use crate::transport::{
    ConnectionState, ConnectionStateWatch, DisconnectReason, EventSender, LinkSignal, Transport,
    TransportError,
};

/// Tuning for [`EventedTransport`].
#[derive(Debug, Clone)]
pub struct EventedConfig {
    /// Upper bound for the TCP handshake.
    pub connect_timeout: Duration,
    /// Size of the scratch buffer handed to each socket read.
    pub read_chunk: usize,
    /// Frames that may wait for the writer task.
    pub outbound_queue: usize,
}

impl Default for EventedConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            read_chunk: 4096,
            outbound_queue: 64,
        }
    }
}

struct EventedLink {
    signal: Arc<LinkSignal>,
    outbound: mpsc::Sender<Vec<u8>>,
    /// Sending `true` stops the reader and writer tasks.
    shutdown_tx: watch::Sender<bool>,
}

/// Non-blocking transport driven by tokio tasks.
pub struct EventedTransport {
    runtime: Handle,
    config: EventedConfig,
    state: Arc<ConnectionStateWatch>,
    active: Option<EventedLink>,
}

impl EventedTransport {
    pub fn new(runtime: Handle, config: EventedConfig) -> Self {
        Self {
            runtime,
            config,
            state: Arc::new(ConnectionStateWatch::new()),
            active: None,
        }
    }
}

impl Drop for EventedTransport {
    fn drop(&mut self) {
        self.close(DisconnectReason::Local);
    }
}

impl Transport for EventedTransport {
    fn connect(
        &mut self,
        host: &str,
        port: u16,
        events: EventSender,
    ) -> Result<(), TransportError> {
        let current = self.state.current();
        if current != ConnectionState::Disconnected {
            return Err(TransportError::AlreadyActive(current));
        }
        self.close(DisconnectReason::Local);

        let signal = LinkSignal::new(events, Arc::clone(&self.state));
        let (outbound, outbound_rx) = mpsc::channel(self.config.outbound_queue.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        self.runtime.spawn(run_link(
            format!("{host}:{port}"),
            self.config.clone(),
            Arc::clone(&signal),
            outbound_rx,
            shutdown_rx,
        ));

        self.active = Some(EventedLink {
            signal,
            outbound,
            shutdown_tx,
        });
        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let Some(link) = self.active.as_ref().filter(|link| link.signal.is_open()) else {
            return Err(TransportError::NotConnected);
        };
        let queued = link.outbound.try_send(frame.to_vec());
        match queued {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    capacity = self.config.outbound_queue,
                    "outbound queue full, disconnecting"
                );
                self.close(DisconnectReason::WriteFailed("outbound queue full".into()));
                Err(TransportError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(TransportError::NotConnected),
        }
    }

    fn close(&mut self, reason: DisconnectReason) {
        let Some(link) = self.active.take() else {
            return;
        };
        link.signal.close(reason);
        let _ = link.shutdown_tx.send(true);
    }

    fn state_watch(&self) -> &Arc<ConnectionStateWatch> {
        &self.state
    }

    fn name(&self) -> &'static str {
        "evented"
    }
}

async fn run_link(
    addr: String,
    config: EventedConfig,
    signal: Arc<LinkSignal>,
    outbound_rx: mpsc::Receiver<Vec<u8>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(&addr)).await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            signal.close(DisconnectReason::ConnectFailed(e.to_string()));
            return;
        }
        Err(_) => {
            signal.close(DisconnectReason::ConnectFailed(format!(
                "timed out after {:?}",
                config.connect_timeout
            )));
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "could not set TCP_NODELAY");
    }

    // Closed while the handshake was in flight.
    if !signal.open() {
        return;
    }
    info!("Connected to {addr}");

    let (reader, writer) = stream.into_split();

    let writer_signal = Arc::clone(&signal);
    let mut writer_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        write_loop(writer, outbound_rx, &writer_signal, &mut writer_shutdown).await;
    });

    read_loop(reader, config.read_chunk, &signal, &mut shutdown_rx).await;
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    chunk: usize,
    signal: &LinkSignal,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let mut assembler = FrameAssembler::new();
    let mut buf = vec![0u8; chunk.max(1)];

    loop {
        tokio::select! {
            result = reader.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        if signal.close(DisconnectReason::PeerClosed) {
                            info!("Server closed the connection");
                        }
                        return;
                    }
                    Ok(n) => {
                        trace!(n, "bytes received");
                        match assembler.push(&buf[..n]) {
                            Ok(frames) => {
                                for frame in frames {
                                    if !signal.deliver(frame) {
                                        return;
                                    }
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "bad frame header");
                                signal.close(DisconnectReason::Protocol(e.to_string()));
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "read failed");
                        signal.close(DisconnectReason::ReadFailed(e.to_string()));
                        return;
                    }
                }
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    return;
                }
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut outbound_rx: mpsc::Receiver<Vec<u8>>,
    signal: &LinkSignal,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = writer.write_all(&frame).await {
                    warn!(error = %e, "write failed, disconnecting");
                    signal.close(DisconnectReason::WriteFailed(e.to_string()));
                    break;
                }
                trace!(len = frame.len(), "frame written");
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    let _ = writer.shutdown().await;
}
