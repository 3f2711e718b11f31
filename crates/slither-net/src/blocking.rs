//! Thread-per-connection transport over a blocking [`std::net::TcpStream`].
//!
//! `connect` runs on the caller thread. Once the socket is up a named reader
//! thread reads exactly one header, validates it, reads exactly one body and
//! posts the whole frame, until the stream fails. Sends write on a cloned
//! handle of the same socket from the owner thread, bounded by the write
//! timeout so a peer that stops reading cannot stall the caller.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::framing::{self, HEADER_LEN};
use crate::transport::{
    ConnectionState, ConnectionStateWatch, DisconnectReason, EventSender, LinkSignal, Transport,
    TransportError,
};

/// Tuning for [`BlockingTransport`].
#[derive(Debug, Clone)]
pub struct BlockingConfig {
    /// Upper bound for the TCP handshake. `None` uses the OS default.
    pub connect_timeout: Option<Duration>,
    /// Socket read timeout. Bounds how long the reader takes to notice a
    /// local disconnect.
    pub read_timeout: Duration,
    /// Socket write timeout. A send that cannot finish within it fails and
    /// takes the connection down.
    pub write_timeout: Duration,
    /// Pause before retrying a read that returned would-block or timed out.
    pub retry_sleep: Duration,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Some(Duration::from_secs(5)),
            read_timeout: Duration::from_millis(200),
            write_timeout: Duration::from_secs(2),
            retry_sleep: Duration::from_millis(1),
        }
    }
}

struct ActiveLink {
    signal: Arc<LinkSignal>,
    writer: TcpStream,
    reader: Option<JoinHandle<()>>,
}

/// Blocking-socket transport with a background reader thread.
pub struct BlockingTransport {
    config: BlockingConfig,
    state: Arc<ConnectionStateWatch>,
    active: Option<ActiveLink>,
}

impl BlockingTransport {
    pub fn new(config: BlockingConfig) -> Self {
        Self {
            config,
            state: Arc::new(ConnectionStateWatch::new()),
            active: None,
        }
    }

    /// Shut down and join whatever link is left over.
    fn release(&mut self, reason: DisconnectReason) {
        let Some(mut link) = self.active.take() else {
            return;
        };
        link.signal.close(reason);
        let _ = link.writer.shutdown(Shutdown::Both);
        if let Some(handle) = link.reader.take()
            && handle.thread().id() != thread::current().id()
            && handle.join().is_err()
        {
            warn!("reader thread panicked");
        }
    }
}

impl Default for BlockingTransport {
    fn default() -> Self {
        Self::new(BlockingConfig::default())
    }
}

impl Drop for BlockingTransport {
    fn drop(&mut self) {
        self.release(DisconnectReason::Local);
    }
}

impl Transport for BlockingTransport {
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
        self.release(DisconnectReason::Local);

        let signal = LinkSignal::new(events, Arc::clone(&self.state));
        let stream = match open_stream(host, port, &self.config) {
            Ok(stream) => stream,
            Err(e) => {
                signal.close(DisconnectReason::ConnectFailed(e.to_string()));
                return Err(e);
            }
        };
        let reader_stream = match stream.try_clone() {
            Ok(clone) => clone,
            Err(e) => {
                signal.close(DisconnectReason::ConnectFailed(e.to_string()));
                return Err(e.into());
            }
        };

        signal.open();
        info!("Connected to {host}:{port}");

        let reader_signal = Arc::clone(&signal);
        let retry = self.config.retry_sleep;
        let spawned = thread::Builder::new()
            .name("slither-net-reader".into())
            .spawn(move || read_loop(reader_stream, &reader_signal, retry));

        let reader = match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                signal.close(DisconnectReason::ReadFailed(e.to_string()));
                let _ = stream.shutdown(Shutdown::Both);
                return Err(e.into());
            }
        };

        self.active = Some(ActiveLink {
            signal,
            writer: stream,
            reader,
        });
        Ok(())
    }

    fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let Some(link) = self.active.as_mut().filter(|link| link.signal.is_open()) else {
            return Err(TransportError::NotConnected);
        };

        if let Err(e) = link.writer.write_all(frame).and_then(|()| link.writer.flush()) {
            warn!(error = %e, "write failed, disconnecting");
            link.signal
                .close(DisconnectReason::WriteFailed(e.to_string()));
            let _ = link.writer.shutdown(Shutdown::Both);
            return Err(e.into());
        }
        trace!(len = frame.len(), "frame written");
        Ok(())
    }

    fn close(&mut self, reason: DisconnectReason) {
        self.release(reason);
    }

    fn state_watch(&self) -> &Arc<ConnectionStateWatch> {
        &self.state
    }

    fn name(&self) -> &'static str {
        "blocking"
    }
}

fn open_stream(
    host: &str,
    port: u16,
    config: &BlockingConfig,
) -> Result<TcpStream, TransportError> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| TransportError::Resolve(format!("{host}:{port}: {e}")))?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        let attempt = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                stream.set_read_timeout(Some(config.read_timeout))?;
                stream.set_write_timeout(Some(config.write_timeout))?;
                return Ok(stream);
            }
            Err(e) => {
                debug!(%addr, error = %e, "connect attempt failed");
                last_err = Some(e);
            }
        }
    }

    Err(match last_err {
        Some(e) => TransportError::Io(e),
        None => TransportError::Resolve(format!("{host}:{port}: no addresses")),
    })
}

fn read_loop(mut stream: TcpStream, signal: &LinkSignal, retry: Duration) {
    let reason = loop {
        let mut header = [0u8; HEADER_LEN];
        if let Err(reason) = read_full(&mut stream, &mut header, signal, retry) {
            break reason;
        }

        let len = match framing::parse_header(header) {
            Ok(len) => len,
            Err(e) => {
                warn!(error = %e, "bad frame header");
                break DisconnectReason::Protocol(e.to_string());
            }
        };

        let mut frame = vec![0u8; HEADER_LEN + len];
        frame[..HEADER_LEN].copy_from_slice(&header);
        if let Err(reason) = read_full(&mut stream, &mut frame[HEADER_LEN..], signal, retry) {
            break reason;
        }

        trace!(len, "frame received");
        if !signal.deliver(frame) {
            break DisconnectReason::Local;
        }
    };

    if signal.close(reason.clone()) {
        info!(%reason, "reader stopped");
    }
    let _ = stream.shutdown(Shutdown::Both);
}

/// Fill `buf` completely, retrying partial and timed-out reads.
fn read_full(
    stream: &mut TcpStream,
    buf: &mut [u8],
    signal: &LinkSignal,
    retry: Duration,
) -> Result<(), DisconnectReason> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(DisconnectReason::PeerClosed),
            Ok(n) => filled += n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                if !signal.is_open() {
                    return Err(DisconnectReason::Local);
                }
                thread::sleep(retry);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                return Err(if signal.is_open() {
                    DisconnectReason::ReadFailed(e.to_string())
                } else {
                    DisconnectReason::Local
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::sync::mpsc;

    use crate::transport::TransportEvent;

    #[test]
    fn test_connect_refused_reports_disconnect_once() {
        // Bind then drop to get a port nobody listens on.
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let (tx, rx) = mpsc::channel();
        let mut transport = BlockingTransport::default();
        assert!(transport.connect("127.0.0.1", port, tx).is_err());
        assert_eq!(transport.state(), ConnectionState::Disconnected);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            TransportEvent::Disconnected(DisconnectReason::ConnectFailed(_))
        ));
    }

    #[test]
    fn test_send_without_connection_fails() {
        let mut transport = BlockingTransport::default();
        assert!(matches!(
            transport.send(&[0, 0, 0, 1, b'x']),
            Err(TransportError::NotConnected)
        ));
    }

    #[test]
    fn test_second_connect_rejected_while_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let (tx, _rx) = mpsc::channel();
        let mut transport = BlockingTransport::default();
        transport.connect("127.0.0.1", port, tx.clone()).unwrap();
        let _peer = listener.accept().unwrap();

        assert!(matches!(
            transport.connect("127.0.0.1", port, tx),
            Err(TransportError::AlreadyActive(ConnectionState::Connected))
        ));
        transport.disconnect();
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_send_to_stalled_peer_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let (tx, rx) = mpsc::channel();
        let mut transport = BlockingTransport::new(BlockingConfig {
            write_timeout: Duration::from_millis(100),
            ..Default::default()
        });
        transport.connect("127.0.0.1", port, tx).unwrap();
        // Accepted but never read from.
        let _peer = listener.accept().unwrap();

        let chunk = vec![0u8; 1 << 20];
        let started = std::time::Instant::now();
        let mut failure = None;
        for _ in 0..256 {
            if let Err(e) = transport.send(&chunk) {
                failure = Some(e);
                break;
            }
        }

        assert!(matches!(failure, Some(TransportError::Io(_))));
        assert!(started.elapsed() < Duration::from_secs(30));
        assert_eq!(transport.state(), ConnectionState::Disconnected);

        let disconnects: Vec<_> = rx
            .try_iter()
            .filter_map(|e| match e {
                TransportEvent::Disconnected(reason) => Some(reason),
                _ => None,
            })
            .collect();
        assert_eq!(disconnects.len(), 1);
        assert!(matches!(disconnects[0], DisconnectReason::WriteFailed(_)));
    }
}
