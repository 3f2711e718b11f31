//! Traffic counters for a session.

use std::fmt;

/// Lifetime counters kept by the session manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrafficStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub frames_received: u64,
    pub bytes_received: u64,
    /// Inbound frames discarded (untyped payload, unknown type or malformed
    /// event).
    pub messages_dropped: u64,
    /// Outbound messages refused before reaching the socket.
    pub sends_rejected: u64,
    pub connections: u64,
    pub disconnects: u64,
}

impl TrafficStats {
    pub fn record_sent(&mut self, bytes: usize) {
        self.frames_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    /// Raw bytes off the socket. Frames are counted separately once decoded.
    pub fn record_received_bytes(&mut self, bytes: usize) {
        self.bytes_received += bytes as u64;
    }

    pub fn record_frame_received(&mut self) {
        self.frames_received += 1;
    }

    pub fn record_dropped(&mut self) {
        self.messages_dropped += 1;
    }

    pub fn record_rejected(&mut self) {
        self.sends_rejected += 1;
    }

    pub fn record_connected(&mut self) {
        self.connections += 1;
    }

    pub fn record_disconnected(&mut self) {
        self.disconnects += 1;
    }

    /// Mean inbound frame size in bytes, `None` before the first frame.
    pub fn mean_frame_in(&self) -> Option<f64> {
        (self.frames_received > 0).then(|| self.bytes_received as f64 / self.frames_received as f64)
    }
}

impl fmt::Display for TrafficStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "out {} frames / {} B, in {} frames / {} B, dropped {}, rejected {}, connections {}",
            self.frames_sent,
            self.bytes_sent,
            self.frames_received,
            self.bytes_received,
            self.messages_dropped,
            self.sends_rejected,
            self.connections,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let mut stats = TrafficStats::default();
        stats.record_sent(10);
        stats.record_sent(6);
        stats.record_received_bytes(40);
        stats.record_frame_received();
        stats.record_frame_received();

        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.bytes_sent, 16);
        assert_eq!(stats.mean_frame_in(), Some(20.0));
    }

    #[test]
    fn test_mean_without_frames() {
        assert_eq!(TrafficStats::default().mean_frame_in(), None);
    }
}
