//! Compile-time protocol tuning.
//!
//! The `NodeConfig` trait gathers the window geometry, retry budgets, and
//! timeouts in one place so a test harness can narrow a window or shorten
//! a timeout without touching protocol code. `DefaultConfig` carries the
//! values the protocol was dimensioned with.

use crate::time::Duration;

/// Configuration trait for protocol constants.
pub trait NodeConfig {
    /// Size of the modular sequence space (a power of two).
    const SEQ_COUNT: u8;

    /// Sequences a receiver accepts ahead of the last in-order one.
    const RECEIVE_WINDOW_SIZE: u8;

    /// Unacknowledged sequences a transmitter keeps in flight.
    const SEND_WINDOW_SIZE: u8;

    /// Largest number of DATA packets one session may carry.
    const MAX_SESSION_PACKETS: usize;

    /// Discovery pings sent while finding neighbors.
    const PING_REPEAT_COUNT: u8;

    /// Spacing between repeated discovery pings.
    const PING_REPEAT_SPACING: Duration;

    /// Grace period for straggler pongs after the last discovery ping.
    const ASSIGN_ID_DELAY: Duration;

    /// Attempts for the id request before self-assigning.
    const ADDRESS_ATTEMPTS: u8;

    /// Per-attempt ack timeout of the id request.
    const ADDRESS_TIMEOUT: Duration;

    /// Hop budget of a freshly flooded link-state update.
    const LINK_STATE_TTL: u8;

    /// Delay bounds (ms) for scheduling a link-state flood.
    const UPDATE_DELAY_MS: (u64, u64);

    /// Delay bounds (ms) for pongs, request replies, and relays.
    const REPLY_DELAY_MS: (u64, u64);

    /// Delay per known id before the gap-fill sweep runs.
    const GAP_FILL_DELAY_PER_ID: Duration;

    /// Attempts for each gap-fill link-state request.
    const GAP_FILL_ATTEMPTS: u8;

    /// Per-neighbor ack timeout of a gap-fill request.
    const GAP_FILL_TIMEOUT_PER_NEIGHBOR: Duration;

    /// Keepalive period; a pong is emitted when the node was silent for
    /// this long.
    const KEEPALIVE_PERIOD: Duration;

    /// Window over which a silent neighbor is declared lost.
    const INACTIVITY_PERIOD: Duration;

    /// Attempts for the session-open announcement.
    const SESSION_ATTEMPTS: u8;

    /// Per-neighbor ack timeout of the session-open announcement.
    const SESSION_TIMEOUT_PER_NEIGHBOR: Duration;

    /// Longest wait for session acks before transmitting best-effort.
    const SESSION_ACK_TIMEOUT: Duration;

    /// Pause between the session handshake and the first DATA packet,
    /// letting relays wake up.
    const TRANSMIT_START_DELAY: Duration;

    /// Attempts for each DATA packet.
    const DATA_ATTEMPTS: u8;

    /// Per-receiver ack timeout of a DATA packet.
    const DATA_TIMEOUT_PER_RECEIVER: Duration;

    /// Delay bounds (ms) for scheduling a DATA packet.
    const DATA_DELAY_MS: (u64, u64);

    /// Stagger step between acks of peers sharing an upstream hop.
    const ACK_STAGGER_STEP: Duration;

    /// A send window stalled longer than this aborts the session.
    const WINDOW_STALL_TIMEOUT: Duration;

    /// Wait for the trailing acks after the last DATA packet.
    const FINAL_ACK_TIMEOUT: Duration;

    /// Cap on waiting for the transport's done-sending notification.
    const FINISHED_SENDING_CAP: Duration;
}

/// The values the protocol was dimensioned with: a 4-bit sequence space
/// with windows of four, on an audio channel where one long frame takes a
/// noticeable fraction of a second.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConfig;

impl NodeConfig for DefaultConfig {
    const SEQ_COUNT: u8 = 16;
    const RECEIVE_WINDOW_SIZE: u8 = 4;
    const SEND_WINDOW_SIZE: u8 = 4;
    const MAX_SESSION_PACKETS: usize = 16;
    const PING_REPEAT_COUNT: u8 = 2;
    const PING_REPEAT_SPACING: Duration = Duration::from_millis(1000);
    const ASSIGN_ID_DELAY: Duration = Duration::from_millis(1000);
    const ADDRESS_ATTEMPTS: u8 = 3;
    const ADDRESS_TIMEOUT: Duration = Duration::from_millis(3000);
    const LINK_STATE_TTL: u8 = 3;
    const UPDATE_DELAY_MS: (u64, u64) = (600, 1000);
    const REPLY_DELAY_MS: (u64, u64) = (200, 500);
    const GAP_FILL_DELAY_PER_ID: Duration = Duration::from_millis(3000);
    const GAP_FILL_ATTEMPTS: u8 = 3;
    const GAP_FILL_TIMEOUT_PER_NEIGHBOR: Duration = Duration::from_millis(2000);
    const KEEPALIVE_PERIOD: Duration = Duration::from_millis(4000);
    const INACTIVITY_PERIOD: Duration = Duration::from_millis(15_000);
    const SESSION_ATTEMPTS: u8 = 2;
    const SESSION_TIMEOUT_PER_NEIGHBOR: Duration = Duration::from_millis(1000);
    const SESSION_ACK_TIMEOUT: Duration = Duration::from_millis(5000);
    const TRANSMIT_START_DELAY: Duration = Duration::from_millis(500);
    const DATA_ATTEMPTS: u8 = 2;
    const DATA_TIMEOUT_PER_RECEIVER: Duration = Duration::from_millis(1000);
    const DATA_DELAY_MS: (u64, u64) = (500, 1000);
    const ACK_STAGGER_STEP: Duration = Duration::from_millis(100);
    const WINDOW_STALL_TIMEOUT: Duration = Duration::from_millis(20_000);
    const FINAL_ACK_TIMEOUT: Duration = Duration::from_millis(5000);
    const FINISHED_SENDING_CAP: Duration = Duration::from_millis(10_000);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_space_holds_a_full_session() {
        // A session of MAX_SESSION_PACKETS fragments must not reuse a
        // sequence number while the previous use can still be in flight.
        assert!(DefaultConfig::MAX_SESSION_PACKETS <= DefaultConfig::SEQ_COUNT as usize);
        assert!(DefaultConfig::SEQ_COUNT.is_power_of_two());
    }

    #[test]
    fn windows_fit_the_sequence_space() {
        assert!(DefaultConfig::RECEIVE_WINDOW_SIZE * 2 <= DefaultConfig::SEQ_COUNT);
        assert!(DefaultConfig::SEND_WINDOW_SIZE * 2 <= DefaultConfig::SEQ_COUNT);
    }
}
