//! Platform traits: the framed transport, the clock, and randomness.
//!
//! The transport is the byte-frame connector to the shared audio medium.
//! Besides the two payload frame kinds it delivers the channel-state
//! notifications the arbiter needs for carrier sense. Implementations
//! adapt a live socket or, in tests, a simulated medium.

use core::future::Future;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;

use crate::time::Timestamp;
use crate::types::{ChatMessage, NodeId, Packet, LONG_PACKET_SIZE, SHORT_PACKET_SIZE};
use crate::wire::Encode;

/// One frame on the transport link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A 32-byte payload frame.
    Data([u8; LONG_PACKET_SIZE]),
    /// A 2-byte payload frame.
    DataShort([u8; SHORT_PACKET_SIZE]),
    /// The medium fell silent.
    Free,
    /// Another node is transmitting.
    Busy,
    /// Our own transmission started.
    Sending,
    /// Our own transmission finished.
    DoneSending,
    /// The medium accepted us; the node may join.
    Hello,
    /// The medium closed the session.
    End,
}

impl Frame {
    /// Encode a packet into the frame kind its size dictates.
    pub fn from_packet(packet: &Packet) -> Frame {
        let bytes = packet.encode_to_vec();
        if packet.is_long() {
            let mut buf = [0u8; LONG_PACKET_SIZE];
            buf.copy_from_slice(&bytes);
            Frame::Data(buf)
        } else {
            let mut buf = [0u8; SHORT_PACKET_SIZE];
            buf.copy_from_slice(&bytes);
            Frame::DataShort(buf)
        }
    }

    /// The packet payload, if this is a payload frame.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Frame::Data(buf) => Some(buf),
            Frame::DataShort(buf) => Some(buf),
            _ => None,
        }
    }
}

/// Depth of the transport frame queues.
pub const FRAME_QUEUE_DEPTH: usize = 64;

/// Queue of frames arriving from the medium.
pub type FrameInChannel = Channel<CriticalSectionRawMutex, Frame, FRAME_QUEUE_DEPTH>;

/// Queue of frames awaiting transmission. Only the channel arbiter
/// enqueues here.
pub type FrameOutChannel = Channel<CriticalSectionRawMutex, Frame, FRAME_QUEUE_DEPTH>;

/// Queue of chat messages delivered to the local user.
pub type ChatInChannel = Channel<CriticalSectionRawMutex, ChatMessage, 32>;

/// Queue of chat texts the local user asked to send.
pub type ChatOutChannel = Channel<CriticalSectionRawMutex, String, 8>;

/// Signal fired once the node reaches the ready-to-send phase, carrying
/// the assigned id.
pub type ReadySignal = Signal<CriticalSectionRawMutex, NodeId>;

/// Framed bidirectional link to the medium emulator.
pub trait Transport {
    /// Frames received from the medium.
    fn incoming(&self) -> &FrameInChannel;

    /// Frames queued for transmission.
    fn outgoing(&self) -> &FrameOutChannel;
}

/// Time source. `now` drives all protocol deadlines; `sleep_until` is
/// only used by the async run loop.
pub trait Clock {
    /// Future returned by [`Clock::sleep_until`].
    type SleepFuture<'a>: Future<Output = ()> + 'a
    where
        Self: 'a;

    /// The current time.
    fn now(&self) -> Timestamp;

    /// Complete at or after `deadline`.
    fn sleep_until(&self, deadline: Timestamp) -> Self::SleepFuture<'_>;
}

/// Random number source for collision-avoidance jitter.
pub trait Random {
    /// A uniform value in `min..max`; returns `min` when the range is
    /// empty.
    fn gen_range(&mut self, min: u64, max: u64) -> u64;
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataAck, PingPong};

    #[test]
    fn frame_size_follows_packet_kind() {
        let short = Frame::from_packet(&Packet::PingPong(PingPong {
            sender_id: 1,
            pong: false,
        }));
        assert!(matches!(short, Frame::DataShort(_)));

        let long = Frame::from_packet(&Packet::RequestId(crate::types::RequestId {
            destination_id: 1,
            timestamp: 99,
        }));
        assert!(matches!(long, Frame::Data(_)));
    }

    #[test]
    fn payload_only_for_payload_frames() {
        let ack = Frame::from_packet(&Packet::DataAck(DataAck {
            sender_id: 1,
            source_id: 2,
            sequence: 3,
        }));
        assert!(ack.payload().is_some());
        assert!(Frame::Busy.payload().is_none());
    }
}
