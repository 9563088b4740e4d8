//! Channel arbiter: collision-avoidance access to the shared medium and
//! reliable retransmission with per-receiver ack tracking.
//!
//! The arbiter owns the transport send queue; every outgoing frame goes
//! through it. Sends are deferred until the channel is free plus a
//! randomized delay, and abandoned-then-retried when a busy burst slips
//! into that delay window. Reliable sends additionally wait for the
//! transport's done-sending signal, dwell for an ack timeout, and re-arm
//! with the still-missing receiver set while attempts remain.
//!
//! Everything here is deadline state drained by [`ChannelArbiter::poll`];
//! the thread-per-send workers of a conventional implementation collapse
//! into the caller's single scheduler.

use std::collections::VecDeque;

use hashbrown::HashMap;

use crate::log::PacketLog;
use crate::time::{Duration, Timestamp};
use crate::traits::{Frame, Random};
use crate::types::{IdSet, NodeId, Packet};

/// Fixed delay for the first copy of a repeated send.
const REPEAT_FIRST_DELAY: Duration = Duration::from_millis(200);

/// Why a reliable send was made; returned with its outcome so the
/// controller can route the result to the right protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPurpose {
    /// Id request during joining.
    AddressRequest,
    /// Gap-fill link-state request naming `source`.
    TopologyPull { source: NodeId },
    /// Session-open announcement of our own session.
    SessionOpen,
    /// Relayed session-open announcement.
    SessionRelay,
    /// One DATA packet of the active session.
    Data { sequence: u8 },
}

/// Final result of a reliable send.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// What the send was for.
    pub purpose: SendPurpose,
    /// Receivers that never acknowledged within the retry budget.
    pub missing: IdSet,
    /// False when the transport never confirmed a transmission within
    /// the cap; the missing set is empty in that case.
    pub confirmed: bool,
}

#[derive(Clone, Copy)]
enum DeferredState {
    /// Blocked on the channel falling free.
    AwaitingFree,
    /// Channel was free; transmit at `deadline` if it stays clean.
    Armed { deadline: Timestamp },
}

struct DeferredSend {
    frame: Frame,
    delay: Duration,
    state: DeferredState,
}

#[derive(Clone, Copy)]
enum ReliablePhase {
    /// Waiting for the transport's done-sending signal.
    AwaitingDone { cap: Timestamp },
    /// Signal seen; sleeping out the ack timeout.
    Dwell { check_at: Timestamp, started_at: Timestamp },
    /// Timeout elapsed but the channel is busy; acks may still be
    /// arriving.
    AwaitingFreeCheck { started_at: Timestamp },
}

struct ReliableSend {
    packet: Packet,
    delay_bounds: (u64, u64),
    attempts: u8,
    timeout: Duration,
    expected: IdSet,
    purpose: SendPurpose,
    phase: ReliablePhase,
}

/// Serializer of all outgoing frames onto the shared half-duplex medium.
pub struct ChannelArbiter {
    busy: bool,
    /// When the channel last turned free (end of a busy period).
    last_busy_end: Option<Timestamp>,
    /// When the channel last turned busy (end of a free period).
    last_free_end: Option<Timestamp>,
    deferred: Vec<DeferredSend>,
    repeat_buffer: VecDeque<(Frame, Duration)>,
    reliables: HashMap<u64, ReliableSend>,
    next_reliable_id: u64,
    outgoing: VecDeque<Frame>,
    finished_cap: Duration,
}

impl ChannelArbiter {
    /// A fresh arbiter over a silent channel.
    pub fn new(finished_cap: Duration) -> Self {
        Self {
            busy: false,
            last_busy_end: None,
            last_free_end: None,
            deferred: Vec::new(),
            repeat_buffer: VecDeque::new(),
            reliables: HashMap::new(),
            next_reliable_id: 0,
            outgoing: VecDeque::new(),
            finished_cap,
        }
    }

    /// Whether the medium is currently marked busy.
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Apply a FREE/BUSY notification from the transport.
    pub fn set_network_state(&mut self, is_busy: bool, now: Timestamp) {
        self.busy = is_busy;
        if is_busy {
            self.last_free_end = Some(now);
        } else {
            self.last_busy_end = Some(now);
            for send in &mut self.deferred {
                if matches!(send.state, DeferredState::AwaitingFree) {
                    send.state = DeferredState::Armed {
                        deadline: now + send.delay,
                    };
                }
            }
        }
    }

    /// Queue a frame behind carrier sense: wait for a free channel, hold
    /// `delay`, then transmit if the channel stayed clean.
    pub fn send_safe(&mut self, frame: Frame, delay: Duration, now: Timestamp) {
        let state = if self.busy {
            DeferredState::AwaitingFree
        } else {
            DeferredState::Armed {
                deadline: now + delay,
            }
        };
        self.deferred.push(DeferredSend {
            frame,
            delay,
            state,
        });
    }

    /// [`send_safe`](Self::send_safe) with a uniform random delay drawn
    /// from `bounds` ms.
    pub fn schedule(
        &mut self,
        frame: Frame,
        bounds: (u64, u64),
        rng: &mut impl Random,
        now: Timestamp,
    ) {
        let delay = Duration::from_millis(rng.gen_range(bounds.0, bounds.1));
        self.send_safe(frame, delay, now);
    }

    /// Transmit `frame` once now and `times − 1` more copies, each
    /// released by a done-sending signal and spaced by `spacing`.
    pub fn repeat_send(&mut self, frame: Frame, spacing: Duration, times: u8, now: Timestamp) {
        self.send_safe(frame.clone(), REPEAT_FIRST_DELAY, now);
        for _ in 1..times {
            self.repeat_buffer.push_back((frame.clone(), spacing));
        }
    }

    /// Send `packet` expecting acks from `expected`, retransmitting to
    /// the still-missing receivers until `attempts` runs out. The final
    /// missing set comes back from [`poll`](Self::poll) tagged with
    /// `purpose`.
    #[allow(clippy::too_many_arguments)]
    pub fn send_reliable(
        &mut self,
        packet: Packet,
        delay_bounds: (u64, u64),
        attempts: u8,
        timeout: Duration,
        expected: IdSet,
        purpose: SendPurpose,
        rng: &mut impl Random,
        now: Timestamp,
    ) {
        if attempts == 0 {
            return;
        }
        self.schedule(Frame::from_packet(&packet), delay_bounds, rng, now);
        let id = self.next_reliable_id;
        self.next_reliable_id += 1;
        self.reliables.insert(
            id,
            ReliableSend {
                packet,
                delay_bounds,
                attempts,
                timeout,
                expected,
                purpose,
                phase: ReliablePhase::AwaitingDone {
                    cap: now + self.finished_cap,
                },
            },
        );
    }

    /// Apply the transport's done-sending notification: release the next
    /// repeated copy and start the ack dwell of every waiting reliable
    /// send.
    pub fn finish_sending(&mut self, now: Timestamp) {
        if let Some((frame, delay)) = self.repeat_buffer.pop_front() {
            self.send_safe(frame, delay, now);
        }
        for send in self.reliables.values_mut() {
            if matches!(send.phase, ReliablePhase::AwaitingDone { .. }) {
                send.phase = ReliablePhase::Dwell {
                    check_at: now + send.timeout,
                    started_at: now,
                };
            }
        }
    }

    /// Whether a busy burst both started and ended within the trailing
    /// `delay`: a collision window passed us and the send must restart.
    fn interrupted(&self, delay: Duration, now: Timestamp) -> bool {
        let after_busy = self
            .last_busy_end
            .is_some_and(|at| now.saturating_since(at) < delay);
        let before_busy = self
            .last_free_end
            .is_some_and(|at| now.saturating_since(at) < delay);
        after_busy && before_busy
    }

    /// Drive every deferred and reliable send forward. Returns the
    /// reliable sends that completed, for the controller to route.
    pub fn poll(
        &mut self,
        log: &PacketLog,
        rng: &mut impl Random,
        now: Timestamp,
    ) -> Vec<SendOutcome> {
        // Deferred sends whose delay elapsed either transmit or restart.
        // Frames go out in deadline order.
        let mut emitted: Vec<(Timestamp, Frame)> = Vec::new();
        let mut i = 0;
        while i < self.deferred.len() {
            let due = match self.deferred[i].state {
                DeferredState::Armed { deadline } => deadline <= now,
                DeferredState::AwaitingFree => false,
            };
            if !due {
                i += 1;
                continue;
            }
            if self.busy {
                self.deferred[i].state = DeferredState::AwaitingFree;
                i += 1;
            } else if self.interrupted(self.deferred[i].delay, now) {
                let delay = self.deferred[i].delay;
                self.deferred[i].state = DeferredState::Armed {
                    deadline: now + delay,
                };
                i += 1;
            } else {
                let send = self.deferred.remove(i);
                let DeferredState::Armed { deadline } = send.state else {
                    unreachable!()
                };
                emitted.push((deadline, send.frame));
            }
        }
        emitted.sort_by_key(|(deadline, _)| *deadline);
        for (_, frame) in emitted {
            self.outgoing.push_back(frame);
        }

        // Reliable sends move through done-signal, dwell, and ack check.
        let mut outcomes = Vec::new();
        let mut retries = Vec::new();
        let mut ids: Vec<u64> = self.reliables.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            let Some(phase) = self.reliables.get(&id).map(|send| send.phase) else {
                continue;
            };
            let started_at = match phase {
                ReliablePhase::AwaitingDone { cap } => {
                    if now >= cap {
                        let send = self.reliables.remove(&id).expect("reliable present");
                        outcomes.push(SendOutcome {
                            purpose: send.purpose,
                            missing: IdSet::new(),
                            confirmed: false,
                        });
                    }
                    continue;
                }
                ReliablePhase::Dwell {
                    check_at,
                    started_at,
                } => {
                    if now < check_at {
                        continue;
                    }
                    if self.busy {
                        if let Some(send) = self.reliables.get_mut(&id) {
                            send.phase = ReliablePhase::AwaitingFreeCheck { started_at };
                        }
                        continue;
                    }
                    started_at
                }
                ReliablePhase::AwaitingFreeCheck { started_at } => {
                    if self.busy {
                        continue;
                    }
                    started_at
                }
            };

            let window = now.saturating_since(started_at);
            let send = self.reliables.get(&id).expect("reliable present");
            let missing = log.missing_acks(&send.packet, &send.expected, window, now);
            if !missing.is_empty() && send.attempts > 1 {
                retries.push((id, missing));
            } else {
                let send = self.reliables.remove(&id).expect("reliable present");
                outcomes.push(SendOutcome {
                    purpose: send.purpose,
                    missing,
                    confirmed: true,
                });
            }
        }

        for (id, missing) in retries {
            let (frame, bounds) = {
                let send = self.reliables.get_mut(&id).expect("reliable present");
                send.attempts -= 1;
                send.expected = missing;
                send.phase = ReliablePhase::AwaitingDone {
                    cap: now + self.finished_cap,
                };
                (Frame::from_packet(&send.packet), send.delay_bounds)
            };
            self.schedule(frame, bounds, rng, now);
        }

        outcomes
    }

    /// The earliest moment [`poll`](Self::poll) has work to do.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        let deferred = self.deferred.iter().filter_map(|send| match send.state {
            DeferredState::Armed { deadline } => Some(deadline),
            DeferredState::AwaitingFree => None,
        });
        let reliable = self.reliables.values().filter_map(|send| match send.phase {
            ReliablePhase::AwaitingDone { cap } => Some(cap),
            ReliablePhase::Dwell { check_at, .. } => Some(check_at),
            ReliablePhase::AwaitingFreeCheck { .. } => None,
        });
        deferred.chain(reliable).min()
    }

    /// Next frame ready for the transport, if any.
    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.outgoing.pop_front()
    }

    /// Put a popped frame back at the head, for when the transport
    /// queue is momentarily full.
    pub fn requeue_front(&mut self, frame: Frame) {
        self.outgoing.push_front(frame);
    }
}
