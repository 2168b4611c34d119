//! Sync link state machine
//!
//! `SyncLink` owns everything about the peer connection except the socket:
//! sequencing, acknowledgement, retention and resend, heartbeats and the
//! connection lifecycle. The socket driver feeds it connection events and
//! frames and writes out whatever it queues.
//!
//! Lifecycle: `Connecting -> Established -> Degraded -> Closed`. A degraded
//! link returns to `Established` when the peer is heard from again (after a
//! fresh `Hello` if the connection was dropped), or closes once the reconnect
//! grace period runs out.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use matbc_core::{MatbcError, MatbcResult, ParticipantId, SessionId, SessionTime};
use matbc_wire::{ControlMessage, Frame, FrameFlags, SyncMessage};

use crate::sequence::{SeqVerdict, SequenceTracker, UNSEQUENCED};

/// Link configuration
#[derive(Clone, Debug, PartialEq)]
pub struct LinkConfig {
    /// Send a heartbeat when nothing else went out for this long
    pub heartbeat_interval: Duration,
    /// Silence from the peer beyond this marks the link degraded
    pub heartbeat_timeout: Duration,
    /// How long a degraded link waits for the peer before closing
    pub reconnect_grace: Duration,
    /// Hard cap on retained, unacknowledged messages
    pub outbound_capacity: usize,
    /// Retained count at which the link reports backpressure
    pub high_watermark: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            heartbeat_interval: Duration::from_millis(250),
            heartbeat_timeout: Duration::from_secs(2),
            reconnect_grace: Duration::from_secs(30),
            outbound_capacity: 4096,
            high_watermark: 3072,
        }
    }
}

/// Link state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// Waiting for the peer's hello
    Connecting,
    /// Hello exchanged, traffic flowing
    Established,
    /// Peer silent or connection dropped; input keeps applying locally
    Degraded,
    /// Session over for this link
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Connecting => "connecting",
            LinkState::Established => "established",
            LinkState::Degraded => "degraded",
            LinkState::Closed => "closed",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, Default)]
pub struct LinkStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub heartbeats_sent: u64,
    pub frames_resent: u64,
    pub duplicates: u64,
    pub gaps: u64,
    pub reconnects: u64,
}

/// Sans-IO sync link to the other peer
pub struct SyncLink {
    config: LinkConfig,
    session: SessionId,
    local: ParticipantId,
    remote: Option<ParticipantId>,
    state: LinkState,
    /// Whether the socket driver currently has a connection
    connected: bool,
    next_seq: u64,
    /// Sequenced frames the peer has not acknowledged, in send order
    retained: VecDeque<Frame>,
    /// Frames ready for the socket
    outbox: VecDeque<Frame>,
    /// Delivered messages awaiting the session loop
    inbox: VecDeque<SyncMessage>,
    received: SequenceTracker,
    last_heard: SessionTime,
    last_sent: SessionTime,
    /// Latest session time the peer reported in a heartbeat
    peer_time: SessionTime,
    degraded_since: Option<SessionTime>,
    stats: LinkStats,
}

impl SyncLink {
    pub fn new(config: LinkConfig, session: SessionId, local: ParticipantId) -> Self {
        SyncLink {
            config,
            session,
            local,
            remote: None,
            state: LinkState::Connecting,
            connected: false,
            next_seq: 1,
            retained: VecDeque::new(),
            outbox: VecDeque::new(),
            inbox: VecDeque::new(),
            received: SequenceTracker::new(),
            last_heard: SessionTime::ZERO,
            last_sent: SessionTime::ZERO,
            peer_time: SessionTime::ZERO,
            degraded_since: None,
            stats: LinkStats::default(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn is_established(&self) -> bool {
        self.state == LinkState::Established
    }

    pub fn is_closed(&self) -> bool {
        self.state == LinkState::Closed
    }

    /// Participant on the other end, once its hello arrived
    pub fn remote(&self) -> Option<ParticipantId> {
        self.remote
    }

    pub fn local(&self) -> ParticipantId {
        self.local
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Unacknowledged messages held for resend
    pub fn retained(&self) -> usize {
        self.retained.len()
    }

    /// Highest contiguous sequence received from the peer
    pub fn received_through(&self) -> u64 {
        self.received.highest()
    }

    /// Sequence number of the last message queued
    pub fn last_sequence(&self) -> u64 {
        self.next_seq - 1
    }

    /// Session time of the peer's latest heartbeat. Every message the peer
    /// sent before it has been delivered.
    pub fn peer_time(&self) -> SessionTime {
        self.peer_time
    }

    /// Above the high watermark, callers should stop producing
    pub fn is_backpressured(&self) -> bool {
        self.retained.len() >= self.config.high_watermark
    }

    fn set_state(&mut self, state: LinkState, now: SessionTime) {
        if self.state == state {
            return;
        }
        info!(from = %self.state, to = %state, at = %now, "link state changed");
        self.degraded_since = match state {
            LinkState::Degraded => Some(now),
            _ => None,
        };
        self.state = state;
    }

    /// The socket driver has a new connection. Announce ourselves and what we
    /// have received so far; the peer resends the rest.
    pub fn on_connected(&mut self, now: SessionTime) {
        if self.state == LinkState::Closed {
            return;
        }
        if self.remote.is_some() {
            self.stats.reconnects += 1;
        }
        self.connected = true;
        self.outbox.clear();
        self.last_heard = now;
        let hello = ControlMessage::Hello {
            participant: self.local,
            resume_from: self.received.highest(),
        };
        debug!(resume_from = self.received.highest(), "sending hello");
        self.push_unsequenced(SyncMessage::SessionControl(hello), now);
    }

    /// The connection dropped. Unflushed frames are discarded; retained
    /// messages stay for resend after the next hello.
    pub fn on_disconnected(&mut self, reason: &str, now: SessionTime) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.outbox.clear();
        warn!(reason = reason, retained = self.retained.len(), "connection lost");
        if self.state == LinkState::Established {
            self.set_state(LinkState::Degraded, now);
        }
    }

    /// Queue a message for the peer.
    ///
    /// Session messages are sequenced and retained until acknowledged;
    /// heartbeats and hellos are neither.
    pub fn send(&mut self, message: SyncMessage, now: SessionTime) -> MatbcResult<u64> {
        if self.state == LinkState::Closed {
            return Err(MatbcError::ConnectionLost("link closed".into()));
        }
        if message.is_link_local() {
            self.push_unsequenced(message, now);
            return Ok(UNSEQUENCED);
        }
        if self.retained.len() >= self.config.outbound_capacity {
            return Err(MatbcError::OutboundFull(self.config.outbound_capacity));
        }

        let seq = self.next_seq;
        let frame = Frame::from_message(self.session, self.local, seq, &message)?;
        self.next_seq += 1;
        self.stats.messages_sent += 1;
        trace!(seq = seq, kind = message.kind(), "message queued");

        if self.can_transmit() {
            self.outbox.push_back(frame.clone());
            self.last_sent = now;
        }
        self.retained.push_back(frame);
        Ok(seq)
    }

    fn push_unsequenced(&mut self, message: SyncMessage, now: SessionTime) {
        match Frame::from_message(self.session, self.local, UNSEQUENCED, &message) {
            Ok(frame) if self.connected => {
                self.outbox.push_back(frame);
                self.last_sent = now;
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, kind = message.kind(), "link message not encodable"),
        }
    }

    /// Sequenced frames go out once the peer's hello has been seen on this
    /// connection; earlier ones are resent after it.
    fn can_transmit(&self) -> bool {
        self.connected
            && self.remote.is_some()
            && matches!(self.state, LinkState::Established | LinkState::Degraded)
    }

    /// Handle one frame from the socket
    pub fn on_frame(&mut self, frame: Frame, now: SessionTime) -> MatbcResult<()> {
        if frame.header.session_id != self.session {
            return Err(MatbcError::TransportError(format!(
                "frame for session {} on session {}",
                frame.header.session_id, self.session
            )));
        }
        if self.state == LinkState::Closed {
            return Ok(());
        }
        self.last_heard = now;
        self.release_acked(frame.header.ack);

        let message = frame.message()?;
        if frame.seq() == UNSEQUENCED {
            return self.on_link_message(message, now);
        }

        match self.received.accept(frame.seq()) {
            Ok(SeqVerdict::Fresh) => {
                if self.state == LinkState::Degraded && self.connected && self.remote.is_some() {
                    self.set_state(LinkState::Established, now);
                }
                self.stats.messages_received += 1;
                self.inbox.push_back(message);
                Ok(())
            }
            Ok(SeqVerdict::Duplicate) => {
                self.stats.duplicates += 1;
                trace!(seq = frame.seq(), "duplicate frame dropped");
                Ok(())
            }
            Err(e) => {
                // Ask the peer to resend everything after what we hold
                self.stats.gaps += 1;
                warn!(error = %e, "sequence gap, requesting resend");
                self.set_state(LinkState::Degraded, now);
                let hello = ControlMessage::Hello {
                    participant: self.local,
                    resume_from: self.received.highest(),
                };
                self.push_unsequenced(SyncMessage::SessionControl(hello), now);
                Err(e)
            }
        }
    }

    fn on_link_message(&mut self, message: SyncMessage, now: SessionTime) -> MatbcResult<()> {
        match message {
            SyncMessage::SessionControl(ControlMessage::Hello {
                participant,
                resume_from,
            }) => {
                if let Some(remote) = self.remote {
                    if remote != participant {
                        return Err(MatbcError::TransportError(format!(
                            "hello from {}, expected {}",
                            participant, remote
                        )));
                    }
                }
                self.remote = Some(participant);
                info!(peer = %participant, resume_from = resume_from, "hello received");
                self.release_acked(resume_from);
                self.set_state(LinkState::Established, now);
                self.resend(now);
                Ok(())
            }
            SyncMessage::Heartbeat { at } => {
                if at > self.peer_time {
                    self.peer_time = at;
                }
                if self.state == LinkState::Degraded && self.connected && self.remote.is_some() {
                    self.set_state(LinkState::Established, now);
                }
                Ok(())
            }
            other => Err(MatbcError::TransportError(format!(
                "{} sent without a sequence number",
                other.kind()
            ))),
        }
    }

    /// Queue every retained frame for retransmission, in order
    fn resend(&mut self, now: SessionTime) {
        if !self.connected {
            return;
        }
        // Drop anything queued for the old connection state; retained covers it
        self.outbox.retain(|f| f.seq() == UNSEQUENCED);
        let mut flags = FrameFlags::NONE;
        flags.set_resend(true);
        for frame in &self.retained {
            self.outbox.push_back(frame.restamped(0, flags));
        }
        if !self.retained.is_empty() {
            debug!(count = self.retained.len(), "resending retained frames");
            self.stats.frames_resent += self.retained.len() as u64;
            self.last_sent = now;
        }
    }

    fn release_acked(&mut self, ack: u64) {
        while self.retained.front().is_some_and(|f| f.seq() <= ack) {
            self.retained.pop_front();
        }
    }

    /// Timers: heartbeat, silence detection and the reconnect grace period.
    ///
    /// Returns `SessionAborted` once, when the grace period runs out.
    pub fn tick(&mut self, now: SessionTime) -> MatbcResult<()> {
        match self.state {
            LinkState::Closed | LinkState::Connecting => return Ok(()),
            LinkState::Established => {
                if now.since(self.last_heard) > self.config.heartbeat_timeout {
                    warn!(silent_for = ?now.since(self.last_heard), "peer silent, link degraded");
                    self.set_state(LinkState::Degraded, now);
                }
            }
            LinkState::Degraded => {
                let since = self.degraded_since.unwrap_or(now);
                if now.since(since) > self.config.reconnect_grace {
                    self.set_state(LinkState::Closed, now);
                    self.outbox.clear();
                    return Err(MatbcError::SessionAborted);
                }
            }
        }

        if self.connected
            && self.outbox.is_empty()
            && now.since(self.last_sent) >= self.config.heartbeat_interval
        {
            self.stats.heartbeats_sent += 1;
            self.push_unsequenced(SyncMessage::Heartbeat { at: now }, now);
        }
        Ok(())
    }

    /// Close the link. Nothing is sent afterwards.
    pub fn close(&mut self, now: SessionTime) {
        self.set_state(LinkState::Closed, now);
        self.outbox.clear();
    }

    /// Frames to write to the socket, stamped with the current ack
    pub fn drain_outbound(&mut self) -> Vec<Frame> {
        let ack = self.received.highest();
        let mut backpressure = FrameFlags::NONE;
        backpressure.set_backpressure(self.is_backpressured());
        self.outbox
            .drain(..)
            .map(|f| {
                let flags = FrameFlags(f.header.flags.0 | backpressure.0);
                f.restamped(ack, flags)
            })
            .collect()
    }

    /// The socket driver lost frames it had taken from `drain_outbound`.
    /// Everything unacknowledged goes out again ahead of newer frames.
    pub fn requeue(&mut self, now: SessionTime) {
        if self.can_transmit() {
            self.resend(now);
        }
    }

    pub fn has_outbound(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Messages delivered in the peer's send order
    pub fn drain_inbound(&mut self) -> Vec<SyncMessage> {
        self.inbox.drain(..).collect()
    }
}
