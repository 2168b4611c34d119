//! MATBC Peer - Session loop implementation

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use matbc_core::{InputEvent, InputPayload, MatbcError, SessionTime, Stamp};
use matbc_scenario::{CommandQueue, ScenarioCommand, ScenarioLoader};
use matbc_state::{
    apply_scripted, expire_rounds, is_known_parameter, ChangeNotification, DispatchOutcome,
    MainCommand, MatchingCoordinator, ReconcileStats, Reconciler, RemoteOutcome, SnapshotHandle,
    TaskStateStore,
};
use matbc_time::SessionClock;
use matbc_transport::{SyncLink, TransportEvent};
use matbc_wire::{ControlMessage, Frame, SyncMessage};

use crate::config::{PeerConfig, Role};
use crate::error::RuntimeResult;
use crate::logging::{MutationRecord, MutationSink, TracingSink};

/// Session phase as seen by this peer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerPhase {
    /// Clock not started yet
    WaitingForPeer,
    Running,
    Paused,
    /// Ended by the scenario, the operator or the peer
    Ended,
    /// The peer did not come back within the reconnect grace period
    Aborted,
}

impl PeerPhase {
    pub fn is_finished(self) -> bool {
        matches!(self, PeerPhase::Ended | PeerPhase::Aborted)
    }
}

impl fmt::Display for PeerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PeerPhase::WaitingForPeer => "waiting_for_peer",
            PeerPhase::Running => "running",
            PeerPhase::Paused => "paused",
            PeerPhase::Ended => "ended",
            PeerPhase::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, Default)]
pub struct PeerStats {
    pub ticks: u64,
    pub commands_dispatched: u64,
    pub commands_skipped: u64,
    /// Ticks on which scenario dispatch was held back by backpressure
    pub dispatch_withheld: u64,
    pub inputs_submitted: u64,
    /// Inputs discarded because the session was not running
    pub inputs_dropped: u64,
    pub messages_sent: u64,
    pub send_failures: u64,
    pub remote_rejected: u64,
    pub link_errors: u64,
    pub stale_frames: u64,
    pub mutations_logged: u64,
    pub last_tick_duration: Duration,
}

/// One participant's side of a session
pub struct Peer {
    config: PeerConfig,
    /// Session clock
    clock: SessionClock,
    /// Scripted commands not yet dispatched
    queue: CommandQueue,
    /// Task state
    store: TaskStateStore,
    matching: MatchingCoordinator,
    reconciler: Reconciler,
    link: SyncLink,
    /// Connection the link is currently bound to
    epoch: Option<u64>,
    /// Local input awaiting the next tick
    pending_inputs: VecDeque<InputPayload>,
    /// Peer messages waiting for the local clock and scenario to catch up
    held: VecDeque<SyncMessage>,
    /// Latest session time carried by a reconciled peer message
    remote_time: SessionTime,
    sink: Box<dyn MutationSink>,
    phase: PeerPhase,
    show_labels: bool,
    allow_escape: bool,
    allow_altf4: bool,
    /// Frames flushed from the link before it closed
    final_frames: Vec<Frame>,
    stats: PeerStats,
}

impl Peer {
    /// Create a peer for an already loaded scenario
    pub fn new(config: PeerConfig, commands: Vec<ScenarioCommand>) -> Self {
        Self::with_sink(config, commands, Box::new(TracingSink))
    }

    /// Create a peer with a custom mutation log destination
    pub fn with_sink(
        config: PeerConfig,
        commands: Vec<ScenarioCommand>,
        sink: Box<dyn MutationSink>,
    ) -> Self {
        let mut queue = CommandQueue::new();
        queue.load(commands);
        let link = SyncLink::new(config.link.link_config(), config.session(), config.local());
        Peer {
            clock: SessionClock::new(),
            queue,
            store: TaskStateStore::with_notification_capacity(config.notification_capacity),
            matching: MatchingCoordinator::new(config.participants()),
            reconciler: Reconciler::new(config.local()),
            link,
            epoch: None,
            pending_inputs: VecDeque::new(),
            held: VecDeque::new(),
            remote_time: SessionTime::ZERO,
            sink,
            phase: PeerPhase::WaitingForPeer,
            show_labels: true,
            allow_escape: true,
            allow_altf4: true,
            final_frames: Vec::new(),
            stats: PeerStats::default(),
            config,
        }
    }

    /// Parse scenario text with the configured load policy
    pub fn load_scenario(config: &PeerConfig, text: &str) -> RuntimeResult<Vec<ScenarioCommand>> {
        let loader = ScenarioLoader::new(config.load_policy)
            .with_parameter_check(Box::new(is_known_parameter));
        Ok(loader.load_str(text)?)
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    pub fn phase(&self) -> PeerPhase {
        self.phase
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_finished()
    }

    pub fn now(&self) -> SessionTime {
        self.clock.now()
    }

    pub fn store(&self) -> &TaskStateStore {
        &self.store
    }

    /// Snapshot handle for a renderer on another thread
    pub fn snapshots(&self) -> SnapshotHandle {
        self.store.snapshots()
    }

    pub fn matching(&self) -> &MatchingCoordinator {
        &self.matching
    }

    pub fn link(&self) -> &SyncLink {
        &self.link
    }

    pub fn epoch(&self) -> Option<u64> {
        self.epoch
    }

    pub fn stats(&self) -> &PeerStats {
        &self.stats
    }

    pub fn reconcile_stats(&self) -> ReconcileStats {
        self.reconciler.stats()
    }

    pub fn pending_commands(&self) -> usize {
        self.queue.pending_len()
    }

    pub fn show_labels(&self) -> bool {
        self.show_labels
    }

    /// Whether the operator may end the session early
    pub fn allow_escape(&self) -> bool {
        self.allow_escape
    }

    /// Whether the operator may close the window
    pub fn allow_altf4(&self) -> bool {
        self.allow_altf4
    }

    /// Change notifications for a renderer, when the config enables them
    pub fn drain_notifications(&mut self) -> Vec<ChangeNotification> {
        self.store.drain_notifications()
    }

    /// Peer messages delivered but not yet reconciled
    pub fn held_messages(&self) -> usize {
        self.held.len()
    }

    /// Session time up to which every peer input has been reconciled
    pub fn peer_watermark(&self) -> SessionTime {
        match self.held.front() {
            Some(front) => remote_write_time(front).unwrap_or(self.remote_time),
            None => self.remote_time.max(self.link.peer_time()),
        }
    }

    /// Queue a local participant input for the next tick
    pub fn submit_input(&mut self, payload: InputPayload) {
        self.stats.inputs_submitted += 1;
        self.pending_inputs.push_back(payload);
    }

    /// Advance by an explicit duration (simulation and tests)
    pub fn step(&mut self, dt: Duration) -> SessionTime {
        let now = self.clock.advance(dt);
        self.run(now);
        now
    }

    /// Advance by the real time elapsed since the last tick
    pub fn tick(&mut self) -> SessionTime {
        let now = self.clock.tick();
        self.run(now);
        now
    }

    fn run(&mut self, now: SessionTime) {
        let start = Instant::now();
        self.stats.ticks += 1;

        // Stage 1: Ingest and reconcile peer messages
        self.held.extend(self.link.drain_inbound());
        self.release_held();
        // Session control may have moved the clock
        let now = self.clock.now();

        // Stage 2: Apply and forward local input
        self.apply_local_inputs(now);

        // Stage 3: Dispatch due scenario commands, then peer input that was
        // waiting for them
        self.dispatch_scenario(now);
        self.release_held();

        // Stage 4: Expire matching rounds. A round only expires once the peer
        // is known to have passed the deadline too, so a selection it made
        // just before the deadline is never lost on one side.
        if self.phase == PeerPhase::Running {
            let horizon = now.min(self.peer_watermark());
            if let Some(outcome) = expire_rounds(horizon, &mut self.store, &mut self.matching) {
                debug!(changes = outcome.applied.len(), at = %now, "matching round expired");
            }
        }

        // Stage 5: Link timers
        self.run_link_timers(now);

        // Stage 6: Mutation log
        self.flush_mutation_log(now);

        self.stats.last_tick_duration = start.elapsed();
    }

    /// Reconcile held peer messages in order, stopping at the first one
    /// stamped ahead of local scripted time
    fn release_held(&mut self) {
        while let Some(front) = self.held.front() {
            if self.must_wait(front) {
                trace!(held = self.held.len(), "peer input waiting for local time");
                break;
            }
            let Some(message) = self.held.pop_front() else {
                break;
            };
            let now = self.clock.now();
            self.reconcile_remote(message, now);
        }
    }

    /// A peer write stamped at `t` must see every scripted write due at or
    /// before `t`, as it did on the peer
    fn must_wait(&self, message: &SyncMessage) -> bool {
        if self.phase != PeerPhase::Running {
            return false;
        }
        let Some(at) = remote_write_time(message) else {
            return false;
        };
        at > self.clock.now()
            || self
                .queue
                .next_due()
                .is_some_and(|due| SessionTime::from_secs(u64::from(due)) <= at)
    }

    fn reconcile_remote(&mut self, message: SyncMessage, now: SessionTime) {
        if let Some(at) = remote_write_time(&message) {
            self.remote_time = self.remote_time.max(at);
        }
        let from = self.config.remote();
        let kind = message.kind();
        trace!(kind, "message from peer");
        match self
            .reconciler
            .on_remote_message(from, message, &mut self.store, &mut self.matching)
        {
            RemoteOutcome::Applied(_) | RemoteOutcome::Duplicate => {}
            RemoteOutcome::LocalTask(task) => {
                trace!(kind, task = %task, "peer message for a local task");
            }
            RemoteOutcome::Rejected(e) => {
                self.stats.remote_rejected += 1;
                warn!(kind, error = %e, "peer message rejected");
            }
            RemoteOutcome::Passthrough(SyncMessage::SessionControl(control)) => {
                self.on_control(control, now);
            }
            RemoteOutcome::Passthrough(other) => {
                debug!(kind = other.kind(), "unexpected message ignored");
            }
        }
    }

    fn on_control(&mut self, control: ControlMessage, now: SessionTime) {
        match control {
            ControlMessage::Start { seed } => {
                self.remote_time = self.remote_time.max(seed);
                if self.phase == PeerPhase::WaitingForPeer {
                    self.clock.start_at(seed);
                    self.phase = PeerPhase::Running;
                    info!(seed = %seed, "session started by peer");
                } else {
                    debug!(phase = %self.phase, "start ignored");
                }
            }
            ControlMessage::Pause { at } => {
                self.remote_time = self.remote_time.max(at);
                if self.phase == PeerPhase::Running {
                    self.clock.sync_to(at);
                    self.clock.pause();
                    self.phase = PeerPhase::Paused;
                    info!(at = %at, "session paused by peer");
                }
            }
            ControlMessage::Resume { at } => {
                self.remote_time = self.remote_time.max(at);
                if self.phase == PeerPhase::Paused {
                    self.clock.sync_to(at);
                    self.clock.resume();
                    self.phase = PeerPhase::Running;
                    info!(at = %at, "session resumed by peer");
                }
            }
            ControlMessage::End => {
                if !self.is_finished() {
                    info!(at = %now, "session ended by peer");
                    self.finish(now);
                    self.link.close(now);
                    self.phase = PeerPhase::Ended;
                }
            }
            ControlMessage::Hello { .. } => {
                debug!("hello delivered as session message, ignored");
            }
        }
    }

    /// Stage 2: Apply local input
    fn apply_local_inputs(&mut self, now: SessionTime) {
        if self.pending_inputs.is_empty() {
            return;
        }
        if self.phase != PeerPhase::Running {
            let dropped = self.pending_inputs.len();
            self.pending_inputs.clear();
            self.stats.inputs_dropped += dropped as u64;
            debug!(dropped, phase = %self.phase, "input discarded, session not running");
            return;
        }

        let local = self.config.local();
        while let Some(payload) = self.pending_inputs.pop_front() {
            let event = InputEvent::local(local, now, payload);
            let outgoing =
                self.reconciler
                    .on_local_input(event, now, &mut self.store, &mut self.matching);
            for message in outgoing {
                self.send(message, now);
            }
        }
    }

    /// Stage 3: Dispatch due scenario commands. Held back while the link is
    /// backpressured; the queue catches up on the next tick.
    fn dispatch_scenario(&mut self, now: SessionTime) {
        if self.phase != PeerPhase::Running {
            return;
        }
        if self.link.is_backpressured() {
            self.stats.dispatch_withheld += 1;
            trace!(retained = self.link.retained(), "scenario dispatch withheld");
            return;
        }

        for command in self.queue.advance(now.whole_secs()) {
            self.reconciler.observe(Stamp::scripted(command.due()));
            match apply_scripted(&command, &mut self.store, &mut self.matching) {
                DispatchOutcome::Applied { task, outcome } => {
                    self.stats.commands_dispatched += 1;
                    debug!(
                        line = command.line,
                        task = %task,
                        changes = outcome.applied.len(),
                        "scripted command applied"
                    );
                }
                DispatchOutcome::Main(main) => {
                    self.stats.commands_dispatched += 1;
                    self.on_main_command(main, now);
                }
                DispatchOutcome::Skipped => self.stats.commands_skipped += 1,
            }
            if self.is_finished() {
                break;
            }
        }
    }

    fn on_main_command(&mut self, command: MainCommand, now: SessionTime) {
        match command {
            MainCommand::End => {
                info!(at = %now, "scenario reached its end");
                self.end();
            }
            MainCommand::Pause => self.pause(),
            MainCommand::Resume => self.resume(),
            MainCommand::Log(message) => {
                info!(target: "matbc::scenario", at = %now, message = %message, "scenario message");
            }
            MainCommand::ShowLabels(show) => {
                debug!(show, "label display changed");
                self.show_labels = show;
            }
            MainCommand::AllowEscape(allow) => {
                debug!(allow, "operator escape changed");
                self.allow_escape = allow;
            }
            MainCommand::AllowAltF4(allow) => {
                debug!(allow, "window close changed");
                self.allow_altf4 = allow;
            }
        }
    }

    /// Stage 5: Heartbeats, silence detection and reconnect grace
    fn run_link_timers(&mut self, now: SessionTime) {
        match self.link.tick(now) {
            Ok(()) => {}
            Err(MatbcError::SessionAborted) => {
                if !self.is_finished() {
                    error!(at = %now, "peer did not reconnect in time, session aborted");
                    self.finish(now);
                    self.phase = PeerPhase::Aborted;
                }
            }
            Err(e) => {
                self.stats.link_errors += 1;
                warn!(error = %e, "link timer error");
            }
        }
    }

    /// Stage 6: Hand applied mutations to the log sink
    fn flush_mutation_log(&mut self, now: SessionTime) {
        for notification in self.store.drain_journal() {
            self.stats.mutations_logged += 1;
            self.sink.record(MutationRecord::new(now, notification));
        }
    }

    fn send(&mut self, message: SyncMessage, now: SessionTime) {
        let kind = message.kind();
        match self.link.send(message, now) {
            Ok(seq) => {
                self.stats.messages_sent += 1;
                trace!(kind, seq, "message sent");
            }
            Err(e) => {
                // The local application already happened; the peer will
                // diverge until a later write to the same fields
                self.stats.send_failures += 1;
                warn!(kind, error = %e, "message not sent");
            }
        }
    }

    /// Feed an event from the socket driver
    pub fn on_transport(&mut self, event: TransportEvent) {
        let now = self.clock.now();
        match event {
            TransportEvent::Connected { epoch, peer } => {
                info!(epoch, peer = %peer, "connected to peer");
                self.epoch = Some(epoch);
                self.link.on_connected(now);
            }
            TransportEvent::Frame { epoch, frame } => {
                if self.epoch != Some(epoch) {
                    self.stats.stale_frames += 1;
                    trace!(epoch, "frame from an old connection dropped");
                    return;
                }
                match self.link.on_frame(frame, now) {
                    Ok(()) => {}
                    Err(MatbcError::DuplicateOrOutOfOrderMessage { .. }) => {
                        self.stats.link_errors += 1;
                    }
                    Err(e) => {
                        self.stats.link_errors += 1;
                        warn!(error = %e, "frame rejected");
                    }
                }
                self.maybe_start(now);
            }
            TransportEvent::Disconnected { epoch, reason } => {
                if self.epoch == Some(epoch) {
                    self.link.on_disconnected(&reason, now);
                    self.epoch = None;
                }
            }
        }
    }

    /// The host starts the session once the guest's hello arrived
    fn maybe_start(&mut self, now: SessionTime) {
        if self.config.role != Role::Host
            || self.phase != PeerPhase::WaitingForPeer
            || !self.link.is_established()
        {
            return;
        }
        let seed = now;
        self.clock.start_at(seed);
        self.phase = PeerPhase::Running;
        info!(seed = %seed, "session started");
        self.send(SyncMessage::SessionControl(ControlMessage::Start { seed }), now);
    }

    /// Frames to write to the current connection
    pub fn poll_transmit(&mut self) -> Vec<Frame> {
        let mut frames = std::mem::take(&mut self.final_frames);
        frames.extend(self.link.drain_outbound());
        frames
    }

    /// Frames from `poll_transmit` never reached the socket; unacknowledged
    /// messages are queued again
    pub fn requeue_outbound(&mut self) {
        self.link.requeue(self.clock.now());
    }

    /// Pause the session on both peers
    pub fn pause(&mut self) {
        if self.phase != PeerPhase::Running {
            return;
        }
        let at = self.clock.now();
        self.clock.pause();
        self.phase = PeerPhase::Paused;
        info!(at = %at, "session paused");
        self.send(SyncMessage::SessionControl(ControlMessage::Pause { at }), at);
    }

    /// Resume a paused session on both peers
    pub fn resume(&mut self) {
        if self.phase != PeerPhase::Paused {
            return;
        }
        let at = self.clock.now();
        self.clock.resume();
        self.phase = PeerPhase::Running;
        info!(at = %at, "session resumed");
        self.send(SyncMessage::SessionControl(ControlMessage::Resume { at }), at);
    }

    /// Operator request to leave the session. Refused while the scenario
    /// disallows escape; returns whether the session ended.
    pub fn escape(&mut self) -> bool {
        if !self.allow_escape {
            warn!(at = %self.clock.now(), "escape disabled by the scenario");
            return false;
        }
        self.end();
        true
    }

    /// End the session: pending commands are cancelled and the peer is told
    /// best-effort. Frames not yet handed to `poll_transmit` callers after
    /// this are discarded.
    pub fn end(&mut self) {
        if self.is_finished() {
            return;
        }
        let now = self.clock.now();
        self.send(SyncMessage::SessionControl(ControlMessage::End), now);
        self.final_frames.extend(self.link.drain_outbound());
        self.finish(now);
        self.link.close(now);
        self.phase = PeerPhase::Ended;
        info!(at = %now, "session ended");
    }

    fn finish(&mut self, now: SessionTime) {
        self.queue.cancel();
        self.pending_inputs.clear();
        self.held.clear();
        self.clock.stop();
        self.flush_mutation_log(now);
    }
}

/// Session time of the writes a peer message carries
fn remote_write_time(message: &SyncMessage) -> Option<SessionTime> {
    match message {
        SyncMessage::InputForward { stamp, .. } => Some(stamp.at),
        SyncMessage::StateDelta { changes, .. } => changes.iter().map(|c| c.stamp.at).max(),
        _ => None,
    }
}
