//! Two-peer harness
//!
//! Drives a host and a guest `Peer` over a `ChaosLink` on simulated time.
//! Each step advances both peers, hands their frames to the link and
//! delivers whatever the link has due.

use std::time::Duration;

use matbc_core::{FieldKey, InputPayload, TaskId};
use matbc_runtime::{MemorySink, MutationRecord, Peer, PeerConfig, PeerPhase, Role, RuntimeResult};

use crate::chaos::{ChaosConfig, ChaosLink, Side};

/// Default step of the simulated clock
pub const STEP: Duration = Duration::from_millis(10);

/// Host and guest peers wired through a chaos link
pub struct TwoPeerHarness {
    host: Peer,
    guest: Peer,
    link: ChaosLink,
    host_log: MemorySink,
    guest_log: MemorySink,
    elapsed: Duration,
}

impl TwoPeerHarness {
    /// Both peers run `scenario` with default configs for their role
    pub fn new(scenario: &str, chaos: ChaosConfig) -> RuntimeResult<Self> {
        Self::with_configs(
            Self::config(Role::Host),
            Self::config(Role::Guest),
            scenario,
            chaos,
        )
    }

    pub fn with_configs(
        host_config: PeerConfig,
        guest_config: PeerConfig,
        scenario: &str,
        chaos: ChaosConfig,
    ) -> RuntimeResult<Self> {
        let host_log = MemorySink::new();
        let guest_log = MemorySink::new();
        let host_commands = Peer::load_scenario(&host_config, scenario)?;
        let guest_commands = Peer::load_scenario(&guest_config, scenario)?;
        Ok(TwoPeerHarness {
            host: Peer::with_sink(host_config, host_commands, Box::new(host_log.clone())),
            guest: Peer::with_sink(guest_config, guest_commands, Box::new(guest_log.clone())),
            link: ChaosLink::new(chaos),
            host_log,
            guest_log,
            elapsed: Duration::ZERO,
        })
    }

    /// Default config of a role: host is participant 1, guest participant 2
    pub fn config(role: Role) -> PeerConfig {
        let (participant, peer_participant) = match role {
            Role::Host => (1, 2),
            Role::Guest => (2, 1),
        };
        PeerConfig {
            session_id: 42,
            participant,
            peer_participant,
            role,
            connect: Some(std::net::SocketAddr::from(([10, 0, 0, 1], 7400))),
            ..PeerConfig::default()
        }
    }

    pub fn peer(&self, side: Side) -> &Peer {
        match side {
            Side::Host => &self.host,
            Side::Guest => &self.guest,
        }
    }

    pub fn peer_mut(&mut self, side: Side) -> &mut Peer {
        match side {
            Side::Host => &mut self.host,
            Side::Guest => &mut self.guest,
        }
    }

    pub fn link(&self) -> &ChaosLink {
        &self.link
    }

    /// Simulated time since the harness was created
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Mutation log of one side
    pub fn log(&self, side: Side) -> Vec<MutationRecord> {
        match side {
            Side::Host => self.host_log.records(),
            Side::Guest => self.guest_log.records(),
        }
    }

    /// Connect and step until both peers are running. Returns whether they
    /// got there within `timeout` of simulated time.
    pub fn start(&mut self, timeout: Duration) -> bool {
        self.link.connect();
        self.deliver();
        let deadline = self.elapsed + timeout;
        while self.elapsed < deadline {
            if self.both(|p| p.phase() == PeerPhase::Running) {
                return true;
            }
            self.step(STEP);
        }
        self.both(|p| p.phase() == PeerPhase::Running)
    }

    pub fn input(&mut self, side: Side, payload: InputPayload) {
        self.peer_mut(side).submit_input(payload);
    }

    /// One simulated step
    pub fn step(&mut self, dt: Duration) {
        self.elapsed += dt;
        self.host.step(dt);
        self.guest.step(dt);
        self.transmit();
        self.deliver();
    }

    pub fn run_for(&mut self, duration: Duration, dt: Duration) {
        let end = self.elapsed + duration;
        while self.elapsed < end {
            self.step(dt);
        }
    }

    /// Step until both sides hold no unacknowledged messages and have
    /// reconciled everything delivered to them. Returns false if that did not
    /// happen within `max_steps`.
    pub fn settle(&mut self, dt: Duration, max_steps: usize) -> bool {
        let mut quiet = 0;
        for _ in 0..max_steps {
            self.step(dt);
            let idle = self.both(|p| p.link().retained() == 0 && p.held_messages() == 0);
            quiet = if idle { quiet + 1 } else { 0 };
            if quiet >= 2 {
                return true;
            }
        }
        false
    }

    /// Drop the connection between the peers
    pub fn partition(&mut self) {
        self.link.partition();
        self.deliver();
    }

    /// Open a new connection between the peers
    pub fn heal(&mut self) {
        self.link.connect();
        self.deliver();
    }

    /// Both stores hold the same value in every field
    pub fn converged(&self) -> bool {
        self.host.store().values() == self.guest.store().values()
    }

    /// Fields whose values differ between the peers
    pub fn divergence(&self) -> Vec<(TaskId, FieldKey)> {
        let host = self.host.store().values();
        let guest = self.guest.store().values();
        let mut diff = Vec::new();
        for (task, fields) in &host {
            for (key, value) in fields {
                let other = guest.get(task).and_then(|g| g.get(key));
                if other != Some(value) {
                    diff.push((*task, key.clone()));
                }
            }
        }
        diff
    }

    fn both(&self, f: impl Fn(&Peer) -> bool) -> bool {
        f(&self.host) && f(&self.guest)
    }

    fn transmit(&mut self) {
        for side in [Side::Host, Side::Guest] {
            let peer = match side {
                Side::Host => &mut self.host,
                Side::Guest => &mut self.guest,
            };
            let epoch = peer.epoch();
            let frames = peer.poll_transmit();
            match epoch {
                Some(epoch) => {
                    for frame in frames {
                        self.link.send(side, epoch, frame, self.elapsed);
                    }
                }
                None if !frames.is_empty() => {
                    tracing::trace!(count = frames.len(), "frames without a connection dropped");
                }
                None => {}
            }
        }
    }

    fn deliver(&mut self) {
        for (side, event) in self.link.deliver(self.elapsed) {
            self.peer_mut(side).on_transport(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chaos::ChaosConfig;

    const SCENARIO: &str = "0:00:00;track;start\n0:01:00;end\n";

    #[test]
    fn test_start_over_ideal_link() {
        let mut harness = TwoPeerHarness::new(SCENARIO, ChaosConfig::ideal()).unwrap();
        assert!(harness.start(Duration::from_secs(1)));
        assert!(harness.settle(Duration::from_millis(50), 100));
        assert!(harness.converged(), "diverged: {:?}", harness.divergence());
    }

    #[test]
    fn test_start_over_slow_link() {
        let mut harness =
            TwoPeerHarness::new(SCENARIO, ChaosConfig::fixed(Duration::from_millis(150))).unwrap();
        assert!(harness.start(Duration::from_secs(2)));
        assert!(harness.peer(Side::Host).now() > harness.peer(Side::Guest).now());
    }

    #[test]
    fn test_bad_scenario_reported() {
        let result = TwoPeerHarness::new("0:00:00;nosuchtask;start\n", ChaosConfig::ideal());
        assert!(result.is_err());
    }
}
