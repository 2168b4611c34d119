//! Chaos link between two simulated peers
//!
//! Models the byte stream the TCP driver provides, so it never loses or
//! reorders frames within a connection. What it does instead:
//! - Latency with jitter (delivery order is preserved)
//! - Duplicate delivery of frames
//! - Partitions: the connection drops with everything in flight, and a new
//!   connection (new epoch) is opened on heal

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use matbc_transport::TransportEvent;
use matbc_wire::Frame;

/// One end of the link
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    Host,
    Guest,
}

impl Side {
    pub fn other(self) -> Side {
        match self {
            Side::Host => Side::Guest,
            Side::Guest => Side::Host,
        }
    }

    fn index(self) -> usize {
        match self {
            Side::Host => 0,
            Side::Guest => 1,
        }
    }

    fn address(self) -> SocketAddr {
        match self {
            Side::Host => SocketAddr::from(([10, 0, 0, 1], 7400)),
            Side::Guest => SocketAddr::from(([10, 0, 0, 2], 50_000)),
        }
    }
}

/// Jitter distribution type
#[derive(Clone, Debug)]
pub enum JitterDistribution {
    None,
    /// Uniform distribution
    Uniform { min_ms: u32, max_ms: u32 },
    /// Pareto distribution (heavy tail), capped at one second
    Pareto { scale_ms: f64, shape: f64 },
}

impl JitterDistribution {
    /// Sample a jitter value
    pub fn sample(&self, rng: &mut StdRng) -> Duration {
        match self {
            JitterDistribution::None => Duration::ZERO,
            JitterDistribution::Uniform { min_ms, max_ms } => {
                if max_ms <= min_ms {
                    return Duration::from_millis(*min_ms as u64);
                }
                let dist = Uniform::new(*min_ms, *max_ms);
                Duration::from_millis(dist.sample(rng) as u64)
            }
            JitterDistribution::Pareto { scale_ms, shape } => {
                let u: f64 = rng.gen_range(f64::EPSILON..1.0);
                let value = scale_ms / u.powf(1.0 / shape);
                Duration::from_millis(value.min(1000.0) as u64)
            }
        }
    }
}

/// Link chaos configuration
#[derive(Clone, Debug)]
pub struct ChaosConfig {
    /// Base one-way latency
    pub base_latency: Duration,
    /// Jitter distribution
    pub jitter: JitterDistribution,
    /// Probability a frame is delivered twice (0.0 - 1.0)
    pub duplicate_prob: f64,
    /// RNG seed
    pub seed: u64,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(20),
            jitter: JitterDistribution::Uniform {
                min_ms: 0,
                max_ms: 20,
            },
            duplicate_prob: 0.01,
            seed: 0x5EED,
        }
    }
}

impl ChaosConfig {
    /// Instant delivery, nothing duplicated
    pub fn ideal() -> Self {
        ChaosConfig {
            base_latency: Duration::ZERO,
            jitter: JitterDistribution::None,
            duplicate_prob: 0.0,
            seed: 0,
        }
    }

    /// Fixed latency without jitter, so timing does not depend on the RNG
    pub fn fixed(latency: Duration) -> Self {
        ChaosConfig {
            base_latency: latency,
            jitter: JitterDistribution::None,
            duplicate_prob: 0.0,
            seed: 0,
        }
    }

    /// Slow, bursty link that often repeats itself
    pub fn poor() -> Self {
        ChaosConfig {
            base_latency: Duration::from_millis(120),
            jitter: JitterDistribution::Pareto {
                scale_ms: 40.0,
                shape: 1.5,
            },
            duplicate_prob: 0.1,
            seed: 0xBAD,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_duplicates(mut self, prob: f64) -> Self {
        self.duplicate_prob = prob;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChaosStats {
    pub sent: u64,
    pub delivered: u64,
    pub duplicated: u64,
    /// Frames lost to a partition or sent while partitioned
    pub dropped: u64,
    pub partitions: u64,
}

struct InFlight {
    deliver_at: Duration,
    frame: Frame,
}

/// Simulated connection between the two peers
pub struct ChaosLink {
    config: ChaosConfig,
    rng: StdRng,
    epoch: u64,
    connected: bool,
    /// Frames in flight, indexed by destination side
    in_flight: [VecDeque<InFlight>; 2],
    /// Connection events not yet handed out
    events: Vec<(Side, TransportEvent)>,
    stats: ChaosStats,
}

impl ChaosLink {
    /// A link with no connection yet
    pub fn new(config: ChaosConfig) -> Self {
        ChaosLink {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            epoch: 0,
            connected: false,
            in_flight: [VecDeque::new(), VecDeque::new()],
            events: Vec::new(),
            stats: ChaosStats::default(),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn stats(&self) -> &ChaosStats {
        &self.stats
    }

    /// Nothing in flight in either direction
    pub fn is_idle(&self) -> bool {
        self.in_flight.iter().all(VecDeque::is_empty)
    }

    /// Open a new connection. Both sides see `Connected` on the next
    /// `deliver`.
    pub fn connect(&mut self) {
        if self.connected {
            return;
        }
        self.epoch += 1;
        self.connected = true;
        for side in [Side::Host, Side::Guest] {
            self.events.push((
                side,
                TransportEvent::Connected {
                    epoch: self.epoch,
                    peer: side.other().address(),
                },
            ));
        }
        tracing::debug!(epoch = self.epoch, "chaos link connected");
    }

    /// Drop the connection and everything in flight
    pub fn partition(&mut self) {
        if !self.connected {
            return;
        }
        self.connected = false;
        self.stats.partitions += 1;
        for queue in &mut self.in_flight {
            self.stats.dropped += queue.len() as u64;
            queue.clear();
        }
        for side in [Side::Host, Side::Guest] {
            self.events.push((
                side,
                TransportEvent::Disconnected {
                    epoch: self.epoch,
                    reason: "partition".into(),
                },
            ));
        }
        tracing::debug!(epoch = self.epoch, "chaos link partitioned");
    }

    /// Put a frame from `from` on the wire at time `now`
    pub fn send(&mut self, from: Side, epoch: u64, frame: Frame, now: Duration) {
        self.stats.sent += 1;
        if !self.connected || epoch != self.epoch {
            self.stats.dropped += 1;
            return;
        }

        let latency = self.config.base_latency + self.config.jitter.sample(&mut self.rng);
        let queue = &mut self.in_flight[from.other().index()];
        // A stream never overtakes itself
        let floor = queue.back().map_or(Duration::ZERO, |f| f.deliver_at);
        let deliver_at = (now + latency).max(floor);

        let duplicate = self.config.duplicate_prob > 0.0 && self.rng.gen_bool(self.config.duplicate_prob.min(1.0));
        if duplicate {
            self.stats.duplicated += 1;
            queue.push_back(InFlight {
                deliver_at,
                frame: frame.clone(),
            });
        }
        queue.push_back(InFlight { deliver_at, frame });
    }

    /// Everything due at or before `now`: pending connection events first,
    /// then frames in delivery order per direction
    pub fn deliver(&mut self, now: Duration) -> Vec<(Side, TransportEvent)> {
        let mut out = std::mem::take(&mut self.events);
        for side in [Side::Host, Side::Guest] {
            let queue = &mut self.in_flight[side.index()];
            while queue.front().is_some_and(|f| f.deliver_at <= now) {
                if let Some(item) = queue.pop_front() {
                    self.stats.delivered += 1;
                    out.push((
                        side,
                        TransportEvent::Frame {
                            epoch: self.epoch,
                            frame: item.frame,
                        },
                    ));
                }
            }
        }
        out
    }
}
