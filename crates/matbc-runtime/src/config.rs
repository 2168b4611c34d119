//! Peer configuration
//!
//! Every field has a default, so a config file only names what it changes.
//! Durations are written as humantime strings (`"250ms"`, `"5s"`).

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use matbc_core::{ParticipantId, SessionId};
use matbc_scenario::LoadPolicy;
use matbc_transport::{LinkConfig, ReconnectPolicy};

use crate::error::{RuntimeError, RuntimeResult};

/// Which end of the session this peer is
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Listens, starts the session clock
    #[default]
    Host,
    /// Connects, starts on the host's signal
    Guest,
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "host" => Ok(Role::Host),
            "guest" => Ok(Role::Guest),
            other => Err(format!("unknown role '{}', expected host or guest", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Host => f.write_str("host"),
            Role::Guest => f.write_str("guest"),
        }
    }
}

/// Serde adapter for humantime durations
mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Sync link settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSettings {
    #[serde(with = "humantime_duration")]
    pub heartbeat_interval: Duration,
    #[serde(with = "humantime_duration")]
    pub heartbeat_timeout: Duration,
    #[serde(with = "humantime_duration")]
    pub reconnect_grace: Duration,
    /// Retained unacknowledged messages before sends fail
    pub outbound_capacity: usize,
    /// Retained messages above which scenario dispatch is withheld
    pub high_watermark: usize,
    /// Frames buffered between the socket and the session loop
    pub inbound_capacity: usize,
}

impl Default for LinkSettings {
    fn default() -> Self {
        let link = LinkConfig::default();
        LinkSettings {
            heartbeat_interval: link.heartbeat_interval,
            heartbeat_timeout: link.heartbeat_timeout,
            reconnect_grace: link.reconnect_grace,
            outbound_capacity: link.outbound_capacity,
            high_watermark: link.high_watermark,
            inbound_capacity: 1024,
        }
    }
}

impl LinkSettings {
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            heartbeat_interval: self.heartbeat_interval,
            heartbeat_timeout: self.heartbeat_timeout,
            reconnect_grace: self.reconnect_grace,
            outbound_capacity: self.outbound_capacity,
            high_watermark: self.high_watermark.min(self.outbound_capacity),
        }
    }
}

/// Reconnect backoff settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    #[serde(with = "humantime_duration")]
    pub initial_backoff: Duration,
    #[serde(with = "humantime_duration")]
    pub max_backoff: Duration,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        ReconnectSettings {
            initial_backoff: policy.initial_backoff,
            max_backoff: policy.max_backoff,
        }
    }
}

impl ReconnectSettings {
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_backoff: self.initial_backoff,
            max_backoff: self.max_backoff.max(self.initial_backoff),
        }
    }
}

/// Peer configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Shared by both peers of a session
    pub session_id: u64,
    /// This peer's participant
    pub participant: u64,
    /// The other peer's participant
    pub peer_participant: u64,
    pub role: Role,
    /// Host listen address
    pub listen: SocketAddr,
    /// Host address a guest connects to
    pub connect: Option<SocketAddr>,
    /// Session loop period
    #[serde(with = "humantime_duration")]
    pub tick_interval: Duration,
    pub load_policy: LoadPolicy,
    /// Renderer notifications kept until drained; 0 when no renderer is
    /// attached. The mutation log does not depend on it.
    pub notification_capacity: usize,
    pub link: LinkSettings,
    pub reconnect: ReconnectSettings,
}

impl Default for PeerConfig {
    fn default() -> Self {
        PeerConfig {
            session_id: 1,
            participant: 1,
            peer_participant: 2,
            role: Role::Host,
            listen: SocketAddr::from(([0, 0, 0, 0], 7400)),
            connect: None,
            tick_interval: Duration::from_millis(10),
            load_policy: LoadPolicy::FailFast,
            notification_capacity: 0,
            link: LinkSettings::default(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl PeerConfig {
    /// Read a JSON config file
    pub fn from_file(path: &Path) -> RuntimeResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| RuntimeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> RuntimeResult<Self> {
        let config: PeerConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no session can run with
    pub fn validate(&self) -> RuntimeResult<()> {
        if self.participant == self.peer_participant {
            return Err(RuntimeError::Config(
                "participant and peer_participant must differ".into(),
            ));
        }
        if self.link.outbound_capacity == 0 {
            return Err(RuntimeError::Config("outbound_capacity must be positive".into()));
        }
        if self.link.heartbeat_timeout <= self.link.heartbeat_interval {
            return Err(RuntimeError::Config(
                "heartbeat_timeout must exceed heartbeat_interval".into(),
            ));
        }
        if self.role == Role::Guest && self.connect.is_none() {
            return Err(RuntimeError::Config("a guest needs a connect address".into()));
        }
        Ok(())
    }

    pub fn session(&self) -> SessionId {
        SessionId::new(self.session_id)
    }

    pub fn local(&self) -> ParticipantId {
        ParticipantId::new(self.participant)
    }

    pub fn remote(&self) -> ParticipantId {
        ParticipantId::new(self.peer_participant)
    }

    /// Participants in window order: the host's participant is window 1
    pub fn participants(&self) -> [ParticipantId; 2] {
        match self.role {
            Role::Host => [self.local(), self.remote()],
            Role::Guest => [self.remote(), self.local()],
        }
    }
}
