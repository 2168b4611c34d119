//! Async session driver
//!
//! Runs a `Peer` against the TCP transport: the peer ticks on an interval,
//! transport events and operator commands are fed in as they arrive, and
//! whatever the link produced is handed to the socket after each step.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use matbc_core::{InputPayload, MatbcError};
use matbc_transport::{Endpoint, TcpTransport};

use crate::config::{PeerConfig, Role};
use crate::error::{RuntimeError, RuntimeResult};
use crate::peer::Peer;

/// How long the socket stays open after the session ended, so the final
/// frames reach the peer
const LINGER: Duration = Duration::from_millis(200);

/// Commands from the operator or the input device
#[derive(Clone, Debug, PartialEq)]
pub enum OperatorCommand {
    Input(InputPayload),
    Pause,
    Resume,
    End,
}

/// Bind or connect according to the peer's role
pub async fn start_transport(config: &PeerConfig) -> RuntimeResult<TcpTransport> {
    let endpoint = match config.role {
        Role::Host => Endpoint::Listen(config.listen),
        Role::Guest => Endpoint::Connect(
            config
                .connect
                .ok_or_else(|| RuntimeError::Config("a guest needs a connect address".into()))?,
        ),
    };
    let transport = TcpTransport::start(
        endpoint,
        config.reconnect.policy(),
        config.link.inbound_capacity,
        config.link.outbound_capacity,
    )
    .await?;
    Ok(transport)
}

/// Drive `peer` until its session ends or aborts. Returns the finished peer.
pub async fn run_session(
    mut peer: Peer,
    mut transport: TcpTransport,
    mut operator: mpsc::Receiver<OperatorCommand>,
) -> RuntimeResult<Peer> {
    let mut interval = tokio::time::interval(peer.config().tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut operator_open = true;

    info!(
        role = %peer.config().role,
        participant = %peer.config().local(),
        session = %peer.config().session(),
        "session loop started"
    );

    while !peer.is_finished() {
        tokio::select! {
            _ = interval.tick() => {
                peer.tick();
            }
            event = transport.recv() => match event {
                Some(event) => peer.on_transport(event),
                None => {
                    transport.shutdown();
                    return Err(MatbcError::ConnectionLost("transport stopped".into()).into());
                }
            },
            command = operator.recv(), if operator_open => match command {
                Some(command) => apply_operator(&mut peer, command),
                None => {
                    debug!("operator input closed");
                    operator_open = false;
                }
            },
        }
        flush(&mut peer, &transport);
    }

    flush(&mut peer, &transport);
    tokio::time::sleep(LINGER).await;
    transport.shutdown();
    info!(phase = %peer.phase(), at = %peer.now(), "session loop finished");
    Ok(peer)
}

fn apply_operator(peer: &mut Peer, command: OperatorCommand) {
    match command {
        OperatorCommand::Input(payload) => peer.submit_input(payload),
        OperatorCommand::Pause => peer.pause(),
        OperatorCommand::Resume => peer.resume(),
        OperatorCommand::End => {
            peer.escape();
        }
    }
}

/// Hand the link's frames to the socket driver
fn flush(peer: &mut Peer, transport: &TcpTransport) {
    let frames = peer.poll_transmit();
    let Some(epoch) = peer.epoch() else {
        if !frames.is_empty() {
            debug!(count = frames.len(), "no connection, frames dropped");
        }
        return;
    };
    for frame in frames {
        if let Err(e) = transport.try_send(epoch, frame) {
            warn!(error = %e, "frame not handed to the socket, requeueing");
            peer.requeue_outbound();
            break;
        }
    }
}

/// End-of-session figures for the log
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionSummary {
    pub phase: String,
    pub session_time_ms: u64,
    pub commands_dispatched: u64,
    pub commands_skipped: u64,
    pub inputs_submitted: u64,
    pub remote_inputs: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub frames_resent: u64,
    pub reconnects: u64,
    pub mutations_logged: u64,
}

impl SessionSummary {
    pub fn of(peer: &Peer) -> Self {
        let stats = peer.stats();
        let link = peer.link().stats();
        let reconcile = peer.reconcile_stats();
        SessionSummary {
            phase: peer.phase().to_string(),
            session_time_ms: peer.now().as_millis(),
            commands_dispatched: stats.commands_dispatched,
            commands_skipped: stats.commands_skipped,
            inputs_submitted: stats.inputs_submitted,
            remote_inputs: reconcile.remote_inputs,
            duplicates: reconcile.duplicates + link.duplicates,
            rejected: reconcile.rejected,
            messages_sent: link.messages_sent,
            messages_received: link.messages_received,
            frames_resent: link.frames_resent,
            reconnects: link.reconnects,
            mutations_logged: stats.mutations_logged,
        }
    }
}
