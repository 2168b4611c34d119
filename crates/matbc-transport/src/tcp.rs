//! TCP driver for the sync link
//!
//! One background task owns the socket. It (re)establishes the connection,
//! multiplexes reads and writes on it, and reports everything to the session
//! loop through a bounded channel. When that channel is full the
//! reader stops reading, and TCP flow control slows the remote down.
//!
//! Every connection gets a new epoch. Outbound frames carry the epoch they
//! were produced for; frames for an older connection are discarded, so the
//! first thing a fresh connection carries is the session loop's hello.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use matbc_core::{MatbcError, MatbcResult};
use matbc_wire::{Frame, FrameDecoder};

/// Which side opens the connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// Host: accept the guest, and accept it again after a drop
    Listen(SocketAddr),
    /// Guest: connect to the host, retrying with backoff
    Connect(SocketAddr),
}

/// Reconnect backoff
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before connect attempt `attempt` (0-based): doubling from the
    /// initial backoff, capped, plus up to a quarter of jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self
            .initial_backoff
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max_backoff);
        let jitter_ms = (base.as_millis() as u64) / 4;
        let jitter = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=jitter_ms)
        } else {
            0
        };
        base + Duration::from_millis(jitter)
    }
}

/// What the driver reports to the session loop
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    Connected { epoch: u64, peer: SocketAddr },
    Frame { epoch: u64, frame: Frame },
    Disconnected { epoch: u64, reason: String },
}

struct Outbound {
    epoch: u64,
    frame: Frame,
}

/// Handle to a running TCP driver
pub struct TcpTransport {
    events: mpsc::Receiver<TransportEvent>,
    outbound: mpsc::Sender<Outbound>,
    local_addr: Option<SocketAddr>,
    task: JoinHandle<()>,
}

impl TcpTransport {
    /// Start the driver. A listening endpoint is bound before this returns,
    /// so bind errors surface here.
    pub async fn start(
        endpoint: Endpoint,
        policy: ReconnectPolicy,
        inbound_capacity: usize,
        outbound_capacity: usize,
    ) -> MatbcResult<Self> {
        let (event_tx, events) = mpsc::channel(inbound_capacity.max(1));
        let (outbound, outbound_rx) = mpsc::channel(outbound_capacity.max(1));

        let (task, local_addr) = match endpoint {
            Endpoint::Listen(addr) => {
                let listener = TcpListener::bind(addr)
                    .await
                    .map_err(|e| MatbcError::TransportError(e.to_string()))?;
                let local = listener
                    .local_addr()
                    .map_err(|e| MatbcError::TransportError(e.to_string()))?;
                info!(addr = %local, "listening for peer");
                let task = tokio::spawn(run_listener(listener, event_tx, outbound_rx));
                (task, Some(local))
            }
            Endpoint::Connect(addr) => {
                let task = tokio::spawn(run_connector(addr, policy, event_tx, outbound_rx));
                (task, None)
            }
        };

        Ok(TcpTransport {
            events,
            outbound,
            local_addr,
            task,
        })
    }

    /// Bound address of a listening endpoint
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Queue a frame for the connection identified by `epoch`. Never waits.
    pub fn try_send(&self, epoch: u64, frame: Frame) -> MatbcResult<()> {
        self.outbound
            .try_send(Outbound { epoch, frame })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    MatbcError::OutboundFull(self.outbound.max_capacity())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    MatbcError::ConnectionLost("transport stopped".into())
                }
            })
    }

    /// Next event, waiting for one
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Next event if one is ready
    pub fn try_recv(&mut self) -> Option<TransportEvent> {
        self.events.try_recv().ok()
    }

    /// Stop the driver and drop the connection
    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_listener(
    listener: TcpListener,
    events: mpsc::Sender<TransportEvent>,
    mut outbound: mpsc::Receiver<Outbound>,
) {
    let mut epoch = 0;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        epoch += 1;
        if !serve(stream, peer, epoch, &events, &mut outbound).await {
            return;
        }
    }
}

async fn run_connector(
    addr: SocketAddr,
    policy: ReconnectPolicy,
    events: mpsc::Sender<TransportEvent>,
    mut outbound: mpsc::Receiver<Outbound>,
) {
    let mut epoch = 0;
    let mut attempt = 0;
    loop {
        let stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(e) => {
                let delay = policy.delay(attempt);
                debug!(addr = %addr, error = %e, retry_in = ?delay, "connect failed");
                attempt = attempt.saturating_add(1);
                tokio::time::sleep(delay).await;
                continue;
            }
        };
        attempt = 0;
        epoch += 1;
        if !serve(stream, addr, epoch, &events, &mut outbound).await {
            return;
        }
        tokio::time::sleep(policy.delay(0)).await;
    }
}

/// Run one connection until it drops. Returns false once the session loop
/// has gone away.
async fn serve(
    stream: TcpStream,
    peer: SocketAddr,
    epoch: u64,
    events: &mpsc::Sender<TransportEvent>,
    outbound: &mut mpsc::Receiver<Outbound>,
) -> bool {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "set_nodelay failed");
    }
    info!(peer = %peer, epoch = epoch, "peer connected");

    // Frames still queued for an earlier connection
    while let Ok(stale) = outbound.try_recv() {
        debug!(seq = stale.frame.seq(), "discarding frame for closed connection");
    }
    if events.send(TransportEvent::Connected { epoch, peer }).await.is_err() {
        return false;
    }

    let (mut read_half, mut write_half) = stream.into_split();
    let mut decoder = FrameDecoder::new();
    let mut buf = BytesMut::with_capacity(4096);

    let reason = loop {
        tokio::select! {
            item = outbound.recv() => {
                let Some(Outbound { epoch: e, frame }) = item else {
                    return false;
                };
                if e != epoch {
                    continue;
                }
                buf.clear();
                if let Err(err) = frame.encode_into(&mut buf) {
                    warn!(error = %err, "frame not encodable");
                    continue;
                }
                if let Err(err) = write_half.write_all(&buf).await {
                    break err.to_string();
                }
            }
            read = read_half.read_buf(decoder.buffer_mut()) => {
                match read {
                    Ok(0) => break "closed by peer".to_string(),
                    Ok(_) => {}
                    Err(err) => break err.to_string(),
                }
                match forward_frames(&mut decoder, epoch, events).await {
                    Ok(true) => {}
                    Ok(false) => return false,
                    Err(reason) => break reason,
                }
            }
        }
    };

    info!(peer = %peer, epoch = epoch, reason = %reason, "peer disconnected");
    events
        .send(TransportEvent::Disconnected { epoch, reason })
        .await
        .is_ok()
}

/// Hand every complete frame to the session loop. Waits while the loop is
/// behind, which stops reading from the socket. `Ok(false)` if the loop has
/// gone away.
async fn forward_frames(
    decoder: &mut FrameDecoder,
    epoch: u64,
    events: &mpsc::Sender<TransportEvent>,
) -> Result<bool, String> {
    loop {
        match decoder.next_frame() {
            Ok(Some(frame)) => {
                if events.send(TransportEvent::Frame { epoch, frame }).await.is_err() {
                    return Ok(false);
                }
            }
            Ok(None) => return Ok(true),
            Err(e) => return Err(format!("undecodable stream: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matbc_core::{ParticipantId, SessionId, SessionTime};
    use matbc_wire::SyncMessage;

    fn heartbeat(ms: u64) -> Frame {
        Frame::from_message(
            SessionId::new(1),
            ParticipantId::new(1),
            0,
            &SyncMessage::Heartbeat {
                at: SessionTime::from_millis(ms),
            },
        )
        .unwrap()
    }

    async fn next_connected(transport: &mut TcpTransport) -> u64 {
        loop {
            match transport.recv().await {
                Some(TransportEvent::Connected { epoch, .. }) => return epoch,
                Some(_) => continue,
                None => panic!("transport stopped"),
            }
        }
    }

    async fn next_frame(transport: &mut TcpTransport) -> Frame {
        loop {
            match transport.recv().await {
                Some(TransportEvent::Frame { frame, .. }) => return frame,
                Some(_) => continue,
                None => panic!("transport stopped"),
            }
        }
    }

    async fn listener() -> (TcpTransport, SocketAddr) {
        let host = TcpTransport::start(
            Endpoint::Listen("127.0.0.1:0".parse().unwrap()),
            ReconnectPolicy::default(),
            16,
            16,
        )
        .await
        .unwrap();
        let addr = host.local_addr().unwrap();
        (host, addr)
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectPolicy {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(700),
        };
        let first = policy.delay(0);
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(125));
        let third = policy.delay(2);
        assert!(third >= Duration::from_millis(400) && third <= Duration::from_millis(500));
        let capped = policy.delay(10);
        assert!(capped >= Duration::from_millis(700) && capped <= Duration::from_millis(875));
    }

    #[tokio::test]
    async fn test_frames_cross_in_both_directions() {
        let (mut host, addr) = listener().await;
        let mut guest = TcpTransport::start(Endpoint::Connect(addr), ReconnectPolicy::default(), 16, 16)
            .await
            .unwrap();

        let guest_epoch = next_connected(&mut guest).await;
        let host_epoch = next_connected(&mut host).await;

        guest.try_send(guest_epoch, heartbeat(1)).unwrap();
        assert_eq!(next_frame(&mut host).await, heartbeat(1));

        host.try_send(host_epoch, heartbeat(2)).unwrap();
        assert_eq!(next_frame(&mut guest).await, heartbeat(2));
    }

    #[tokio::test]
    async fn test_stale_epoch_not_written() {
        let (mut host, addr) = listener().await;
        let mut guest = TcpTransport::start(Endpoint::Connect(addr), ReconnectPolicy::default(), 16, 16)
            .await
            .unwrap();
        let epoch = next_connected(&mut guest).await;
        next_connected(&mut host).await;

        guest.try_send(epoch + 1, heartbeat(1)).unwrap();
        guest.try_send(epoch, heartbeat(2)).unwrap();
        assert_eq!(next_frame(&mut host).await, heartbeat(2));
    }

    #[tokio::test]
    async fn test_listener_accepts_reconnecting_guest() {
        let (mut host, addr) = listener().await;

        let mut first = TcpTransport::start(Endpoint::Connect(addr), ReconnectPolicy::default(), 16, 16)
            .await
            .unwrap();
        next_connected(&mut first).await;
        assert_eq!(next_connected(&mut host).await, 1);
        first.shutdown();

        match host.recv().await {
            Some(TransportEvent::Disconnected { epoch, .. }) => assert_eq!(epoch, 1),
            other => panic!("unexpected {:?}", other),
        }

        let mut second = TcpTransport::start(Endpoint::Connect(addr), ReconnectPolicy::default(), 16, 16)
            .await
            .unwrap();
        let epoch = next_connected(&mut second).await;
        assert_eq!(next_connected(&mut host).await, 2);

        second.try_send(epoch, heartbeat(3)).unwrap();
        assert_eq!(next_frame(&mut host).await, heartbeat(3));
    }

    #[tokio::test]
    async fn test_connector_retries_until_host_appears() {
        // Reserve a port, then free it so the first attempts fail
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let policy = ReconnectPolicy {
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(50),
        };
        let mut guest = TcpTransport::start(Endpoint::Connect(addr), policy, 16, 16)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let mut host = TcpTransport::start(Endpoint::Listen(addr), ReconnectPolicy::default(), 16, 16)
            .await
            .unwrap();
        next_connected(&mut guest).await;
        next_connected(&mut host).await;
    }
}
