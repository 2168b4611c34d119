//! matbc-peer - run one side of a two-participant session
//!
//! Operator input is read from stdin, one command per line: `pause`,
//! `resume`, `end`, or a JSON participant input such as
//! `{"kind":"pump_toggle","pump":3}`.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use matbc_core::{InputPayload, MatbcError};
use matbc_runtime::{
    logging, run_session, start_transport, OperatorCommand, Peer, PeerConfig, PeerPhase, Role,
    RuntimeError, RuntimeResult, SessionSummary,
};

#[derive(Parser, Debug)]
#[command(name = "matbc-peer", version, about = "Run one peer of a MATBC session")]
struct Cli {
    /// Scenario file
    #[arg(long)]
    scenario: PathBuf,

    /// host or guest
    #[arg(long)]
    role: Option<Role>,

    /// Address the host listens on
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Host address a guest connects to
    #[arg(long)]
    connect: Option<SocketAddr>,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("matbc-peer: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> RuntimeResult<()> {
    logging::init(cli.json_logs, &cli.log_level)?;

    let config = build_config(&cli)?;
    let text = std::fs::read_to_string(&cli.scenario).map_err(|source| RuntimeError::Io {
        path: cli.scenario.display().to_string(),
        source,
    })?;
    let commands = Peer::load_scenario(&config, &text)?;
    info!(
        scenario = %cli.scenario.display(),
        commands = commands.len(),
        "scenario loaded"
    );

    let transport = start_transport(&config).await?;
    if let Some(addr) = transport.local_addr() {
        info!(addr = %addr, "waiting for the guest");
    }

    let (operator_tx, operator_rx) = mpsc::channel(64);
    tokio::spawn(read_operator(operator_tx));

    let peer = run_session(Peer::new(config, commands), transport, operator_rx).await?;

    let summary = SessionSummary::of(&peer);
    match serde_json::to_string(&summary) {
        Ok(json) => info!(summary = %json, "session summary"),
        Err(e) => warn!(error = %e, "summary not serialisable"),
    }

    if peer.phase() == PeerPhase::Aborted {
        return Err(MatbcError::SessionAborted.into());
    }
    Ok(())
}

/// Config file first, then command line overrides
fn build_config(cli: &Cli) -> RuntimeResult<PeerConfig> {
    let mut config = match &cli.config {
        Some(path) => PeerConfig::from_file(path)?,
        None => PeerConfig::default(),
    };

    if let Some(role) = cli.role {
        if cli.config.is_none() && role == Role::Guest {
            config.participant = 2;
            config.peer_participant = 1;
        }
        config.role = role;
    }
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(connect) = cli.connect {
        config.connect = Some(connect);
    }

    config.validate()?;
    Ok(config)
}

async fn read_operator(tx: mpsc::Sender<OperatorCommand>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "stdin closed");
                return;
            }
        };
        let command = match line.trim() {
            "" => continue,
            "pause" => OperatorCommand::Pause,
            "resume" => OperatorCommand::Resume,
            "end" => OperatorCommand::End,
            json => match serde_json::from_str::<InputPayload>(json) {
                Ok(payload) => OperatorCommand::Input(payload),
                Err(e) => {
                    warn!(error = %e, line = json, "unrecognised input line");
                    continue;
                }
            },
        };
        if tx.send(command).await.is_err() {
            return;
        }
    }
}
