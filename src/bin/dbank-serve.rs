use std::{
    io::{BufReader, BufWriter},
    net::{TcpListener, TcpStream},
    path::{Path, PathBuf},
    sync::Arc,
    thread,
};

use clap::Parser;
use dbank_cli::{
    config::BankConfig,
    ledger::Address,
    logging, server, snapshot, StakingService,
};
use tracing::{debug, info, warn};

/// Serves the bank over line-delimited JSON on TCP.
///
/// Each line is a request (`{"call": …}` or `{"query": …}`); each response is
/// one line. With `--state`, the bank is loaded from the file (or deployed
/// from `--config` when the file is missing) and written back after every
/// successful call.
#[derive(Debug, Parser)]
#[command(name = "dbank-serve", version)]
struct Args {
    #[arg(long, env = "DBANK_BIND", default_value = "127.0.0.1:7411")]
    bind: String,

    #[arg(long, env = "DBANK_STATE")]
    state: Option<PathBuf>,

    #[arg(long, env = "DBANK_CONFIG")]
    config: Option<PathBuf>,

    /// Owner of a freshly deployed bank.
    #[arg(long)]
    owner: Option<Address>,
}

fn open_service(args: &Args) -> Result<StakingService, String> {
    if let Some(path) = args.state.as_deref().filter(|p| p.exists()) {
        let bank = snapshot::load_state(path).map_err(|e| e.to_string())?;
        info!(path = %path.display(), height = bank.height(), "state loaded");
        return Ok(StakingService::new(bank));
    }
    let owner = args
        .owner
        .clone()
        .ok_or("no state to load: pass --owner to deploy a new bank")?;
    let config = BankConfig::load_or_default(args.config.as_deref()).map_err(|e| e.to_string())?;
    let bank = config.deploy(owner, None).map_err(|e| e.to_string())?;
    info!(address = %bank.address(), owner = %bank.owner(), "bank deployed");
    let service = StakingService::new(bank);
    if let Some(path) = &args.state {
        service.persist(path).map_err(|e| e.to_string())?;
    }
    Ok(service)
}

fn handle_conn(
    stream: TcpStream,
    service: &StakingService,
    state: Option<&Path>,
) -> std::io::Result<()> {
    let peer = stream.peer_addr()?;
    let reader = BufReader::new(stream.try_clone()?);
    debug!(%peer, "connection opened");
    server::serve_connection(reader, BufWriter::new(stream), service, state)?;
    debug!(%peer, "connection closed");
    Ok(())
}

fn main() {
    logging::init("dbank-serve");
    let args = Args::parse();

    let service = match open_service(&args) {
        Ok(service) => Arc::new(service),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };
    let listener = match TcpListener::bind(&args.bind) {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("error: bind {}: {err}", args.bind);
            std::process::exit(2);
        }
    };
    info!(bind = %args.bind, root = %hex::encode(service.state_root()), "serving");

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(err) => {
                warn!(%err, "accept failed");
                continue;
            }
        };
        let service = Arc::clone(&service);
        let state = args.state.clone();
        thread::spawn(move || {
            if let Err(err) = handle_conn(stream, &service, state.as_deref()) {
                warn!(%err, "connection dropped");
            }
        });
    }
}
