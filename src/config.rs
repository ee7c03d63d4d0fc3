//! Command line surface and the validated run configuration

use crate::constants::*;
use crate::error::{RedeemError, Result};
use crate::keys::PrivateKey;
use crate::params::{Network, NetworkParams};
use crate::redeem::RedemptionRequest;
use crate::serialization::hash_from_hex;
use clap::Parser;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Redeem a premined, time-locked P2SH output
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    /// Private key in wallet import format
    #[clap(short = 'p', long)]
    pub private_key: String,

    /// Redeem script, hex encoded
    #[clap(short = 'r', long)]
    pub redeem_script: String,

    /// Id of the funding transaction
    #[clap(short = 't', long)]
    pub transaction_hash: String,

    /// Hash of the block containing the funding transaction
    #[clap(short = 'b', long)]
    pub block_hash: String,

    /// MAIN, TEST or REGTEST
    #[clap(short = 'n', long, default_value = "MAIN")]
    pub network: String,

    /// Verbose logging
    #[clap(short = 'd', long)]
    pub debug: bool,

    /// Peer to connect to as host:port; may be repeated. Defaults to the network's seed peers
    #[clap(long = "peer")]
    pub peers: Vec<String>,

    /// Peers that must accept the transaction
    #[clap(long, default_value_t = DEFAULT_MIN_BROADCAST_PEERS)]
    pub min_peers: usize,

    /// Seconds to wait for each network step
    #[clap(long, default_value_t = DEFAULT_NETWORK_TIMEOUT.as_secs())]
    pub timeout_secs: u64,

    /// Print a JSON report instead of the bare transaction hex
    #[clap(long)]
    pub json: bool,
}

/// Everything a run needs, checked before any network activity
#[derive(Debug, Clone)]
pub struct RedeemConfig {
    pub params: NetworkParams,
    pub request: RedemptionRequest,
    pub peers: Vec<SocketAddr>,
    pub min_peers: usize,
    pub timeout: Duration,
    pub debug: bool,
    pub json: bool,
}

impl RedeemConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let network: Network = cli.network.parse()?;
        let params = NetworkParams::for_network(network);

        let private_key = PrivateKey::from_wif(&params, &cli.private_key)?;
        let redeem_script = hex::decode(cli.redeem_script.trim())
            .map_err(|e| RedeemError::InvalidInput(format!("redeem script is not hex: {}", e)))?;
        if redeem_script.is_empty() {
            return Err(RedeemError::InvalidInput("redeem script is empty".to_string()));
        }
        if redeem_script.len() > MAX_SCRIPT_ELEMENT_SIZE {
            return Err(RedeemError::InvalidInput(format!(
                "redeem script of {} bytes exceeds the {} byte push limit",
                redeem_script.len(),
                MAX_SCRIPT_ELEMENT_SIZE
            )));
        }

        let transaction_hash = hash_from_hex(&cli.transaction_hash)?;
        let block_hash = hash_from_hex(&cli.block_hash)?;

        if cli.min_peers == 0 {
            return Err(RedeemError::InvalidInput(
                "--min-peers must be at least 1".to_string(),
            ));
        }
        if cli.timeout_secs == 0 {
            return Err(RedeemError::InvalidInput(
                "--timeout-secs must be at least 1".to_string(),
            ));
        }

        let peers = if cli.peers.is_empty() {
            params.seed_peers.clone()
        } else {
            cli.peers
                .iter()
                .map(|peer| resolve_peer(peer, params.default_port))
                .collect::<Result<Vec<_>>>()?
        };

        Ok(Self {
            request: RedemptionRequest {
                private_key,
                redeem_script,
                transaction_hash,
                block_hash,
            },
            params,
            peers,
            min_peers: cli.min_peers,
            timeout: Duration::from_secs(cli.timeout_secs),
            debug: cli.debug,
            json: cli.json,
        })
    }
}

/// Parse `host:port`, or a bare host on the network's default port
fn resolve_peer(peer: &str, default_port: u16) -> Result<SocketAddr> {
    if let Ok(addr) = peer.parse::<SocketAddr>() {
        return Ok(addr);
    }
    let with_port = if peer.contains(':') {
        peer.to_string()
    } else {
        format!("{}:{}", peer, default_port)
    };
    with_port
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| RedeemError::InvalidInput(format!("cannot resolve peer {}", peer)))
}
