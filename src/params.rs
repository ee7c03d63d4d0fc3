//! Network parameters, passed explicitly to every component that needs them

use crate::constants::*;
use crate::error::RedeemError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Network {
    Main,
    Test,
    Regtest,
}

impl FromStr for Network {
    type Err = RedeemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MAIN" | "MAINNET" => Ok(Network::Main),
            "TEST" | "TESTNET" => Ok(Network::Test),
            "REGTEST" => Ok(Network::Regtest),
            other => Err(RedeemError::InvalidInput(format!(
                "unknown network {}, expected MAIN, TEST or REGTEST",
                other
            ))),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Main => "MAIN",
            Network::Test => "TEST",
            Network::Regtest => "REGTEST",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkParams {
    pub network: Network,
    /// Message start bytes of every P2P frame
    pub magic: [u8; 4],
    pub default_port: u16,
    pub p2pkh_version: u8,
    pub p2sh_version: u8,
    pub wif_version: u8,
    /// Fixed fee deducted by the redemption
    pub min_tx_fee: i64,
    pub min_nondust_output: i64,
    /// Peers dialed when none are given on the command line
    pub seed_peers: Vec<SocketAddr>,
}

impl NetworkParams {
    pub fn for_network(network: Network) -> Self {
        match network {
            Network::Main => Self::main(),
            Network::Test => Self::test(),
            Network::Regtest => Self::regtest(),
        }
    }

    pub fn main() -> Self {
        let port = 4877;
        Self {
            network: Network::Main,
            magic: [0xf9, 0xbe, 0xb4, 0xd9],
            default_port: port,
            p2pkh_version: 0x00,
            p2sh_version: 0x05,
            wif_version: 0x80,
            min_tx_fee: REFERENCE_DEFAULT_MIN_TX_FEE,
            min_nondust_output: MIN_NONDUST_OUTPUT,
            seed_peers: seeds(
                &[
                    [104, 155, 51, 239],
                    [104, 199, 126, 235],
                    [130, 211, 120, 237],
                    [104, 199, 219, 45],
                    [104, 196, 57, 34],
                ],
                port,
            ),
        }
    }

    pub fn test() -> Self {
        let port = 7475;
        Self {
            network: Network::Test,
            magic: [0x0b, 0x11, 0x09, 0x07],
            default_port: port,
            p2pkh_version: 0x6f,
            p2sh_version: 0xc4,
            wif_version: 0xef,
            min_tx_fee: REFERENCE_DEFAULT_MIN_TX_FEE,
            min_nondust_output: MIN_NONDUST_OUTPUT,
            seed_peers: seeds(
                &[
                    [104, 199, 219, 45],
                    [104, 196, 57, 34],
                    [104, 199, 118, 223],
                    [104, 196, 161, 16],
                    [104, 199, 194, 195],
                ],
                port,
            ),
        }
    }

    pub fn regtest() -> Self {
        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        Self {
            network: Network::Regtest,
            magic: [0xfa, 0xbf, 0xb5, 0xda],
            default_port: 14820,
            p2pkh_version: 0x6f,
            p2sh_version: 0xc4,
            wif_version: 0xef,
            min_tx_fee: REFERENCE_DEFAULT_MIN_TX_FEE,
            min_nondust_output: MIN_NONDUST_OUTPUT,
            seed_peers: (14820..=14822)
                .map(|port| SocketAddr::new(localhost, port))
                .collect(),
        }
    }
}

fn seeds(ips: &[[u8; 4]], port: u16) -> Vec<SocketAddr> {
    ips.iter()
        .map(|ip| SocketAddr::new(IpAddr::V4(Ipv4Addr::from(*ip)), port))
        .collect()
}
