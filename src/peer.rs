//! TCP peer connections: chain queries and transaction relay over the P2P protocol

use crate::broadcast::{Acknowledgment, TransactionRelay};
use crate::chain::ChainSource;
use crate::constants::*;
use crate::error::{RedeemError, Result};
use crate::network::*;
use crate::params::NetworkParams;
use crate::serialization::{block_hash, hash_to_hex};
use crate::types::*;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Nonce for version and ping messages
fn nonce() -> u64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .map_or(0, |nanos| nanos as u64)
}

/// Anything a peer does wrong while serving chain data leaves the chain unavailable
fn chain_unavailable(peer: SocketAddr, error: RedeemError) -> RedeemError {
    match error {
        RedeemError::ChainUnavailable(_) => error,
        other => RedeemError::ChainUnavailable(format!("peer {}: {}", peer, other)),
    }
}

/// A handshaken connection to one peer
pub struct PeerConnection {
    addr: SocketAddr,
    magic: [u8; 4],
    stream: TcpStream,
    state: PeerState,
    timeout: Duration,
}

impl PeerConnection {
    /// Dial `addr` and complete the version/verack exchange within `timeout`
    pub async fn connect(params: &NetworkParams, addr: SocketAddr, timeout: Duration) -> Result<Self> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| RedeemError::ChainUnavailable(format!("connecting to {} timed out", addr)))?
            .map_err(|e| RedeemError::ChainUnavailable(format!("connecting to {}: {}", addr, e)))?;

        let mut peer = Self {
            addr,
            magic: params.magic,
            stream,
            state: PeerState::new(),
            timeout,
        };
        peer.with_timeout("handshake", Self::handshake).await?;
        info!(
            "Connected to {} ({}, height {})",
            addr, peer.state.user_agent, peer.state.start_height
        );
        Ok(peer)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Chain height the peer announced in its version message
    pub fn start_height(&self) -> i32 {
        self.state.start_height
    }

    pub fn state(&self) -> &PeerState {
        &self.state
    }

    async fn with_timeout<'s, T, F, Fut>(&'s mut self, what: &str, op: F) -> Result<T>
    where
        F: FnOnce(&'s mut Self) -> Fut,
        Fut: Future<Output = Result<T>> + 's,
    {
        let addr = self.addr;
        let limit = self.timeout;
        tokio::time::timeout(limit, op(self)).await.map_err(|_| {
            RedeemError::ChainUnavailable(format!(
                "{} with {} timed out after {}s",
                what,
                addr,
                limit.as_secs()
            ))
        })?
    }

    async fn handshake(&mut self) -> Result<()> {
        let timestamp = chrono::Utc::now().timestamp();
        self.send(&NetworkMessage::Version(VersionMessage::outbound(
            self.addr,
            nonce(),
            timestamp,
        )))
        .await?;

        while !(self.state.version_received && self.state.handshake_complete) {
            let message = self.read_message().await?;
            if let NetworkResponse::Reject(reason) = self.respond(&message).await? {
                return Err(RedeemError::ChainUnavailable(format!(
                    "peer {} refused handshake: {}",
                    self.addr, reason
                )));
            }
        }
        Ok(())
    }

    async fn send(&mut self, message: &NetworkMessage) -> Result<()> {
        debug!("-> {} {}", self.addr, message.command());
        self.write_frame(&encode_message(self.magic, message)).await
    }

    async fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.stream
            .write_all(frame)
            .await
            .map_err(|e| RedeemError::ChainUnavailable(format!("write to {}: {}", self.addr, e)))
    }

    async fn read_message(&mut self) -> Result<NetworkMessage> {
        let mut header_bytes = [0u8; MESSAGE_HEADER_SIZE];
        self.stream
            .read_exact(&mut header_bytes)
            .await
            .map_err(|e| RedeemError::ChainUnavailable(format!("read from {}: {}", self.addr, e)))?;
        let header = parse_header(self.magic, &header_bytes)?;

        let mut payload = vec![0u8; header.length];
        self.stream
            .read_exact(&mut payload)
            .await
            .map_err(|e| RedeemError::ChainUnavailable(format!("read from {}: {}", self.addr, e)))?;
        let message = decode_payload(&header, &payload)?;
        debug!("<- {} {}", self.addr, message.command());
        Ok(message)
    }

    /// Apply protocol housekeeping for `message`, sending any reply it calls for
    async fn respond(&mut self, message: &NetworkMessage) -> Result<NetworkResponse> {
        let response = process_network_message(message, &mut self.state)?;
        if let NetworkResponse::SendMessage(reply) = &response {
            self.send(reply).await?;
        }
        Ok(response)
    }

    /// Download a full block
    pub async fn get_block(&mut self, hash: &Hash) -> Result<Block> {
        let hash = *hash;
        self.with_timeout("block download", move |peer| async move {
            peer.send(&NetworkMessage::GetData(InvMessage {
                inventory: vec![InventoryVector {
                    inv_type: MSG_BLOCK,
                    hash,
                }],
            }))
            .await?;

            loop {
                let message = peer.read_message().await?;
                match &message {
                    NetworkMessage::Block(block) if block_hash(&block.header) == hash => {
                        return Ok(block.clone());
                    }
                    NetworkMessage::NotFound(inv) if inv.inventory.iter().any(|i| i.hash == hash) => {
                        return Err(RedeemError::ChainUnavailable(format!(
                            "peer {} does not have block {}",
                            peer.addr,
                            hash_to_hex(&hash)
                        )));
                    }
                    _ => {
                        peer.respond(&message).await?;
                    }
                }
            }
        })
        .await
    }

    /// Headers following the first locator hash the peer knows, up to MAX_HEADERS_RESULTS
    pub async fn get_headers(&mut self, locator: Vec<Hash>) -> Result<Vec<BlockHeader>> {
        self.with_timeout("header download", move |peer| async move {
            peer.send(&NetworkMessage::GetHeaders(GetHeadersMessage {
                version: PROTOCOL_VERSION,
                block_locator_hashes: locator,
                hash_stop: [0; 32],
            }))
            .await?;

            loop {
                let message = peer.read_message().await?;
                if let NetworkMessage::Headers(headers) = message {
                    return Ok(headers.headers);
                }
                peer.respond(&message).await?;
            }
        })
        .await
    }

    /// Send a serialized transaction, then ping; the matching pong without a reject counts as acceptance
    pub async fn send_transaction(&mut self, tx_bytes: &[u8], txid: &Hash) -> Result<()> {
        let txid = *txid;
        let frame = encode_frame(self.magic, "tx", tx_bytes);
        let result = self
            .with_timeout("transaction relay", move |peer| async move {
                peer.write_frame(&frame).await?;
                let ping_nonce = nonce();
                peer.state.ping_nonce = Some(ping_nonce);
                peer.send(&NetworkMessage::Ping(PingMessage { nonce: ping_nonce }))
                    .await?;

                loop {
                    let message = peer.read_message().await?;
                    match &message {
                        NetworkMessage::Reject(reject) if reject.rejects_tx(&txid) => {
                            return Err(RedeemError::BroadcastFailed(format!(
                                "peer {} rejected the transaction: {}",
                                peer.addr, reject.reason
                            )));
                        }
                        // Peers that learn the txid first ask for it
                        NetworkMessage::GetData(inv)
                            if inv.inventory.iter().any(|i| i.inv_type == MSG_TX && i.hash == txid) =>
                        {
                            peer.write_frame(&frame).await?;
                        }
                        _ => {
                            peer.respond(&message).await?;
                            if peer.state.ping_nonce.is_none() {
                                return Ok(());
                            }
                        }
                    }
                }
            })
            .await;

        result.map_err(|e| match e {
            RedeemError::BroadcastFailed(_) => e,
            other => RedeemError::BroadcastFailed(other.to_string()),
        })
    }
}

/// The set of connected peers, serving as the chain source
pub struct PeerGroup {
    peers: Vec<Arc<Mutex<PeerConnection>>>,
    addrs: Vec<SocketAddr>,
    start_heights: Vec<i32>,
}

impl PeerGroup {
    /// Dial every address concurrently; peers that fail are logged and skipped
    pub async fn connect(params: &NetworkParams, addrs: &[SocketAddr], timeout: Duration) -> Result<Self> {
        let mut tasks = JoinSet::new();
        for addr in addrs.iter().copied() {
            let params = params.clone();
            tasks.spawn(async move { (addr, PeerConnection::connect(&params, addr, timeout).await) });
        }

        let mut connections = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(peer))) => connections.push(peer),
                Ok((addr, Err(e))) => warn!("Skipping peer {}: {}", addr, e),
                Err(e) => warn!("Peer connection task failed: {}", e),
            }
        }

        if connections.is_empty() {
            return Err(RedeemError::ChainUnavailable(format!(
                "none of {} peers could be reached",
                addrs.len()
            )));
        }
        Ok(Self::from_connections(connections))
    }

    pub fn from_connections(connections: Vec<PeerConnection>) -> Self {
        let addrs = connections.iter().map(PeerConnection::addr).collect();
        let start_heights = connections.iter().map(PeerConnection::start_height).collect();
        let peers = connections
            .into_iter()
            .map(|peer| Arc::new(Mutex::new(peer)))
            .collect();
        Self {
            peers,
            addrs,
            start_heights,
        }
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// One relay per connected peer, sharing the connections
    pub fn relays(&self) -> Vec<Arc<PeerRelay>> {
        self.peers
            .iter()
            .zip(&self.addrs)
            .map(|(peer, addr)| {
                Arc::new(PeerRelay {
                    peer: Arc::clone(peer),
                    label: addr.to_string(),
                })
            })
            .collect()
    }

    async fn headers_after(&self, locator: Hash) -> Result<Vec<BlockHeader>> {
        let mut last_error = None;
        for peer in &self.peers {
            let mut peer = peer.lock().await;
            match peer.get_headers(vec![locator]).await {
                Ok(headers) => return Ok(headers),
                Err(e) => {
                    warn!("Header request to {} failed: {}", peer.addr(), e);
                    last_error = Some(chain_unavailable(peer.addr(), e));
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| RedeemError::ChainUnavailable("no peers connected".to_string())))
    }
}

/// Most frequently announced height; ties go to the higher height
fn consensus_height(start_heights: &[i32]) -> Option<u32> {
    let mut counts: HashMap<i32, usize> = HashMap::new();
    for height in start_heights {
        *counts.entry(*height).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(height, count)| (*count, *height))
        .and_then(|(height, _)| u32::try_from(height).ok())
}

impl ChainSource for PeerGroup {
    async fn fetch_block(&self, hash: &Hash) -> Result<Block> {
        let mut last_error = None;
        for peer in &self.peers {
            let mut peer = peer.lock().await;
            match peer.get_block(hash).await {
                Ok(block) => return Ok(block),
                Err(e) => {
                    warn!("Block request to {} failed: {}", peer.addr(), e);
                    last_error = Some(chain_unavailable(peer.addr(), e));
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| RedeemError::ChainUnavailable("no peers connected".to_string())))
    }

    async fn tip_height(&self) -> Result<u32> {
        consensus_height(&self.start_heights).ok_or_else(|| {
            RedeemError::ChainUnavailable("peers announced no usable chain height".to_string())
        })
    }

    /// Walks headers forward from `known_block` to the tip and reads the one before it
    async fn prior_block_time(&self, known_block: &Hash) -> Result<u32> {
        let mut locator = *known_block;
        let mut tail: Vec<BlockHeader> = Vec::with_capacity(2);
        loop {
            let headers = self.headers_after(locator).await?;
            let full = headers.len() >= MAX_HEADERS_RESULTS;
            if let Some(last) = headers.last() {
                locator = block_hash(last);
            }
            tail.extend(headers.into_iter().rev().take(2).rev());
            if tail.len() > 2 {
                tail.drain(..tail.len() - 2);
            }
            if !full {
                break;
            }
        }

        match tail.len() {
            2 => Ok(tail[0].timestamp),
            // The known block sits right before the tip
            1 => Ok(self.fetch_block(known_block).await?.header.timestamp),
            // The known block is the tip
            _ => {
                let tip = self.fetch_block(known_block).await?;
                let parent = self.fetch_block(&tip.header.prev_block_hash).await?;
                Ok(parent.header.timestamp)
            }
        }
    }
}

/// Submits transactions over one peer connection
pub struct PeerRelay {
    peer: Arc<Mutex<PeerConnection>>,
    label: String,
}

impl TransactionRelay for PeerRelay {
    fn peer_label(&self) -> String {
        self.label.clone()
    }

    async fn submit(&self, tx_bytes: Arc<Vec<u8>>, txid: Hash) -> Result<Acknowledgment> {
        let mut peer = self.peer.lock().await;
        peer.send_transaction(&tx_bytes, &txid).await?;
        Ok(Acknowledgment {
            peer: self.label.clone(),
        })
    }
}
