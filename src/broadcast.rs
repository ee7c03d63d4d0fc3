//! Submission of the signed redemption to a set of peers

use crate::error::{RedeemError, Result};
use crate::serialization::{hash_to_hex, serialize_transaction};
use crate::transaction::calculate_txid;
use crate::types::*;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// A peer accepted the transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Acknowledgment {
    pub peer: String,
}

/// One peer the transaction can be submitted to
pub trait TransactionRelay: Send + Sync + 'static {
    fn peer_label(&self) -> String;

    /// Send the serialized transaction and resolve once the peer has accepted it
    fn submit(
        &self,
        tx_bytes: Arc<Vec<u8>>,
        txid: Hash,
    ) -> impl Future<Output = Result<Acknowledgment>> + Send;
}

/// Terminal success of a broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BroadcastOutcome {
    pub txid: String,
    pub acknowledgments: Vec<Acknowledgment>,
}

pub struct BroadcastCoordinator<R: TransactionRelay> {
    relays: Vec<Arc<R>>,
    timeout: Duration,
}

impl<R: TransactionRelay> BroadcastCoordinator<R> {
    pub fn new(relays: Vec<Arc<R>>, timeout: Duration) -> Self {
        Self { relays, timeout }
    }

    /// Broadcast: 𝒯𝒳 × ℕ → {acknowledged, failed}
    ///
    /// 1. Serialize once and submit to every relay concurrently
    /// 2. Succeed as soon as `min_acknowledging_peers` relays acknowledged
    /// 3. Fail on too few relays, any relay failure before the threshold, exhaustion, or timeout
    ///
    /// Submissions still in flight are aborted when this returns.
    pub async fn broadcast(
        &self,
        tx: &Transaction,
        min_acknowledging_peers: usize,
    ) -> Result<BroadcastOutcome> {
        if min_acknowledging_peers == 0 {
            return Err(RedeemError::InvalidInput(
                "at least one peer must acknowledge the broadcast".to_string(),
            ));
        }
        if self.relays.len() < min_acknowledging_peers {
            return Err(RedeemError::BroadcastFailed(format!(
                "{} peers connected, {} acknowledgments required",
                self.relays.len(),
                min_acknowledging_peers
            )));
        }

        let tx_bytes = Arc::new(serialize_transaction(tx));
        let txid = calculate_txid(tx);
        info!(
            "Broadcasting {} to {} peers",
            hash_to_hex(&txid),
            self.relays.len()
        );

        let mut tasks = JoinSet::new();
        for relay in &self.relays {
            let relay = Arc::clone(relay);
            let tx_bytes = Arc::clone(&tx_bytes);
            tasks.spawn(async move {
                let label = relay.peer_label();
                (label, relay.submit(tx_bytes, txid).await)
            });
        }

        let collect = async {
            let mut acknowledgments = Vec::with_capacity(min_acknowledging_peers);
            while let Some(joined) = tasks.join_next().await {
                let (label, result) = joined.map_err(|e| {
                    RedeemError::BroadcastFailed(format!("relay task failed: {}", e))
                })?;
                match result {
                    Ok(ack) => {
                        debug!("Peer {} acknowledged", ack.peer);
                        acknowledgments.push(ack);
                        if acknowledgments.len() >= min_acknowledging_peers {
                            return Ok(acknowledgments);
                        }
                    }
                    Err(e) => {
                        warn!("Peer {} failed: {}", label, e);
                        return Err(RedeemError::BroadcastFailed(format!("{}: {}", label, e)));
                    }
                }
            }
            Err(RedeemError::BroadcastFailed(format!(
                "only {} of {} required peers acknowledged",
                acknowledgments.len(),
                min_acknowledging_peers
            )))
        };

        let acknowledgments = match tokio::time::timeout(self.timeout, collect).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RedeemError::BroadcastFailed(format!(
                    "timed out after {}s waiting for {} acknowledgments",
                    self.timeout.as_secs(),
                    min_acknowledging_peers
                )))
            }
        };

        Ok(BroadcastOutcome {
            txid: hash_to_hex(&txid),
            acknowledgments,
        })
    }
}
