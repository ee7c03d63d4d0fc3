//! Chain state the redemption depends on

use crate::error::{RedeemError, Result};
use crate::serialization::hash_to_hex;
use crate::types::*;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Source of blocks and chain tip information
pub trait ChainSource {
    /// Full block with the given hash
    fn fetch_block(&self, hash: &Hash) -> impl Future<Output = Result<Block>> + Send;

    /// Height of the best chain tip
    fn tip_height(&self) -> impl Future<Output = Result<u32>> + Send;

    /// Timestamp of the block before the tip; `known_block` is any block on the best chain to start from
    fn prior_block_time(&self, known_block: &Hash) -> impl Future<Output = Result<u32>> + Send;
}

/// Fetch a block, giving up after `timeout`
pub async fn fetch_block_with_timeout<C: ChainSource>(
    source: &C,
    hash: &Hash,
    timeout: Duration,
) -> Result<Block> {
    match tokio::time::timeout(timeout, source.fetch_block(hash)).await {
        Ok(result) => result,
        Err(_) => Err(RedeemError::ChainUnavailable(format!(
            "block {} not received within {}s",
            hash_to_hex(hash),
            timeout.as_secs()
        ))),
    }
}

/// Tip height and prior block time, read once for the finality check
pub async fn chain_snapshot<C: ChainSource>(source: &C, anchor: &Hash) -> Result<ChainSnapshot> {
    let tip_height = source.tip_height().await?;
    let prior_block_time = source.prior_block_time(anchor).await?;
    debug!(
        "Chain tip height {}, prior block time {}",
        tip_height, prior_block_time
    );
    Ok(ChainSnapshot {
        tip_height,
        prior_block_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowChain;

    impl ChainSource for SlowChain {
        async fn fetch_block(&self, _hash: &Hash) -> Result<Block> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(RedeemError::ChainUnavailable("unreachable".to_string()))
        }

        async fn tip_height(&self) -> Result<u32> {
            Ok(42)
        }

        async fn prior_block_time(&self, _known_block: &Hash) -> Result<u32> {
            Ok(1_600_000_000)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_times_out() {
        let result = fetch_block_with_timeout(&SlowChain, &[0; 32], Duration::from_secs(5)).await;
        assert!(matches!(result, Err(RedeemError::ChainUnavailable(_))));
    }

    #[tokio::test]
    async fn test_snapshot() {
        let snapshot = chain_snapshot(&SlowChain, &[0; 32]).await.unwrap();
        assert_eq!(
            snapshot,
            ChainSnapshot {
                tip_height: 42,
                prior_block_time: 1_600_000_000,
            }
        );
    }
}
