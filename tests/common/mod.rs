//! Fixtures shared by the integration tests
#![allow(dead_code)]

use premine_redeemer::keys::hash160;
use premine_redeemer::script::{p2pkh_script_pubkey, p2sh_script_pubkey, push_data};
use premine_redeemer::serialization::block_hash;
use premine_redeemer::transaction::calculate_txid;
use premine_redeemer::*;
use std::collections::HashMap;

pub const KEY_WIF: &str = "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn";
pub const LOCK_TIME: u32 = 1_700_000_000;

pub fn key(params: &NetworkParams) -> PrivateKey {
    PrivateKey::from_wif(params, KEY_WIF).unwrap()
}

/// <lock time> OP_CHECKLOCKTIMEVERIFY OP_DROP OP_DUP OP_HASH160 <pkh> OP_EQUALVERIFY OP_CHECKSIG
pub fn cltv_redeem_script(key: &PrivateKey, lock_time: u32) -> Vec<u8> {
    let mut script = Vec::new();
    push_data(&mut script, &lock_time.to_le_bytes());
    script.extend_from_slice(&[0xb1, 0x75]);
    script.extend_from_slice(&p2pkh_script_pubkey(&key.pubkey_hash()));
    script
}

/// Funding transaction paying `value` to the redeem script after an unrelated output
pub fn funding_tx(redeem_script: &[u8], value: i64) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TransactionInput {
            prevout: OutPoint { hash: [0x11; 32], index: 0 },
            script_sig: vec![0x51],
            sequence: 0xffffffff,
        }],
        outputs: vec![
            TransactionOutput {
                value: 25_000,
                script_pubkey: p2pkh_script_pubkey(&[0x22; 20]),
            },
            TransactionOutput {
                value,
                script_pubkey: p2sh_script_pubkey(&hash160(redeem_script)),
            },
        ],
        lock_time: 0,
    }
}

pub fn block_with(transactions: Vec<Transaction>, timestamp: u32) -> Block {
    Block {
        header: BlockHeader {
            version: 1,
            prev_block_hash: [0x33; 32],
            merkle_root: [0; 32],
            timestamp,
            bits: 0x207fffff,
            nonce: 0,
        },
        transactions,
    }
}

/// In-memory chain source
pub struct MockChain {
    pub blocks: HashMap<Hash, Block>,
    pub tip_height: u32,
    pub prior_block_time: u32,
}

impl MockChain {
    pub fn new(blocks: Vec<Block>, tip_height: u32, prior_block_time: u32) -> Self {
        Self {
            blocks: blocks
                .into_iter()
                .map(|block| (block_hash(&block.header), block))
                .collect(),
            tip_height,
            prior_block_time,
        }
    }
}

impl ChainSource for MockChain {
    async fn fetch_block(&self, hash: &Hash) -> Result<Block> {
        self.blocks
            .get(hash)
            .cloned()
            .ok_or_else(|| RedeemError::ChainUnavailable("unknown block".to_string()))
    }

    async fn tip_height(&self) -> Result<u32> {
        Ok(self.tip_height)
    }

    async fn prior_block_time(&self, _known_block: &Hash) -> Result<u32> {
        Ok(self.prior_block_time)
    }
}

/// A funded chain: the redeem script, its funding transaction and the block holding it
pub struct Scenario {
    pub params: NetworkParams,
    pub key: PrivateKey,
    pub redeem_script: Vec<u8>,
    pub funding_tx: Transaction,
    pub block: Block,
}

impl Scenario {
    pub fn new(lock_time: u32, value: i64) -> Self {
        let params = NetworkParams::main();
        let key = key(&params);
        let redeem_script = cltv_redeem_script(&key, lock_time);
        let funding_tx = funding_tx(&redeem_script, value);
        let block = block_with(vec![funding_tx.clone()], 1_650_000_000);
        Self {
            params,
            key,
            redeem_script,
            funding_tx,
            block,
        }
    }

    pub fn request(&self) -> RedemptionRequest {
        RedemptionRequest {
            private_key: self.key.clone(),
            redeem_script: self.redeem_script.clone(),
            transaction_hash: calculate_txid(&self.funding_tx),
            block_hash: block_hash(&self.block.header),
        }
    }

    pub fn chain(&self, tip_height: u32, prior_block_time: u32) -> MockChain {
        MockChain::new(vec![self.block.clone()], tip_height, prior_block_time)
    }
}
