//! The end-to-end redemption: locate, decode, build, sign and verify

use crate::builder::RedemptionBuilder;
use crate::chain::{chain_snapshot, fetch_block_with_timeout, ChainSource};
use crate::error::{RedeemError, Result};
use crate::funding::{find_funding_output, find_transaction};
use crate::keys::{Address, PrivateKey};
use crate::locktime::{decode_lock_time, LockTime};
use crate::params::NetworkParams;
use crate::script::{pay_to_pubkey_hash_target, ScriptVerifier};
use crate::serialization::{hash_to_hex, serialize_transaction};
use crate::transaction::calculate_txid;
use crate::types::*;
use crate::validator::RedemptionValidator;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// What the caller supplies
#[derive(Debug, Clone)]
pub struct RedemptionRequest {
    pub private_key: PrivateKey,
    pub redeem_script: ByteString,
    /// Funding transaction id, internal byte order
    pub transaction_hash: Hash,
    /// Block containing the funding transaction, internal byte order
    pub block_hash: Hash,
}

/// A signed, verified redemption ready to broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub transaction: Transaction,
    pub funding: FundingOutput,
    pub lock_time: LockTime,
    pub fee: i64,
}

impl Redemption {
    pub fn txid(&self) -> Hash {
        calculate_txid(&self.transaction)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(serialize_transaction(&self.transaction))
    }

    pub fn report(&self, params: &NetworkParams) -> RedemptionReport {
        let output = &self.transaction.outputs[0];
        RedemptionReport {
            txid: hash_to_hex(&self.txid()),
            hex: self.to_hex(),
            funding_txid: hash_to_hex(&self.funding.outpoint.hash),
            funding_index: self.funding.outpoint.index,
            funding_value: self.funding.value(),
            lock_time: self.lock_time,
            unlocks_at: self.lock_time.to_string(),
            fee: self.fee,
            value: output.value,
            pay_to: Address::from_p2sh_script(params, &output.script_pubkey)
                .or_else(|| pubkey_hash_address(params, &output.script_pubkey))
                .map(|address| address.to_string()),
        }
    }
}

fn pubkey_hash_address(params: &NetworkParams, script_pubkey: &[u8]) -> Option<Address> {
    pay_to_pubkey_hash_target(script_pubkey).map(|hash| Address {
        version: params.p2pkh_version,
        hash,
    })
}

/// Machine-readable summary printed with `--json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RedemptionReport {
    pub txid: String,
    pub hex: String,
    pub funding_txid: String,
    pub funding_index: u32,
    pub funding_value: i64,
    pub lock_time: LockTime,
    pub unlocks_at: String,
    pub fee: i64,
    pub value: i64,
    pub pay_to: Option<String>,
}

/// Drives one redemption against a chain source and a script verifier
pub struct Redeemer<C: ChainSource, V: ScriptVerifier> {
    params: NetworkParams,
    chain: C,
    validator: RedemptionValidator<V>,
    fetch_timeout: Duration,
}

impl<C: ChainSource, V: ScriptVerifier> Redeemer<C, V> {
    pub fn new(params: NetworkParams, chain: C, verifier: V, fetch_timeout: Duration) -> Self {
        Self {
            params,
            chain,
            validator: RedemptionValidator::new(verifier),
            fetch_timeout,
        }
    }

    pub fn params(&self) -> &NetworkParams {
        &self.params
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    /// GenerateTransaction: request → Redemption
    ///
    /// 1. Fetch the funding block within the timeout
    /// 2. Select the funding transaction and the output paying to the redeem script
    /// 3. Decode the lock time from the redeem script
    /// 4. Read the chain snapshot from the funding block forward
    /// 5. Build and sign, then verify against the funding output
    pub async fn generate_transaction(&self, request: &RedemptionRequest) -> Result<Redemption> {
        if request.private_key.network() != self.params.network {
            return Err(RedeemError::InvalidInput(format!(
                "private key belongs to {}, redeeming on {}",
                request.private_key.network(),
                self.params.network
            )));
        }

        let block =
            fetch_block_with_timeout(&self.chain, &request.block_hash, self.fetch_timeout).await?;
        debug!(
            "Block {} holds {} transactions",
            hash_to_hex(&request.block_hash),
            block.transactions.len()
        );

        let funding_tx = find_transaction(&block, &request.transaction_hash).ok_or_else(|| {
            RedeemError::FundingNotFound(format!(
                "transaction {} is not in block {}",
                hash_to_hex(&request.transaction_hash),
                hash_to_hex(&request.block_hash)
            ))
        })?;

        let funding = find_funding_output(funding_tx, &request.redeem_script, &self.params)
            .ok_or_else(|| {
                RedeemError::FundingNotFound(format!(
                    "no output of {} pays to {}",
                    hash_to_hex(&request.transaction_hash),
                    Address::p2sh(&self.params, &request.redeem_script)
                ))
            })?;

        let lock_time = decode_lock_time(&request.redeem_script).ok_or_else(|| {
            RedeemError::LockTimeUndecodable(
                "the redeem script does not start with a 4-byte lock time push".to_string(),
            )
        })?;
        info!("Redeem script locks funds until {}", lock_time);

        let snapshot = chain_snapshot(&self.chain, &request.block_hash).await?;

        let transaction = RedemptionBuilder::new(&self.params).build(
            &request.private_key,
            &request.redeem_script,
            &funding,
            lock_time,
            &snapshot,
        )?;
        self.validator.verify(&transaction, &funding)?;

        let redemption = Redemption {
            fee: funding.value() - transaction.outputs[0].value,
            transaction,
            funding,
            lock_time,
        };
        info!("Redemption {} verified", hash_to_hex(&redemption.txid()));
        Ok(redemption)
    }
}
