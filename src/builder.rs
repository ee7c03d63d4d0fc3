//! Construction and signing of the redemption transaction

use crate::constants::*;
use crate::error::{RedeemError, Result};
use crate::keys::PrivateKey;
use crate::locktime::LockTime;
use crate::params::NetworkParams;
use crate::script::push_only_script;
use crate::sighash::signature_hash;
use crate::types::*;
use crate::validator::check_finality;
use tracing::debug;

/// Assembles the single-input, single-output transaction spending the premined output
pub struct RedemptionBuilder<'a> {
    params: &'a NetworkParams,
}

impl<'a> RedemptionBuilder<'a> {
    pub fn new(params: &'a NetworkParams) -> Self {
        Self { params }
    }

    /// Value left for the owner once the fixed fee is paid
    pub fn redeemable_value(&self, funding: &FundingOutput) -> Result<i64> {
        if !(0..=MAX_MONEY).contains(&funding.value()) {
            return Err(RedeemError::InsufficientFunds(format!(
                "funding output value {} is outside the money range",
                funding.value()
            )));
        }
        let value = funding
            .value()
            .checked_sub(self.params.min_tx_fee)
            .ok_or_else(|| {
                RedeemError::InsufficientFunds(format!(
                    "funding output holds {}, which cannot cover the {} fee",
                    funding.value(),
                    self.params.min_tx_fee
                ))
            })?;
        if value < self.params.min_nondust_output {
            return Err(RedeemError::InsufficientFunds(format!(
                "funding output holds {} which leaves {} after the {} fee, below the dust limit of {}",
                funding.value(),
                value,
                self.params.min_tx_fee,
                self.params.min_nondust_output
            )));
        }
        Ok(value)
    }

    /// The redemption before signing
    ///
    /// 1. version 1
    /// 2. one input spending the funding outpoint, sequence 0 so the lock time binds
    /// 3. one output paying the funding value minus the fee back to the key
    /// 4. lock time taken from the redeem script
    pub fn build_unsigned(
        &self,
        private_key: &PrivateKey,
        funding: &FundingOutput,
        lock_time: LockTime,
    ) -> Result<Transaction> {
        let value = self.redeemable_value(funding)?;
        Ok(Transaction {
            version: REDEEM_TX_VERSION,
            inputs: vec![TransactionInput {
                prevout: funding.outpoint,
                script_sig: Vec::new(),
                sequence: REDEEM_SEQUENCE,
            }],
            outputs: vec![TransactionOutput {
                value,
                script_pubkey: private_key.p2pkh_script_pubkey(),
            }],
            lock_time: lock_time.to_consensus_u32(),
        })
    }

    /// Build, check finality against `snapshot`, then sign input 0 with SIGHASH_ALL over the redeem script
    pub fn build(
        &self,
        private_key: &PrivateKey,
        redeem_script: &[u8],
        funding: &FundingOutput,
        lock_time: LockTime,
        snapshot: &ChainSnapshot,
    ) -> Result<Transaction> {
        let mut tx = self.build_unsigned(private_key, funding, lock_time)?;
        check_finality(&tx, snapshot)?;

        let sighash = signature_hash(&tx, 0, redeem_script, SIGHASH_ALL);
        let mut signature = private_key.sign_digest(&sighash).serialize_der().to_vec();
        signature.push(SIGHASH_ALL as u8);
        debug!("Signed sighash {}", hex::encode(sighash));

        tx.inputs[0].script_sig =
            unlocking_script(&signature, &private_key.public_key_bytes(), redeem_script);
        Ok(tx)
    }
}

/// <signature> <public key> <redeem script>
pub fn unlocking_script(signature: &[u8], public_key: &[u8], redeem_script: &[u8]) -> ByteString {
    push_only_script(&[signature, public_key, redeem_script])
}
