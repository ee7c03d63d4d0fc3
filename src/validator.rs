//! Finality and pre-broadcast verification of the redemption

use crate::constants::SEQUENCE_FINAL;
use crate::error::{RedeemError, Result};
use crate::locktime::LockTime;
use crate::script::ScriptVerifier;
use crate::transaction::check_transaction;
use crate::types::*;
use tracing::debug;

/// IsFinalTx: 𝒯𝒳 × ChainSnapshot → {true, false}
///
/// A transaction is final if and only if:
/// 1. its lock time is 0, or
/// 2. its lock time lies below the tip height (height locks) or the prior block time (time locks), or
/// 3. every input has a final sequence number
pub fn is_final_tx(tx: &Transaction, snapshot: &ChainSnapshot) -> bool {
    if LockTime::from_consensus(tx.lock_time).is_satisfied_by(snapshot) {
        return true;
    }
    tx.inputs.iter().all(|input| input.sequence == SEQUENCE_FINAL)
}

/// Fail with the unlock deadline when the transaction cannot be mined yet
pub fn check_finality(tx: &Transaction, snapshot: &ChainSnapshot) -> Result<()> {
    if is_final_tx(tx, snapshot) {
        return Ok(());
    }
    let lock_time = LockTime::from_consensus(tx.lock_time);
    debug!(
        "Transaction not final: lock time {}, tip height {}, prior block time {}",
        tx.lock_time, snapshot.tip_height, snapshot.prior_block_time
    );
    Err(RedeemError::NotYetSpendable {
        lock_time,
        unlock: lock_time.to_string(),
    })
}

/// Re-verifies the fully assembled redemption before it is broadcast
pub struct RedemptionValidator<V: ScriptVerifier> {
    verifier: V,
}

impl<V: ScriptVerifier> RedemptionValidator<V> {
    pub fn new(verifier: V) -> Self {
        Self { verifier }
    }

    /// Structural checks, then the script check of input 0 against the funding output
    pub fn verify(&self, tx: &Transaction, funding: &FundingOutput) -> Result<()> {
        if let ValidationResult::Invalid(reason) = check_transaction(tx)? {
            return Err(RedeemError::VerificationFailed(reason));
        }

        self.verifier
            .verify_script(tx, 0, funding.script_pubkey())
            .map_err(|e| match e {
                RedeemError::ScriptExecution(reason) | RedeemError::Serialization(reason) => {
                    RedeemError::VerificationFailed(reason)
                }
                other => RedeemError::VerificationFailed(other.to_string()),
            })
    }
}
