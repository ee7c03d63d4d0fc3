//! # Premine Redeemer
//!
//! Redeems a premined payment locked to a pay-to-script-hash address whose redeem script starts
//! with an absolute lock time.
//!
//! Given the owner's private key, the redeem script and the ids of the funding transaction and
//! its block, the crate locates the funding output, reads the lock time from the script, builds
//! and signs the spending transaction, verifies it offline and relays it to a set of peers,
//! requiring a minimum number of them to accept it.
//!
//! ## Architecture
//!
//! - [`locktime`] reads the lock time encoded at the head of the redeem script
//! - [`funding`] finds the output paying to the script's P2SH address
//! - [`builder`] assembles and signs the redemption
//! - [`validator`] checks finality and re-verifies the signed transaction
//! - [`broadcast`] submits to peers with an acknowledgment threshold
//!
//! Chain access, script execution and transaction relay sit behind the [`chain::ChainSource`],
//! [`script::ScriptVerifier`] and [`broadcast::TransactionRelay`] traits. [`peer`] implements
//! the first and last over the P2P protocol; [`script::Interpreter`] implements the second.
//!
//! ## Usage
//!
//! ```rust
//! use premine_redeemer::locktime::{decode_lock_time, LockTime};
//!
//! // <1700000000> OP_CHECKLOCKTIMEVERIFY OP_DROP OP_TRUE
//! let redeem_script = [0x04, 0x00, 0xf1, 0x53, 0x65, 0xb1, 0x75, 0x51];
//! let lock_time = decode_lock_time(&redeem_script).unwrap();
//! assert_eq!(lock_time, LockTime::Timestamp(1_700_000_000));
//! assert_eq!(lock_time.to_string(), "2023-11-14T22:13:20Z");
//! ```

pub mod types;
pub mod constants;
pub mod error;
pub mod params;
pub mod serialization;
pub mod transaction;
pub mod sighash;
pub mod keys;
pub mod script;
pub mod locktime;
pub mod funding;
pub mod builder;
pub mod validator;
pub mod chain;
pub mod broadcast;
pub mod network;
pub mod peer;
pub mod redeem;
pub mod config;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use error::{RedeemError, Result};
pub use params::{Network, NetworkParams};
pub use keys::{Address, PrivateKey};
pub use locktime::LockTime;
pub use builder::RedemptionBuilder;
pub use validator::RedemptionValidator;
pub use broadcast::{BroadcastCoordinator, BroadcastOutcome, TransactionRelay};
pub use chain::ChainSource;
pub use script::{Interpreter, ScriptVerifier};
pub use redeem::{Redeemer, Redemption, RedemptionReport, RedemptionRequest};

/// Offline half of the redemption: build, sign and verify against a known funding output
///
/// # Examples
///
/// ```
/// use premine_redeemer::*;
/// use premine_redeemer::keys::hash160;
/// use premine_redeemer::script::p2sh_script_pubkey;
///
/// let params = NetworkParams::main();
/// let key = PrivateKey::from_wif(&params, "KwDiBf89QgGbjEhKnhXJuH7LrciVrZi3qYjgd9M7rFU73sVHnoWn").unwrap();
///
/// // <1700000000> OP_CHECKLOCKTIMEVERIFY OP_DROP OP_DUP OP_HASH160 <pkh> OP_EQUALVERIFY OP_CHECKSIG
/// let mut redeem_script = vec![0x04, 0x00, 0xf1, 0x53, 0x65, 0xb1, 0x75, 0x76, 0xa9, 0x14];
/// redeem_script.extend_from_slice(&key.pubkey_hash());
/// redeem_script.extend_from_slice(&[0x88, 0xac]);
///
/// let funding = FundingOutput {
///     outpoint: OutPoint { hash: [7; 32], index: 0 },
///     output: TransactionOutput {
///         value: 100_000,
///         script_pubkey: p2sh_script_pubkey(&hash160(&redeem_script)),
///     },
/// };
/// let snapshot = ChainSnapshot { tip_height: 900_000, prior_block_time: 1_800_000_000 };
///
/// let offline = OfflineRedeemer::new(&params);
/// let tx = offline.sign(&key, &redeem_script, &funding, &snapshot).unwrap();
/// assert_eq!(tx.outputs[0].value, 99_000);
/// assert_eq!(tx.lock_time, 1_700_000_000);
/// ```
pub struct OfflineRedeemer<'a> {
    params: &'a NetworkParams,
    validator: RedemptionValidator<Interpreter>,
}

impl<'a> OfflineRedeemer<'a> {
    pub fn new(params: &'a NetworkParams) -> Self {
        Self {
            params,
            validator: RedemptionValidator::new(Interpreter::default()),
        }
    }

    /// Decode the lock time, build and sign, then verify with the built-in interpreter
    pub fn sign(
        &self,
        private_key: &PrivateKey,
        redeem_script: &[u8],
        funding: &FundingOutput,
        snapshot: &ChainSnapshot,
    ) -> Result<Transaction> {
        let lock_time = locktime::decode_lock_time(redeem_script).ok_or_else(|| {
            RedeemError::LockTimeUndecodable("redeem script has no leading lock time".to_string())
        })?;
        let tx = RedemptionBuilder::new(self.params).build(
            private_key,
            redeem_script,
            funding,
            lock_time,
            snapshot,
        )?;
        self.validator.verify(&tx, funding)?;
        Ok(tx)
    }
}
