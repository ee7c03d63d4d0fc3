//! Error types for the redemption workflow

use crate::locktime::LockTime;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RedeemError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Chain unavailable: {0}")]
    ChainUnavailable(String),

    #[error("Funding output not found: {0}")]
    FundingNotFound(String),

    #[error("Lock time undecodable: {0}")]
    LockTimeUndecodable(String),

    #[error("The redeem script was created with a lock time in the future. Wait until {unlock} and try again")]
    NotYetSpendable { lock_time: LockTime, unlock: String },

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),

    #[error("Script execution failed: {0}")]
    ScriptExecution(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl RedeemError {
    /// Only a premature spend can succeed by re-running later with the same inputs.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RedeemError::NotYetSpendable { .. })
    }

    /// Process exit status reported by the binary.
    pub fn exit_code(&self) -> u8 {
        if self.is_recoverable() {
            2
        } else {
            1
        }
    }
}

pub type Result<T> = std::result::Result<T, RedeemError>;
