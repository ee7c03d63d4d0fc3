//! Absolute lock times and their encoding at the head of a redeem script

use crate::constants::LOCKTIME_THRESHOLD;
use crate::script::parse_script;
use crate::types::ChainSnapshot;
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};
use std::fmt;

/// nLockTime interpreted against the height/time threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockTime {
    BlockHeight(u32),
    /// Unix seconds
    Timestamp(u32),
}

impl LockTime {
    pub fn from_consensus(value: u32) -> Self {
        if value < LOCKTIME_THRESHOLD {
            LockTime::BlockHeight(value)
        } else {
            LockTime::Timestamp(value)
        }
    }

    pub fn to_consensus_u32(self) -> u32 {
        match self {
            LockTime::BlockHeight(v) | LockTime::Timestamp(v) => v,
        }
    }

    pub fn is_block_height(self) -> bool {
        matches!(self, LockTime::BlockHeight(_))
    }

    /// Lock has passed: zero, or strictly below the tip height (heights) or the prior block time (timestamps)
    pub fn is_satisfied_by(self, snapshot: &ChainSnapshot) -> bool {
        match self {
            LockTime::BlockHeight(0) => true,
            LockTime::BlockHeight(height) => height < snapshot.tip_height,
            LockTime::Timestamp(time) => time < snapshot.prior_block_time,
        }
    }
}

impl fmt::Display for LockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockTime::BlockHeight(height) => write!(f, "block height {}", height),
            LockTime::Timestamp(time) => match DateTime::from_timestamp(*time as i64, 0) {
                Some(date) => f.write_str(&date.to_rfc3339_opts(SecondsFormat::Secs, true)),
                None => write!(f, "unix time {}", time),
            },
        }
    }
}

/// ScriptLockTimeCodec: 𝕊 → LockTime ∪ {⊥}
///
/// The lock time is the first chunk of the redeem script, which must be a push of exactly
/// four bytes read as an unsigned little-endian integer. Anything else yields `None`.
pub fn decode_lock_time(redeem_script: &[u8]) -> Option<LockTime> {
    let chunks = parse_script(redeem_script).ok()?;
    let first = chunks.first()?;
    if !first.is_push_data() {
        return None;
    }
    let bytes: [u8; 4] = first.data.as_deref()?.try_into().ok()?;
    Some(LockTime::from_consensus(u32::from_le_bytes(bytes)))
}
