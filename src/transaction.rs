//! Context-free transaction checks and identifiers

use crate::constants::*;
use crate::error::Result;
use crate::serialization::{double_sha256, serialize_transaction};
use crate::types::*;
use std::collections::HashSet;

/// CheckTransaction: structural validity without chain context
///
/// A transaction is well formed if and only if:
/// 1. it has at least one input and one output
/// 2. every output value lies in [0, MAX_MONEY] and so does their sum
/// 3. input and output counts stay within their limits
/// 4. the serialized size stays within MAX_TX_SIZE
/// 5. no outpoint is spent twice
/// 6. coinbase scripts are 2..=100 bytes; other inputs never spend the null outpoint
pub fn check_transaction(tx: &Transaction) -> Result<ValidationResult> {
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Ok(ValidationResult::Invalid("Empty inputs or outputs".to_string()));
    }

    let mut total_output_value = 0i64;
    for (i, output) in tx.outputs.iter().enumerate() {
        if output.value < 0 || output.value > MAX_MONEY {
            return Ok(ValidationResult::Invalid(format!(
                "Invalid output value {} at index {}",
                output.value, i
            )));
        }
        total_output_value += output.value;
        if total_output_value > MAX_MONEY {
            return Ok(ValidationResult::Invalid(format!(
                "Total output value {} exceeds maximum",
                total_output_value
            )));
        }
    }

    if tx.inputs.len() > MAX_INPUTS {
        return Ok(ValidationResult::Invalid(format!(
            "Too many inputs: {}",
            tx.inputs.len()
        )));
    }

    if tx.outputs.len() > MAX_OUTPUTS {
        return Ok(ValidationResult::Invalid(format!(
            "Too many outputs: {}",
            tx.outputs.len()
        )));
    }

    let tx_size = calculate_transaction_size(tx);
    if tx_size > MAX_TX_SIZE {
        return Ok(ValidationResult::Invalid(format!(
            "Transaction too large: {} bytes",
            tx_size
        )));
    }

    let mut seen = HashSet::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        if !seen.insert(input.prevout) {
            return Ok(ValidationResult::Invalid(format!(
                "Duplicate input {}:{}",
                crate::serialization::hash_to_hex(&input.prevout.hash),
                input.prevout.index
            )));
        }
    }

    if is_coinbase(tx) {
        let len = tx.inputs[0].script_sig.len();
        if !(2..=100).contains(&len) {
            return Ok(ValidationResult::Invalid(format!(
                "Coinbase script size {} out of range",
                len
            )));
        }
    } else if tx.inputs.iter().any(|input| input.prevout.is_null()) {
        return Ok(ValidationResult::Invalid("Input spends null outpoint".to_string()));
    }

    Ok(ValidationResult::Valid)
}

/// Check if transaction is coinbase
pub fn is_coinbase(tx: &Transaction) -> bool {
    tx.inputs.len() == 1 && tx.inputs[0].prevout.is_null()
}

/// Serialized size in bytes
pub fn calculate_transaction_size(tx: &Transaction) -> usize {
    serialize_transaction(tx).len()
}

/// Transaction id: double SHA-256 of the legacy serialization, internal byte order
pub fn calculate_txid(tx: &Transaction) -> Hash {
    double_sha256(&serialize_transaction(tx))
}
