//! Legacy (pre-segwit) signature hash

use crate::constants::*;
use crate::script::{opcodes::OP_CODESEPARATOR, parse_script};
use crate::serialization::{double_sha256, serialize_transaction};
use crate::types::*;

/// Returned instead of a digest for out-of-range inputs and SIGHASH_SINGLE without a matching output
const SIGHASH_ONE: Hash = [
    1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
];

/// SignatureHash: 𝒯𝒳 × ℕ × 𝕊 × ℕ → ℍ
///
/// 1. Blank every input script, then put `script_code` (code separators removed) in input `input_index`
/// 2. SIGHASH_NONE drops all outputs, SIGHASH_SINGLE keeps outputs up to `input_index` and blanks the
///    earlier ones; both zero the sequence of the other inputs
/// 3. SIGHASH_ANYONECANPAY keeps only the signed input
/// 4. Hash the serialization followed by the 4-byte little-endian sighash type
pub fn signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &[u8],
    sighash_type: u32,
) -> Hash {
    if input_index >= tx.inputs.len() {
        return SIGHASH_ONE;
    }

    let base_type = sighash_type & 0x1f;
    if base_type == SIGHASH_SINGLE && input_index >= tx.outputs.len() {
        return SIGHASH_ONE;
    }

    let mut copy = tx.clone();
    for input in &mut copy.inputs {
        input.script_sig.clear();
    }
    copy.inputs[input_index].script_sig = strip_code_separators(script_code);

    match base_type {
        SIGHASH_NONE => {
            copy.outputs.clear();
            zero_other_sequences(&mut copy, input_index);
        }
        SIGHASH_SINGLE => {
            copy.outputs.truncate(input_index + 1);
            for output in &mut copy.outputs[..input_index] {
                output.value = -1;
                output.script_pubkey.clear();
            }
            zero_other_sequences(&mut copy, input_index);
        }
        _ => {}
    }

    if sighash_type & SIGHASH_ANYONECANPAY != 0 {
        let signed = copy.inputs.swap_remove(input_index);
        copy.inputs = vec![signed];
    }

    let mut data = serialize_transaction(&copy);
    data.extend_from_slice(&sighash_type.to_le_bytes());
    double_sha256(&data)
}

fn zero_other_sequences(tx: &mut Transaction, input_index: usize) {
    for (i, input) in tx.inputs.iter_mut().enumerate() {
        if i != input_index {
            input.sequence = 0;
        }
    }
}

fn strip_code_separators(script_code: &[u8]) -> ByteString {
    match parse_script(script_code) {
        Ok(chunks) if chunks.iter().any(|c| c.opcode == OP_CODESEPARATOR) => chunks
            .iter()
            .filter(|c| c.opcode != OP_CODESEPARATOR)
            .flat_map(|c| c.to_bytes())
            .collect(),
        _ => script_code.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_by_two() -> Transaction {
        Transaction {
            version: 1,
            inputs: (0..2)
                .map(|i| TransactionInput {
                    prevout: OutPoint { hash: [i as u8 + 1; 32], index: i },
                    script_sig: vec![0x51],
                    sequence: 0xfffffffe,
                })
                .collect(),
            outputs: (0..2)
                .map(|i| TransactionOutput {
                    value: 1000 * (i + 1),
                    script_pubkey: vec![0x51],
                })
                .collect(),
            lock_time: 0,
        }
    }

    #[test]
    fn test_out_of_range_input_hashes_to_one() {
        assert_eq!(signature_hash(&two_by_two(), 5, &[], SIGHASH_ALL), SIGHASH_ONE);
    }

    #[test]
    fn test_single_without_output_hashes_to_one() {
        let mut tx = two_by_two();
        tx.outputs.truncate(1);
        assert_eq!(signature_hash(&tx, 1, &[], SIGHASH_SINGLE), SIGHASH_ONE);
    }

    #[test]
    fn test_existing_input_scripts_do_not_affect_hash() {
        let tx = two_by_two();
        let mut other = tx.clone();
        other.inputs[1].script_sig = vec![0x52, 0x53];
        assert_eq!(
            signature_hash(&tx, 0, &[0xac], SIGHASH_ALL),
            signature_hash(&other, 0, &[0xac], SIGHASH_ALL)
        );
    }

    #[test]
    fn test_all_commits_to_outputs_and_lock_time() {
        let tx = two_by_two();
        let base = signature_hash(&tx, 0, &[0xac], SIGHASH_ALL);

        let mut changed_output = tx.clone();
        changed_output.outputs[1].value += 1;
        assert_ne!(base, signature_hash(&changed_output, 0, &[0xac], SIGHASH_ALL));

        let mut changed_lock = tx.clone();
        changed_lock.lock_time = 100;
        assert_ne!(base, signature_hash(&changed_lock, 0, &[0xac], SIGHASH_ALL));
    }

    #[test]
    fn test_none_ignores_outputs() {
        let tx = two_by_two();
        let mut changed = tx.clone();
        changed.outputs[0].value = 1;
        assert_eq!(
            signature_hash(&tx, 0, &[0xac], SIGHASH_NONE),
            signature_hash(&changed, 0, &[0xac], SIGHASH_NONE)
        );
    }

    #[test]
    fn test_anyonecanpay_ignores_other_inputs() {
        let tx = two_by_two();
        let mut changed = tx.clone();
        changed.inputs[1].prevout.index = 9;
        let hash_type = SIGHASH_ALL | SIGHASH_ANYONECANPAY;
        assert_eq!(
            signature_hash(&tx, 0, &[0xac], hash_type),
            signature_hash(&changed, 0, &[0xac], hash_type)
        );
    }

    #[test]
    fn test_script_code_is_committed() {
        let tx = two_by_two();
        assert_ne!(
            signature_hash(&tx, 0, &[0xac], SIGHASH_ALL),
            signature_hash(&tx, 0, &[0x51, 0xac], SIGHASH_ALL)
        );
    }

    #[test]
    fn test_code_separators_are_removed() {
        let tx = two_by_two();
        assert_eq!(
            signature_hash(&tx, 0, &[0xab, 0x51, 0xab, 0xac], SIGHASH_ALL),
            signature_hash(&tx, 0, &[0x51, 0xac], SIGHASH_ALL)
        );
    }
}
